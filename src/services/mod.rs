//! Domain logic sitting between the HTTP handlers and the store.
//!
//! Functions here take `&dyn Store` plus plain inputs and return `ApiError`
//! on failure, so they run unchanged against Postgres or the in-memory fake.

use serde::Serialize;

pub mod appointments;
pub mod calendar;
pub mod dashboard;
pub mod doctors;
pub mod invoices;
pub mod patients;
pub mod reminders;
pub mod scheduling;
pub mod treatments;

/// Outcome of a referential-integrity check before a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCheck {
    pub can_delete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub appointment_count: i64,
}

impl DeleteCheck {
    pub fn from_appointment_count(what: &str, appointment_count: i64) -> Self {
        if appointment_count > 0 {
            DeleteCheck {
                can_delete: false,
                reason: Some(format!("{what} has {appointment_count} associated appointments")),
                appointment_count,
            }
        } else {
            DeleteCheck {
                can_delete: true,
                reason: None,
                appointment_count: 0,
            }
        }
    }
}

/// Trims and drops empty strings.
pub(crate) fn clean_opt(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<String, crate::error::ApiError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(crate::error::ApiError::validation(format!("{field} is required")));
    }
    Ok(v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_check_reports_reason_only_when_blocked() {
        let blocked = DeleteCheck::from_appointment_count("Doctor", 3);
        assert!(!blocked.can_delete);
        assert_eq!(blocked.reason.as_deref(), Some("Doctor has 3 associated appointments"));

        let free = DeleteCheck::from_appointment_count("Doctor", 0);
        assert!(free.can_delete);
        let json = serde_json::to_value(&free).unwrap();
        assert!(json.get("reason").is_none());
        assert_eq!(json["canDelete"], true);
    }

    #[test]
    fn clean_opt_drops_blank_values() {
        assert_eq!(clean_opt(Some("  ".into())), None);
        assert_eq!(clean_opt(Some(" a@b.it ".into())), Some("a@b.it".into()));
        assert!(require_text("name", "   ").is_err());
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::NaiveDate;

    use crate::models::{Doctor, NewDoctor, NewPatient, NewTreatment, Patient, Treatment};
    use crate::store::memory::MemoryStore;
    use crate::store::{DoctorStore, PatientStore, TreatmentStore};

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub async fn patient(store: &MemoryStore, first: &str, last: &str) -> Patient {
        store
            .insert_patient(&NewPatient {
                first_name: first.into(),
                last_name: last.into(),
                phone: "+39 333 0000000".into(),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    pub async fn doctor(store: &MemoryStore, name: &str, specialization: &str) -> Doctor {
        store
            .insert_doctor(&NewDoctor {
                name: name.into(),
                specialization: specialization.into(),
                color: "#3366FF".into(),
                email: None,
                phone: None,
            })
            .await
            .unwrap()
    }

    pub async fn treatment(store: &MemoryStore, name: &str, category: &str, duration_min: i32, price_cents: i64) -> Treatment {
        store
            .insert_treatment(&NewTreatment {
                name: name.into(),
                duration_min,
                price_cents,
                category: category.into(),
                description: None,
            })
            .await
            .unwrap()
    }
}
