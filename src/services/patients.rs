use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{clean_opt, require_text};
use crate::error::ApiError;
use crate::models::{
    deserialize_double_option, AppointmentFilter, InvoiceFilter, NewPatient, Page, PageRequest,
    Patient, PatientFilter, PatientSort, SortOrder,
};
use crate::store::{ListOptions, Store};

pub const DEFAULT_SEARCH_LIMIT: i64 = 10;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreatePatient {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: String,
    pub date_of_birth: Option<NaiveDate>,
    pub fiscal_code: Option<String>,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub province: String,
    pub medical_history: String,
    pub allergies: Option<String>,
    pub medications: Option<String>,
    pub is_smoker: bool,
    pub anamnesis: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePatient {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub email: Option<Option<String>>,
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub date_of_birth: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub fiscal_code: Option<Option<String>>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub province: Option<String>,
    pub medical_history: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub allergies: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub medications: Option<Option<String>>,
    pub is_smoker: Option<bool>,
    pub anamnesis: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct PatientStats {
    pub total: i64,
    pub smokers: i64,
    pub with_allergies: i64,
    pub new_this_month: i64,
}

fn normalize_fiscal_code(code: Option<String>) -> Option<String> {
    clean_opt(code).map(|c| c.to_ascii_uppercase())
}

fn check_email(email: &Option<String>) -> Result<(), ApiError> {
    match email {
        Some(e) if !e.contains('@') => Err(ApiError::validation(format!("invalid email `{e}`"))),
        _ => Ok(()),
    }
}

/// Refuses an email or fiscal code already used by a different patient.
async fn ensure_unique(
    store: &dyn Store,
    email: Option<&str>,
    fiscal_code: Option<&str>,
    exclude_id: Option<Uuid>,
) -> Result<(), ApiError> {
    if let Some(email) = email {
        let filter = PatientFilter {
            email: Some(email.to_string()),
            exclude_id,
            ..Default::default()
        };
        if store.count_patients(&filter).await? > 0 {
            return Err(ApiError::Conflict(
                "EMAIL_TAKEN",
                format!("email {email} is already registered to another patient"),
            ));
        }
    }
    if let Some(code) = fiscal_code {
        let filter = PatientFilter {
            fiscal_code: Some(code.to_string()),
            exclude_id,
            ..Default::default()
        };
        if store.count_patients(&filter).await? > 0 {
            return Err(ApiError::Conflict(
                "FISCAL_CODE_TAKEN",
                format!("fiscal code {code} is already registered to another patient"),
            ));
        }
    }
    Ok(())
}

pub async fn list(
    store: &dyn Store,
    filter: &PatientFilter,
    sort: PatientSort,
    order: SortOrder,
    page: PageRequest,
) -> Result<Page<Patient>, ApiError> {
    let total = store.count_patients(filter).await?;
    let opts = ListOptions {
        sort,
        order,
        limit: Some(page.limit),
        offset: page.offset(),
    };
    let records = store.list_patients(filter, &opts).await?;
    Ok(Page::new(records, total, page))
}

pub async fn get(store: &dyn Store, id: Uuid) -> Result<Patient, ApiError> {
    store.get_patient(id).await?.ok_or_else(|| ApiError::not_found("patient"))
}

pub async fn create(store: &dyn Store, req: CreatePatient) -> Result<Patient, ApiError> {
    let new = NewPatient {
        first_name: require_text("first_name", &req.first_name)?,
        last_name: require_text("last_name", &req.last_name)?,
        email: clean_opt(req.email),
        phone: req.phone.trim().to_string(),
        date_of_birth: req.date_of_birth,
        fiscal_code: normalize_fiscal_code(req.fiscal_code),
        address: req.address,
        city: req.city.trim().to_string(),
        postal_code: req.postal_code,
        province: req.province,
        medical_history: req.medical_history,
        allergies: clean_opt(req.allergies),
        medications: clean_opt(req.medications),
        is_smoker: req.is_smoker,
        anamnesis: req.anamnesis,
    };
    check_email(&new.email)?;
    ensure_unique(store, new.email.as_deref(), new.fiscal_code.as_deref(), None).await?;

    let patient = store.insert_patient(&new).await?;
    tracing::info!(patient_id = %patient.patient_id, "patient registered");
    Ok(patient)
}

pub async fn update(store: &dyn Store, id: Uuid, req: UpdatePatient) -> Result<Patient, ApiError> {
    let mut p = get(store, id).await?;

    if let Some(v) = req.first_name {
        p.first_name = require_text("first_name", &v)?;
    }
    if let Some(v) = req.last_name {
        p.last_name = require_text("last_name", &v)?;
    }
    if let Some(v) = req.email {
        p.email = clean_opt(v);
    }
    if let Some(v) = req.phone {
        p.phone = v.trim().to_string();
    }
    if let Some(v) = req.date_of_birth {
        p.date_of_birth = v;
    }
    if let Some(v) = req.fiscal_code {
        p.fiscal_code = normalize_fiscal_code(v);
    }
    if let Some(v) = req.address {
        p.address = v;
    }
    if let Some(v) = req.city {
        p.city = v.trim().to_string();
    }
    if let Some(v) = req.postal_code {
        p.postal_code = v;
    }
    if let Some(v) = req.province {
        p.province = v;
    }
    if let Some(v) = req.medical_history {
        p.medical_history = v;
    }
    if let Some(v) = req.allergies {
        p.allergies = clean_opt(v);
    }
    if let Some(v) = req.medications {
        p.medications = clean_opt(v);
    }
    if let Some(v) = req.is_smoker {
        p.is_smoker = v;
    }
    if let Some(v) = req.anamnesis {
        p.anamnesis = v;
    }

    check_email(&p.email)?;
    ensure_unique(store, p.email.as_deref(), p.fiscal_code.as_deref(), Some(id)).await?;

    let updated = store
        .update_patient(&p)
        .await?
        .ok_or_else(|| ApiError::not_found("patient"))?;
    tracing::info!(patient_id = %id, "patient updated");
    Ok(updated)
}

pub async fn delete(store: &dyn Store, id: Uuid) -> Result<(), ApiError> {
    get(store, id).await?;

    let appointments = store
        .count_appointments(&AppointmentFilter {
            patient_id: Some(id),
            ..Default::default()
        })
        .await?;
    if appointments > 0 {
        tracing::warn!(patient_id = %id, appointments, "patient delete refused");
        return Err(ApiError::Conflict(
            "HAS_APPOINTMENTS",
            format!("Patient has {appointments} associated appointments"),
        ));
    }
    let invoices = store
        .count_invoices(&InvoiceFilter {
            patient_id: Some(id),
            ..Default::default()
        })
        .await?;
    if invoices > 0 {
        tracing::warn!(patient_id = %id, invoices, "patient delete refused");
        return Err(ApiError::Conflict(
            "HAS_INVOICES",
            format!("Patient has {invoices} associated invoices"),
        ));
    }

    if !store.delete_patient(id).await? {
        return Err(ApiError::not_found("patient"));
    }
    tracing::info!(patient_id = %id, "patient deleted");
    Ok(())
}

pub async fn search(store: &dyn Store, query: &str, limit: i64) -> Result<Vec<Patient>, ApiError> {
    let filter = PatientFilter {
        search: clean_opt(Some(query.to_string())),
        ..Default::default()
    };
    Ok(store
        .list_patients(&filter, &ListOptions::first(PatientSort::LastName, SortOrder::Asc, limit))
        .await?)
}

pub async fn stats(store: &dyn Store, today: NaiveDate) -> Result<PatientStats, ApiError> {
    let month_start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ApiError::Internal(format!("no month start for {today}")))?;

    let total = store.count_patients(&PatientFilter::default()).await?;
    let smokers = store
        .count_patients(&PatientFilter {
            is_smoker: Some(true),
            ..Default::default()
        })
        .await?;
    let with_allergies = store
        .count_patients(&PatientFilter {
            has_allergies: Some(true),
            ..Default::default()
        })
        .await?;
    let new_this_month = store
        .count_patients(&PatientFilter {
            created_from: Some(month_start),
            ..Default::default()
        })
        .await?;

    Ok(PatientStats {
        total,
        smokers,
        with_allergies,
        new_this_month,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{fixtures, invoices};
    use crate::store::memory::MemoryStore;

    fn req(first: &str, last: &str) -> CreatePatient {
        CreatePatient {
            first_name: first.into(),
            last_name: last.into(),
            phone: "+39 02 1234567".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn email_and_fiscal_code_must_be_unique() {
        let store = MemoryStore::new();
        let first = create(
            &store,
            CreatePatient {
                email: Some("giulia@example.it".into()),
                fiscal_code: Some("rssgli80a01h501u".into()),
                ..req("Giulia", "Rossi")
            },
        )
        .await
        .unwrap();
        assert_eq!(first.fiscal_code.as_deref(), Some("RSSGLI80A01H501U"));

        let err = create(
            &store,
            CreatePatient {
                email: Some("GIULIA@example.it".into()),
                ..req("Other", "Person")
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "EMAIL_TAKEN");

        let err = create(
            &store,
            CreatePatient {
                fiscal_code: Some("RSSGLI80A01H501U".into()),
                ..req("Other", "Person")
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "FISCAL_CODE_TAKEN");

        // re-saving the same patient is not a collision
        let same = update(
            &store,
            first.patient_id,
            UpdatePatient {
                email: Some(Some("giulia@example.it".into())),
                city: Some("Milano".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(same.city, "Milano");
    }

    #[tokio::test]
    async fn names_are_required_and_email_checked() {
        let store = MemoryStore::new();
        assert_eq!(create(&store, req(" ", "Rossi")).await.unwrap_err().code(), "VALIDATION_ERROR");
        let bad = CreatePatient {
            email: Some("not-an-email".into()),
            ..req("A", "B")
        };
        assert_eq!(create(&store, bad).await.unwrap_err().code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn delete_is_refused_while_invoices_exist() {
        let store = MemoryStore::new();
        let patient = fixtures::patient(&store, "Paolo", "Conti").await;
        invoices::create(
            &store,
            invoices::CreateInvoice {
                patient_id: patient.patient_id,
                invoice_number: None,
                issue_date: fixtures::date(2024, 1, 10),
                due_date: fixtures::date(2024, 2, 10),
                subtotal_cents: 10000,
                tax_rate: None,
                status: None,
                payment_method: None,
                payment_date: None,
                description: "Check-up".into(),
                notes: None,
            },
            22,
        )
        .await
        .unwrap();

        let err = delete(&store, patient.patient_id).await.unwrap_err();
        assert_eq!(err.code(), "HAS_INVOICES");

        let free = fixtures::patient(&store, "Sara", "Fabbri").await;
        delete(&store, free.patient_id).await.unwrap();
    }

    #[tokio::test]
    async fn search_and_stats() {
        let store = MemoryStore::new();
        create(
            &store,
            CreatePatient {
                is_smoker: true,
                allergies: Some("penicillin".into()),
                ..req("Marco", "Bruno")
            },
        )
        .await
        .unwrap();
        create(&store, req("Elena", "Bruni")).await.unwrap();
        create(&store, req("Carla", "Verdi")).await.unwrap();

        let found = search(&store, "brun", DEFAULT_SEARCH_LIMIT).await.unwrap();
        assert_eq!(found.iter().map(|p| p.last_name.as_str()).collect::<Vec<_>>(), vec!["Bruni", "Bruno"]);

        let today = chrono::Utc::now().date_naive();
        let s = stats(&store, today).await.unwrap();
        assert_eq!(s.total, 3);
        assert_eq!(s.smokers, 1);
        assert_eq!(s.with_allergies, 1);
        assert_eq!(s.new_this_month, 3);
    }
}
