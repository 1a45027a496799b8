use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{clean_opt, require_text, DeleteCheck};
use crate::error::ApiError;
use crate::models::{
    deserialize_double_option, AppointmentFilter, Doctor, DoctorFilter, DoctorSort, NewDoctor, Page,
    PageRequest, SortOrder,
};
use crate::store::{ListOptions, Store};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDoctor {
    pub name: String,
    pub specialization: String,
    pub color: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDoctor {
    pub name: Option<String>,
    pub specialization: Option<String>,
    pub color: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct DoctorStats {
    pub total: i64,
    pub specializations: BTreeMap<String, i64>,
}

/// `#RRGGBB`, normalised to upper case.
pub fn validate_color(color: &str) -> Result<String, ApiError> {
    let c = color.trim();
    let ok = c.len() == 7
        && c.starts_with('#')
        && c[1..].chars().all(|ch| ch.is_ascii_hexdigit());
    if !ok {
        return Err(ApiError::validation(format!("color `{c}` must look like #RRGGBB")));
    }
    Ok(c.to_ascii_uppercase())
}

pub async fn list(
    store: &dyn Store,
    filter: &DoctorFilter,
    sort: DoctorSort,
    order: SortOrder,
    page: PageRequest,
) -> Result<Page<Doctor>, ApiError> {
    let total = store.count_doctors(filter).await?;
    let opts = ListOptions {
        sort,
        order,
        limit: Some(page.limit),
        offset: page.offset(),
    };
    let records = store.list_doctors(filter, &opts).await?;
    Ok(Page::new(records, total, page))
}

pub async fn get(store: &dyn Store, id: Uuid) -> Result<Doctor, ApiError> {
    store.get_doctor(id).await?.ok_or_else(|| ApiError::not_found("doctor"))
}

pub async fn create(store: &dyn Store, req: CreateDoctor) -> Result<Doctor, ApiError> {
    let new = NewDoctor {
        name: require_text("name", &req.name)?,
        specialization: require_text("specialization", &req.specialization)?,
        color: validate_color(&req.color)?,
        email: clean_opt(req.email),
        phone: clean_opt(req.phone),
    };
    let doctor = store.insert_doctor(&new).await?;
    tracing::info!(doctor_id = %doctor.doctor_id, name = %doctor.name, "doctor created");
    Ok(doctor)
}

pub async fn update(store: &dyn Store, id: Uuid, req: UpdateDoctor) -> Result<Doctor, ApiError> {
    let mut doctor = get(store, id).await?;

    if let Some(name) = req.name {
        doctor.name = require_text("name", &name)?;
    }
    if let Some(specialization) = req.specialization {
        doctor.specialization = require_text("specialization", &specialization)?;
    }
    if let Some(color) = req.color {
        doctor.color = validate_color(&color)?;
    }
    if let Some(email) = req.email {
        doctor.email = clean_opt(email);
    }
    if let Some(phone) = req.phone {
        doctor.phone = clean_opt(phone);
    }

    let updated = store
        .update_doctor(&doctor)
        .await?
        .ok_or_else(|| ApiError::not_found("doctor"))?;
    tracing::info!(doctor_id = %id, "doctor updated");
    Ok(updated)
}

pub async fn can_delete(store: &dyn Store, id: Uuid) -> Result<DeleteCheck, ApiError> {
    let filter = AppointmentFilter {
        doctor_id: Some(id),
        ..Default::default()
    };
    let count = store.count_appointments(&filter).await?;
    Ok(DeleteCheck::from_appointment_count("Doctor", count))
}

pub async fn delete(store: &dyn Store, id: Uuid) -> Result<(), ApiError> {
    get(store, id).await?;
    let check = can_delete(store, id).await?;
    if !check.can_delete {
        tracing::warn!(doctor_id = %id, appointments = check.appointment_count, "doctor delete refused");
        return Err(ApiError::Conflict(
            "HAS_APPOINTMENTS",
            check.reason.unwrap_or_default(),
        ));
    }
    if !store.delete_doctor(id).await? {
        return Err(ApiError::not_found("doctor"));
    }
    tracing::info!(doctor_id = %id, "doctor deleted");
    Ok(())
}

async fn all(store: &dyn Store) -> Result<Vec<Doctor>, ApiError> {
    Ok(store
        .list_doctors(&DoctorFilter::default(), &ListOptions::all(DoctorSort::Name, SortOrder::Asc))
        .await?)
}

pub async fn specializations(store: &dyn Store) -> Result<Vec<String>, ApiError> {
    let set: BTreeSet<String> = all(store).await?.into_iter().map(|d| d.specialization).collect();
    Ok(set.into_iter().collect())
}

pub async fn stats(store: &dyn Store) -> Result<DoctorStats, ApiError> {
    let doctors = all(store).await?;
    let mut specializations = BTreeMap::new();
    for d in &doctors {
        *specializations.entry(d.specialization.clone()).or_insert(0) += 1;
    }
    Ok(DoctorStats {
        total: doctors.len() as i64,
        specializations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{appointments, fixtures};
    use crate::store::memory::MemoryStore;

    #[test]
    fn color_must_be_six_hex_digits() {
        assert_eq!(validate_color("#a1b2c3").unwrap(), "#A1B2C3");
        assert!(validate_color("a1b2c3").is_err());
        assert!(validate_color("#abc").is_err());
        assert!(validate_color("#GGGGGG").is_err());
    }

    #[tokio::test]
    async fn create_and_patch_doctor() {
        let store = MemoryStore::new();
        let doctor = create(
            &store,
            CreateDoctor {
                name: " Dr. Neri ".into(),
                specialization: "Endodontics".into(),
                color: "#00aa00".into(),
                email: Some("neri@clinic.it".into()),
                phone: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(doctor.name, "Dr. Neri");
        assert_eq!(doctor.color, "#00AA00");

        let updated = update(
            &store,
            doctor.doctor_id,
            UpdateDoctor {
                email: Some(None),
                specialization: Some("Surgery".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.email, None);
        assert_eq!(updated.specialization, "Surgery");
        assert_eq!(updated.name, "Dr. Neri");
    }

    #[tokio::test]
    async fn delete_is_refused_while_appointments_reference_the_doctor() {
        let store = MemoryStore::new();
        let patient = fixtures::patient(&store, "Luca", "Ferri").await;
        let doctor = fixtures::doctor(&store, "Dr. Gallo", "Hygiene").await;
        let treatment = fixtures::treatment(&store, "Cleaning", "Hygiene", 30, 8000).await;
        appointments::create(
            &store,
            appointments::CreateAppointment {
                patient_id: patient.patient_id,
                doctor_id: doctor.doctor_id,
                treatment_id: treatment.treatment_id,
                date: fixtures::date(2024, 3, 1),
                start_time: chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end_time: None,
                status: None,
                notes: None,
            },
        )
        .await
        .unwrap();

        let check = can_delete(&store, doctor.doctor_id).await.unwrap();
        assert!(!check.can_delete);
        assert_eq!(check.appointment_count, 1);

        let err = delete(&store, doctor.doctor_id).await.unwrap_err();
        assert_eq!(err.code(), "HAS_APPOINTMENTS");
        assert!(err.to_string().contains("Doctor has 1 associated appointments"));

        let free = fixtures::doctor(&store, "Dr. Costa", "Surgery").await;
        delete(&store, free.doctor_id).await.unwrap();
        assert_eq!(get(&store, free.doctor_id).await.unwrap_err().code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn specializations_are_distinct_and_counted() {
        let store = MemoryStore::new();
        fixtures::doctor(&store, "A", "Surgery").await;
        fixtures::doctor(&store, "B", "Hygiene").await;
        fixtures::doctor(&store, "C", "Surgery").await;

        assert_eq!(specializations(&store).await.unwrap(), vec!["Hygiene", "Surgery"]);
        let s = stats(&store).await.unwrap();
        assert_eq!(s.total, 3);
        assert_eq!(s.specializations["Surgery"], 2);
    }
}
