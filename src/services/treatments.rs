use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{clean_opt, require_text, DeleteCheck};
use crate::error::ApiError;
use crate::models::{
    deserialize_double_option, AppointmentFilter, NewTreatment, Page, PageRequest, SortOrder,
    Treatment, TreatmentFilter, TreatmentSort,
};
use crate::store::{ListOptions, Store};

pub const DEFAULT_SEARCH_LIMIT: i64 = 10;
pub const DEFAULT_POPULAR_LIMIT: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTreatment {
    pub name: String,
    pub duration_min: i32,
    pub price_cents: i64,
    pub category: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTreatment {
    pub name: Option<String>,
    pub duration_min: Option<i32>,
    pub price_cents: Option<i64>,
    pub category: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub description: Option<Option<String>>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct TreatmentStats {
    pub total: i64,
    pub average_price_cents: i64,
    pub average_duration_min: i64,
    pub categories: BTreeMap<String, i64>,
}

#[derive(Debug, Serialize)]
pub struct PopularTreatment {
    #[serde(flatten)]
    pub treatment: Treatment,
    pub appointment_count: i64,
}

fn check_numbers(duration_min: i32, price_cents: i64) -> Result<(), ApiError> {
    if duration_min <= 0 {
        return Err(ApiError::validation("duration_min must be greater than zero"));
    }
    if price_cents < 0 {
        return Err(ApiError::validation("price_cents must not be negative"));
    }
    Ok(())
}

pub async fn list(
    store: &dyn Store,
    filter: &TreatmentFilter,
    sort: TreatmentSort,
    order: SortOrder,
    page: PageRequest,
) -> Result<Page<Treatment>, ApiError> {
    let total = store.count_treatments(filter).await?;
    let opts = ListOptions {
        sort,
        order,
        limit: Some(page.limit),
        offset: page.offset(),
    };
    let records = store.list_treatments(filter, &opts).await?;
    Ok(Page::new(records, total, page))
}

pub async fn get(store: &dyn Store, id: Uuid) -> Result<Treatment, ApiError> {
    store.get_treatment(id).await?.ok_or_else(|| ApiError::not_found("treatment"))
}

pub async fn create(store: &dyn Store, req: CreateTreatment) -> Result<Treatment, ApiError> {
    check_numbers(req.duration_min, req.price_cents)?;
    let new = NewTreatment {
        name: require_text("name", &req.name)?,
        duration_min: req.duration_min,
        price_cents: req.price_cents,
        category: require_text("category", &req.category)?,
        description: clean_opt(req.description),
    };
    let treatment = store.insert_treatment(&new).await?;
    tracing::info!(treatment_id = %treatment.treatment_id, name = %treatment.name, "treatment created");
    Ok(treatment)
}

/// Existing appointments keep the end time they were booked with.
pub async fn update(store: &dyn Store, id: Uuid, req: UpdateTreatment) -> Result<Treatment, ApiError> {
    let mut t = get(store, id).await?;

    if let Some(name) = req.name {
        t.name = require_text("name", &name)?;
    }
    if let Some(category) = req.category {
        t.category = require_text("category", &category)?;
    }
    if let Some(d) = req.duration_min {
        t.duration_min = d;
    }
    if let Some(p) = req.price_cents {
        t.price_cents = p;
    }
    if let Some(description) = req.description {
        t.description = clean_opt(description);
    }
    check_numbers(t.duration_min, t.price_cents)?;

    let updated = store
        .update_treatment(&t)
        .await?
        .ok_or_else(|| ApiError::not_found("treatment"))?;
    tracing::info!(treatment_id = %id, "treatment updated");
    Ok(updated)
}

pub async fn can_delete(store: &dyn Store, id: Uuid) -> Result<DeleteCheck, ApiError> {
    let filter = AppointmentFilter {
        treatment_id: Some(id),
        ..Default::default()
    };
    let count = store.count_appointments(&filter).await?;
    Ok(DeleteCheck::from_appointment_count("Treatment", count))
}

pub async fn delete(store: &dyn Store, id: Uuid) -> Result<(), ApiError> {
    get(store, id).await?;
    let check = can_delete(store, id).await?;
    if !check.can_delete {
        tracing::warn!(treatment_id = %id, appointments = check.appointment_count, "treatment delete refused");
        return Err(ApiError::Conflict(
            "HAS_APPOINTMENTS",
            check.reason.unwrap_or_default(),
        ));
    }
    if !store.delete_treatment(id).await? {
        return Err(ApiError::not_found("treatment"));
    }
    tracing::info!(treatment_id = %id, "treatment deleted");
    Ok(())
}

async fn all(store: &dyn Store, filter: &TreatmentFilter) -> Result<Vec<Treatment>, ApiError> {
    Ok(store
        .list_treatments(filter, &ListOptions::all(TreatmentSort::Name, SortOrder::Asc))
        .await?)
}

pub async fn categories(store: &dyn Store) -> Result<Vec<String>, ApiError> {
    let set: BTreeSet<String> = all(store, &TreatmentFilter::default())
        .await?
        .into_iter()
        .map(|t| t.category)
        .collect();
    Ok(set.into_iter().collect())
}

pub async fn by_category(store: &dyn Store, category: &str) -> Result<Vec<Treatment>, ApiError> {
    let filter = TreatmentFilter {
        category: Some(category.to_string()),
        ..Default::default()
    };
    all(store, &filter).await
}

pub async fn search(store: &dyn Store, query: &str, limit: i64) -> Result<Vec<Treatment>, ApiError> {
    let filter = TreatmentFilter {
        search: clean_opt(Some(query.to_string())),
        ..Default::default()
    };
    Ok(store
        .list_treatments(&filter, &ListOptions::first(TreatmentSort::Name, SortOrder::Asc, limit))
        .await?)
}

pub async fn stats(store: &dyn Store) -> Result<TreatmentStats, ApiError> {
    let treatments = all(store, &TreatmentFilter::default()).await?;
    let total = treatments.len() as i64;
    let mut categories = BTreeMap::new();
    for t in &treatments {
        *categories.entry(t.category.clone()).or_insert(0) += 1;
    }
    let (average_price_cents, average_duration_min) = if total == 0 {
        (0, 0)
    } else {
        let price: i64 = treatments.iter().map(|t| t.price_cents).sum();
        let duration: i64 = treatments.iter().map(|t| i64::from(t.duration_min)).sum();
        ((price + total / 2) / total, (duration + total / 2) / total)
    };
    Ok(TreatmentStats {
        total,
        average_price_cents,
        average_duration_min,
        categories,
    })
}

/// Treatments ranked by how many appointments reference them.
pub async fn popular(store: &dyn Store, limit: usize) -> Result<Vec<PopularTreatment>, ApiError> {
    let counts: HashMap<Uuid, i64> = store.appointment_counts_by_treatment().await?.into_iter().collect();
    let mut ranked: Vec<PopularTreatment> = all(store, &TreatmentFilter::default())
        .await?
        .into_iter()
        .filter_map(|treatment| {
            let appointment_count = counts.get(&treatment.treatment_id).copied()?;
            Some(PopularTreatment {
                treatment,
                appointment_count,
            })
        })
        .collect();
    // stable sort keeps name order among ties
    ranked.sort_by(|a, b| b.appointment_count.cmp(&a.appointment_count));
    ranked.truncate(limit);
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{appointments, fixtures};
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn rejects_non_positive_duration_and_negative_price() {
        let store = MemoryStore::new();
        let req = CreateTreatment {
            name: "Whitening".into(),
            duration_min: 0,
            price_cents: 1000,
            category: "Aesthetics".into(),
            description: None,
        };
        assert_eq!(create(&store, req.clone()).await.unwrap_err().code(), "VALIDATION_ERROR");

        let t = create(&store, CreateTreatment { duration_min: 45, ..req }).await.unwrap();
        let err = update(
            &store,
            t.treatment_id,
            UpdateTreatment {
                price_cents: Some(-1),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn categories_stats_and_search() {
        let store = MemoryStore::new();
        fixtures::treatment(&store, "Cleaning", "Hygiene", 30, 8000).await;
        fixtures::treatment(&store, "Sealant", "Hygiene", 20, 5000).await;
        fixtures::treatment(&store, "Implant", "Surgery", 90, 120000).await;

        assert_eq!(categories(&store).await.unwrap(), vec!["Hygiene", "Surgery"]);
        let hygiene = by_category(&store, "Hygiene").await.unwrap();
        assert_eq!(hygiene.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(), vec!["Cleaning", "Sealant"]);

        let s = stats(&store).await.unwrap();
        assert_eq!(s.total, 3);
        assert_eq!(s.average_price_cents, 44333);
        assert_eq!(s.average_duration_min, 47);
        assert_eq!(s.categories["Hygiene"], 2);

        let found = search(&store, "impl", DEFAULT_SEARCH_LIMIT).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Implant");
    }

    #[tokio::test]
    async fn popular_ranks_by_appointment_count_and_guards_delete() {
        let store = MemoryStore::new();
        let patient = fixtures::patient(&store, "Anna", "Russo").await;
        let doctor = fixtures::doctor(&store, "Dr. Moro", "General").await;
        let cleaning = fixtures::treatment(&store, "Cleaning", "Hygiene", 30, 8000).await;
        let filling = fixtures::treatment(&store, "Filling", "Restorative", 45, 9000).await;
        let unused = fixtures::treatment(&store, "Veneer", "Aesthetics", 60, 40000).await;

        for (hour, treatment) in [(9, &filling), (10, &cleaning), (11, &filling)] {
            appointments::create(
                &store,
                appointments::CreateAppointment {
                    patient_id: patient.patient_id,
                    doctor_id: doctor.doctor_id,
                    treatment_id: treatment.treatment_id,
                    date: fixtures::date(2024, 2, 12),
                    start_time: chrono::NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
                    end_time: None,
                    status: None,
                    notes: None,
                },
            )
            .await
            .unwrap();
        }

        let ranked = popular(&store, DEFAULT_POPULAR_LIMIT).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].treatment.name, "Filling");
        assert_eq!(ranked[0].appointment_count, 2);

        let err = delete(&store, filling.treatment_id).await.unwrap_err();
        assert_eq!(err.code(), "HAS_APPOINTMENTS");
        assert!(err.to_string().contains("Treatment has 2 associated appointments"));
        delete(&store, unused.treatment_id).await.unwrap();
    }
}
