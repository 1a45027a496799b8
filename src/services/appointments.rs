use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::calendar::month_bounds;
use super::scheduling::{self, Slot};
use crate::error::ApiError;
use crate::models::{
    deserialize_double_option, hhmm, Appointment, AppointmentDetails, AppointmentFilter,
    AppointmentSort, AppointmentStatus, NewAppointment, Page, PageRequest, SortOrder, Treatment,
};
use crate::store::{ListOptions, Store};

pub const DEFAULT_UPCOMING_LIMIT: i64 = 5;

/* -------------------------
   Inputs
--------------------------*/

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointment {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub treatment_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    /// Derived from the treatment duration when omitted.
    #[serde(default, deserialize_with = "hhmm::option::deserialize")]
    pub end_time: Option<NaiveTime>,
    pub status: Option<AppointmentStatus>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAppointment {
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub treatment_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "hhmm::option::deserialize")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, deserialize_with = "hhmm::option::deserialize")]
    pub end_time: Option<NaiveTime>,
    pub status: Option<AppointmentStatus>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConflictQuery {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(default, deserialize_with = "hhmm::option::deserialize")]
    pub end_time: Option<NaiveTime>,
    /// Used to derive the end time when `end_time` is absent.
    pub treatment_id: Option<Uuid>,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ConflictResult {
    pub conflict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment: Option<Appointment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct AppointmentStats {
    pub total: i64,
    pub today: i64,
    pub this_week: i64,
    pub this_month: i64,
    pub by_status: BTreeMap<&'static str, i64>,
}

/* -------------------------
   Reads
--------------------------*/

pub async fn list(
    store: &dyn Store,
    filter: &AppointmentFilter,
    sort: AppointmentSort,
    order: SortOrder,
    page: PageRequest,
) -> Result<Page<AppointmentDetails>, ApiError> {
    let total = store.count_appointments(filter).await?;
    let opts = ListOptions {
        sort,
        order,
        limit: Some(page.limit),
        offset: page.offset(),
    };
    let records = store.list_appointments(filter, &opts).await?;
    Ok(Page::new(records, total, page))
}

pub async fn get(store: &dyn Store, id: Uuid) -> Result<AppointmentDetails, ApiError> {
    store
        .get_appointment(id)
        .await?
        .ok_or_else(|| ApiError::not_found("appointment"))
}

async fn list_all(
    store: &dyn Store,
    filter: AppointmentFilter,
    order: SortOrder,
) -> Result<Vec<AppointmentDetails>, ApiError> {
    Ok(store
        .list_appointments(&filter, &ListOptions::all(AppointmentSort::Date, order))
        .await?)
}

pub async fn by_date(store: &dyn Store, date: NaiveDate) -> Result<Vec<AppointmentDetails>, ApiError> {
    let filter = AppointmentFilter {
        date_from: Some(date),
        date_to: Some(date),
        ..Default::default()
    };
    list_all(store, filter, SortOrder::Asc).await
}

pub async fn by_patient(store: &dyn Store, patient_id: Uuid) -> Result<Vec<AppointmentDetails>, ApiError> {
    let filter = AppointmentFilter {
        patient_id: Some(patient_id),
        ..Default::default()
    };
    list_all(store, filter, SortOrder::Desc).await
}

pub async fn by_doctor(store: &dyn Store, doctor_id: Uuid) -> Result<Vec<AppointmentDetails>, ApiError> {
    let filter = AppointmentFilter {
        doctor_id: Some(doctor_id),
        ..Default::default()
    };
    list_all(store, filter, SortOrder::Desc).await
}

pub async fn by_range(
    store: &dyn Store,
    from: NaiveDate,
    to: NaiveDate,
    doctor_id: Option<Uuid>,
) -> Result<Vec<AppointmentDetails>, ApiError> {
    if to < from {
        return Err(ApiError::validation("end date must not be before start date"));
    }
    let filter = AppointmentFilter {
        doctor_id,
        date_from: Some(from),
        date_to: Some(to),
        ..Default::default()
    };
    list_all(store, filter, SortOrder::Asc).await
}

/// Confirmed or pending appointments starting at or after `now`, soonest first.
pub async fn upcoming(
    store: &dyn Store,
    now: NaiveDateTime,
    limit: i64,
) -> Result<Vec<AppointmentDetails>, ApiError> {
    let filter = AppointmentFilter {
        statuses: vec![AppointmentStatus::Confirmed, AppointmentStatus::Pending],
        starting_from: Some((now.date(), now.time())),
        ..Default::default()
    };
    Ok(store
        .list_appointments(&filter, &ListOptions::first(AppointmentSort::Date, SortOrder::Asc, limit))
        .await?)
}

pub async fn stats(store: &dyn Store, today: NaiveDate) -> Result<AppointmentStats, ApiError> {
    let count_between = |from: NaiveDate, to: NaiveDate| {
        let filter = AppointmentFilter {
            date_from: Some(from),
            date_to: Some(to),
            ..Default::default()
        };
        async move { store.count_appointments(&filter).await }
    };

    let week_start = today - Duration::days(i64::from(today.weekday().num_days_from_sunday()));
    let (month_first, month_last) = month_bounds(today.year(), today.month())?;

    let total = store.count_appointments(&AppointmentFilter::default()).await?;
    let today_count = count_between(today, today).await?;
    let this_week = count_between(week_start, week_start + Duration::days(6)).await?;
    let this_month = count_between(month_first, month_last).await?;

    let mut by_status = BTreeMap::new();
    for status in AppointmentStatus::ALL {
        let filter = AppointmentFilter {
            statuses: vec![status],
            ..Default::default()
        };
        by_status.insert(status.as_str(), store.count_appointments(&filter).await?);
    }

    Ok(AppointmentStats {
        total,
        today: today_count,
        this_week,
        this_month,
        by_status,
    })
}

/* -------------------------
   Writes
--------------------------*/

async fn require_treatment(store: &dyn Store, id: Uuid) -> Result<Treatment, ApiError> {
    store
        .get_treatment(id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("INVALID_REFERENCE", "treatment not found".into()))
}

async fn require_patient(store: &dyn Store, id: Uuid) -> Result<(), ApiError> {
    match store.get_patient(id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::BadRequest("INVALID_REFERENCE", "patient not found".into())),
    }
}

async fn require_doctor(store: &dyn Store, id: Uuid) -> Result<(), ApiError> {
    match store.get_doctor(id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::BadRequest("INVALID_REFERENCE", "doctor not found".into())),
    }
}

async fn resolve_slot(
    store: &dyn Store,
    start: NaiveTime,
    end: Option<NaiveTime>,
    treatment_id: Option<Uuid>,
) -> Result<Slot, ApiError> {
    let end = match (end, treatment_id) {
        (Some(end), _) => end,
        (None, Some(treatment_id)) => {
            let treatment = require_treatment(store, treatment_id).await?;
            scheduling::compute_end_time(start, treatment.duration_min)?
        }
        (None, None) => return Err(ApiError::validation("end_time or treatment_id is required")),
    };
    Slot::new(start, end)
}

pub async fn create(store: &dyn Store, req: CreateAppointment) -> Result<AppointmentDetails, ApiError> {
    require_patient(store, req.patient_id).await?;
    require_doctor(store, req.doctor_id).await?;
    let treatment = require_treatment(store, req.treatment_id).await?;

    let end = match req.end_time {
        Some(end) => end,
        None => scheduling::compute_end_time(req.start_time, treatment.duration_min)?,
    };
    let slot = Slot::new(req.start_time, end)?;

    scheduling::ensure_no_conflict(store, req.doctor_id, req.date, slot, None).await?;

    let created = store
        .insert_appointment(&NewAppointment {
            patient_id: req.patient_id,
            doctor_id: req.doctor_id,
            treatment_id: req.treatment_id,
            date: req.date,
            start_time: slot.start,
            end_time: slot.end,
            status: req.status.unwrap_or(AppointmentStatus::Pending),
            notes: super::clean_opt(req.notes),
        })
        .await?;

    tracing::info!(
        appointment_id = %created.appointment_id,
        doctor_id = %created.doctor_id,
        date = %created.date,
        start = %hhmm::format(&created.start_time),
        "appointment booked"
    );
    get(store, created.appointment_id).await
}

pub async fn update(store: &dyn Store, id: Uuid, req: UpdateAppointment) -> Result<AppointmentDetails, ApiError> {
    let existing = get(store, id).await?.appointment;
    let mut merged = existing.clone();

    if let Some(patient_id) = req.patient_id {
        if patient_id != existing.patient_id {
            require_patient(store, patient_id).await?;
        }
        merged.patient_id = patient_id;
    }
    if let Some(doctor_id) = req.doctor_id {
        if doctor_id != existing.doctor_id {
            require_doctor(store, doctor_id).await?;
        }
        merged.doctor_id = doctor_id;
    }
    let mut new_treatment = None;
    if let Some(treatment_id) = req.treatment_id {
        if treatment_id != existing.treatment_id {
            new_treatment = Some(require_treatment(store, treatment_id).await?);
        }
        merged.treatment_id = treatment_id;
    }
    if let Some(date) = req.date {
        merged.date = date;
    }
    if let Some(start) = req.start_time {
        merged.start_time = start;
    }
    if let Some(status) = req.status {
        merged.status = status;
    }
    if let Some(notes) = req.notes {
        merged.notes = super::clean_opt(notes);
    }

    let start_changed = merged.start_time != existing.start_time;
    merged.end_time = match (req.end_time, new_treatment) {
        (Some(end), _) => end,
        (None, Some(treatment)) => scheduling::compute_end_time(merged.start_time, treatment.duration_min)?,
        (None, None) if start_changed => {
            let treatment = require_treatment(store, merged.treatment_id).await?;
            scheduling::compute_end_time(merged.start_time, treatment.duration_min)?
        }
        (None, None) => existing.end_time,
    };
    let slot = Slot::new(merged.start_time, merged.end_time)?;

    let schedule_changed = merged.doctor_id != existing.doctor_id
        || merged.date != existing.date
        || Slot::of(&existing) != slot;
    let reactivated = existing.status == AppointmentStatus::Cancelled
        && merged.status != AppointmentStatus::Cancelled;
    if merged.status != AppointmentStatus::Cancelled && (schedule_changed || reactivated) {
        scheduling::ensure_no_conflict(store, merged.doctor_id, merged.date, slot, Some(id)).await?;
    }

    store
        .update_appointment(&merged)
        .await?
        .ok_or_else(|| ApiError::not_found("appointment"))?;
    tracing::info!(appointment_id = %id, status = merged.status.as_str(), "appointment updated");
    get(store, id).await
}

/// Marks the appointment cancelled. Rows are never physically removed.
pub async fn cancel(store: &dyn Store, id: Uuid) -> Result<AppointmentDetails, ApiError> {
    let mut appt = get(store, id).await?.appointment;
    if appt.status != AppointmentStatus::Cancelled {
        appt.status = AppointmentStatus::Cancelled;
        store
            .update_appointment(&appt)
            .await?
            .ok_or_else(|| ApiError::not_found("appointment"))?;
        tracing::info!(appointment_id = %id, "appointment cancelled");
    }
    get(store, id).await
}

pub async fn check_conflict(store: &dyn Store, q: ConflictQuery) -> Result<ConflictResult, ApiError> {
    let slot = resolve_slot(store, q.start_time, q.end_time, q.treatment_id).await?;
    let found = scheduling::find_conflict(store, q.doctor_id, q.date, slot, q.exclude_appointment_id).await?;
    Ok(match found {
        Some(existing) => ConflictResult {
            conflict: true,
            message: Some(scheduling::conflict_error(&existing).to_string()),
            appointment: Some(existing),
        },
        None => ConflictResult {
            conflict: false,
            appointment: None,
            message: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures;
    use crate::store::memory::MemoryStore;

    struct Clinic {
        store: MemoryStore,
        patient: Uuid,
        doctor: Uuid,
        cleaning: Uuid,
        implant: Uuid,
    }

    async fn clinic() -> Clinic {
        let store = MemoryStore::new();
        let patient = fixtures::patient(&store, "Maria", "Rossi").await.patient_id;
        let doctor = fixtures::doctor(&store, "Dr. Bianchi", "Orthodontics").await.doctor_id;
        let cleaning = fixtures::treatment(&store, "Cleaning", "Hygiene", 30, 8000).await.treatment_id;
        let implant = fixtures::treatment(&store, "Implant", "Surgery", 90, 120000).await.treatment_id;
        Clinic {
            store,
            patient,
            doctor,
            cleaning,
            implant,
        }
    }

    fn t(s: &str) -> NaiveTime {
        hhmm::parse(s).unwrap()
    }

    fn booking(c: &Clinic, date: NaiveDate, start: &str) -> CreateAppointment {
        CreateAppointment {
            patient_id: c.patient,
            doctor_id: c.doctor,
            treatment_id: c.cleaning,
            date,
            start_time: t(start),
            end_time: None,
            status: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn create_derives_end_time_and_defaults_to_pending() {
        let c = clinic().await;
        let mut req = booking(&c, fixtures::date(2024, 5, 6), "09:40");
        req.treatment_id = c.implant;

        let created = create(&c.store, req).await.unwrap();
        assert_eq!(created.appointment.end_time, t("11:10"));
        assert_eq!(created.appointment.status, AppointmentStatus::Pending);
        assert_eq!(created.patient.unwrap().display, "Maria Rossi");
        assert_eq!(created.treatment.unwrap().duration_min, 90);
    }

    #[tokio::test]
    async fn overlapping_booking_is_rejected_and_adjacent_accepted() {
        let c = clinic().await;
        let day = fixtures::date(2024, 5, 6);
        create(&c.store, booking(&c, day, "10:00")).await.unwrap();

        let err = create(&c.store, booking(&c, day, "10:15")).await.unwrap_err();
        assert_eq!(err.code(), "TIME_CONFLICT");
        assert!(err.to_string().contains("from 10:00 to 10:30"));

        let next = create(&c.store, booking(&c, day, "10:30")).await.unwrap();
        assert_eq!(next.appointment.end_time, t("11:00"));
    }

    #[tokio::test]
    async fn other_doctors_and_days_do_not_conflict() {
        let c = clinic().await;
        let day = fixtures::date(2024, 5, 6);
        create(&c.store, booking(&c, day, "10:00")).await.unwrap();

        let other = fixtures::doctor(&c.store, "Dr. Verdi", "Surgery").await.doctor_id;
        let mut req = booking(&c, day, "10:00");
        req.doctor_id = other;
        assert!(create(&c.store, req).await.is_ok());

        assert!(create(&c.store, booking(&c, fixtures::date(2024, 5, 7), "10:00")).await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_appointments_free_the_slot() {
        let c = clinic().await;
        let day = fixtures::date(2024, 5, 6);
        let first = create(&c.store, booking(&c, day, "10:00")).await.unwrap();

        let cancelled = cancel(&c.store, first.appointment.appointment_id).await.unwrap();
        assert_eq!(cancelled.appointment.status, AppointmentStatus::Cancelled);
        assert!(create(&c.store, booking(&c, day, "10:00")).await.is_ok());

        // the cancelled row is still there
        assert!(get(&c.store, first.appointment.appointment_id).await.is_ok());
    }

    #[tokio::test]
    async fn updating_an_appointment_does_not_conflict_with_itself() {
        let c = clinic().await;
        let day = fixtures::date(2024, 5, 6);
        let appt = create(&c.store, booking(&c, day, "10:00")).await.unwrap();
        let id = appt.appointment.appointment_id;

        let moved = update(
            &c.store,
            id,
            UpdateAppointment {
                start_time: Some(t("10:15")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(moved.appointment.start_time, t("10:15"));
        assert_eq!(moved.appointment.end_time, t("10:45"));
    }

    #[tokio::test]
    async fn changing_treatment_recomputes_end_and_rechecks_conflicts() {
        let c = clinic().await;
        let day = fixtures::date(2024, 5, 6);
        let first = create(&c.store, booking(&c, day, "09:00")).await.unwrap();
        create(&c.store, booking(&c, day, "10:00")).await.unwrap();

        let err = update(
            &c.store,
            first.appointment.appointment_id,
            UpdateAppointment {
                treatment_id: Some(c.implant),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "TIME_CONFLICT");

        let updated = update(
            &c.store,
            first.appointment.appointment_id,
            UpdateAppointment {
                treatment_id: Some(c.implant),
                start_time: Some(t("07:30")),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.appointment.end_time, t("09:00"));
    }

    #[tokio::test]
    async fn unknown_references_and_bad_intervals_are_rejected() {
        let c = clinic().await;
        let day = fixtures::date(2024, 5, 6);

        let mut req = booking(&c, day, "10:00");
        req.patient_id = Uuid::new_v4();
        assert_eq!(create(&c.store, req).await.unwrap_err().code(), "INVALID_REFERENCE");

        let mut req = booking(&c, day, "10:00");
        req.end_time = Some(t("09:00"));
        assert_eq!(create(&c.store, req).await.unwrap_err().code(), "VALIDATION_ERROR");

        let missing = get(&c.store, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(missing.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn check_conflict_reports_without_writing() {
        let c = clinic().await;
        let day = fixtures::date(2024, 5, 6);
        let existing = create(&c.store, booking(&c, day, "10:00")).await.unwrap();

        let q = ConflictQuery {
            doctor_id: c.doctor,
            date: day,
            start_time: t("10:10"),
            end_time: None,
            treatment_id: Some(c.cleaning),
            exclude_appointment_id: None,
        };
        let res = check_conflict(&c.store, q.clone()).await.unwrap();
        assert!(res.conflict);
        assert_eq!(
            res.appointment.unwrap().appointment_id,
            existing.appointment.appointment_id
        );

        let res = check_conflict(
            &c.store,
            ConflictQuery {
                exclude_appointment_id: Some(existing.appointment.appointment_id),
                ..q
            },
        )
        .await
        .unwrap();
        assert!(!res.conflict);
    }

    #[tokio::test]
    async fn upcoming_skips_past_and_cancelled() {
        let c = clinic().await;
        let day = fixtures::date(2024, 5, 6);
        create(&c.store, booking(&c, day, "08:00")).await.unwrap();
        let later = create(&c.store, booking(&c, day, "15:00")).await.unwrap();
        let tomorrow = create(&c.store, booking(&c, fixtures::date(2024, 5, 7), "09:00")).await.unwrap();
        cancel(&c.store, tomorrow.appointment.appointment_id).await.unwrap();
        create(&c.store, booking(&c, fixtures::date(2024, 5, 8), "09:00")).await.unwrap();

        let now = day.and_time(t("12:00"));
        let next = upcoming(&c.store, now, DEFAULT_UPCOMING_LIMIT).await.unwrap();
        assert_eq!(next.len(), 2);
        assert_eq!(next[0].appointment.appointment_id, later.appointment.appointment_id);
        assert_eq!(next[1].appointment.date, fixtures::date(2024, 5, 8));
    }

    #[tokio::test]
    async fn stats_count_windows_and_statuses() {
        let c = clinic().await;
        // Wednesday
        let today = fixtures::date(2024, 5, 8);
        create(&c.store, booking(&c, today, "09:00")).await.unwrap();
        create(&c.store, booking(&c, fixtures::date(2024, 5, 5), "09:00")).await.unwrap();
        create(&c.store, booking(&c, fixtures::date(2024, 5, 20), "09:00")).await.unwrap();
        let old = create(&c.store, booking(&c, fixtures::date(2024, 4, 30), "09:00")).await.unwrap();
        cancel(&c.store, old.appointment.appointment_id).await.unwrap();

        let s = stats(&c.store, today).await.unwrap();
        assert_eq!(s.total, 4);
        assert_eq!(s.today, 1);
        assert_eq!(s.this_week, 2);
        assert_eq!(s.this_month, 3);
        assert_eq!(s.by_status["pending"], 3);
        assert_eq!(s.by_status["cancelled"], 1);
        assert_eq!(s.by_status["completed"], 0);
    }

    #[tokio::test]
    async fn status_sort_breaks_ties_by_date_in_the_same_direction() {
        let c = clinic().await;
        let late = create(&c.store, booking(&c, fixtures::date(2024, 5, 8), "09:00")).await.unwrap();
        let early = create(&c.store, booking(&c, fixtures::date(2024, 5, 6), "09:00")).await.unwrap();
        let dropped = create(&c.store, booking(&c, fixtures::date(2024, 5, 7), "09:00")).await.unwrap();
        cancel(&c.store, dropped.appointment.appointment_id).await.unwrap();

        let ids = |page: Page<AppointmentDetails>| {
            page.records
                .into_iter()
                .map(|d| d.appointment.appointment_id)
                .collect::<Vec<_>>()
        };
        let req = PageRequest::resolve(None, None, 20);
        let filter = AppointmentFilter::default();

        let asc = list(&c.store, &filter, AppointmentSort::Status, SortOrder::Asc, req).await.unwrap();
        assert_eq!(
            ids(asc),
            vec![
                early.appointment.appointment_id,
                late.appointment.appointment_id,
                dropped.appointment.appointment_id,
            ]
        );

        let desc = list(&c.store, &filter, AppointmentSort::Status, SortOrder::Desc, req).await.unwrap();
        assert_eq!(
            ids(desc),
            vec![
                dropped.appointment.appointment_id,
                late.appointment.appointment_id,
                early.appointment.appointment_id,
            ]
        );
    }
}
