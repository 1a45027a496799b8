//! Time-of-day arithmetic and doctor double-booking detection.

use chrono::{Duration, NaiveDate, NaiveTime};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{hhmm, Appointment, AppointmentFilter, AppointmentSort, AppointmentStatus, SortOrder};
use crate::store::{ListOptions, Store};

/// A same-day time interval. Callers guarantee `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Slot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, ApiError> {
        if end <= start {
            return Err(ApiError::validation("end_time must be after start_time"));
        }
        Ok(Slot { start, end })
    }

    pub fn of(appt: &Appointment) -> Self {
        Slot {
            start: appt.start_time,
            end: appt.end_time,
        }
    }
}

/// Start plus the treatment duration. Appointments may not run past midnight.
pub fn compute_end_time(start: NaiveTime, duration_min: i32) -> Result<NaiveTime, ApiError> {
    if duration_min <= 0 {
        return Err(ApiError::validation("treatment duration must be positive"));
    }
    let (end, wrapped_secs) = start.overflowing_add_signed(Duration::minutes(i64::from(duration_min)));
    if wrapped_secs != 0 {
        return Err(ApiError::validation(format!(
            "a {duration_min} minute treatment starting at {} would end after midnight",
            hhmm::format(&start)
        )));
    }
    Ok(end)
}

/// Start inside `[s, e)`, end inside `(s, e]`, or the proposal covers the
/// existing slot entirely. Equivalent to `p.start < e.end && e.start < p.end`.
pub fn intervals_overlap(proposed: Slot, existing: Slot) -> bool {
    (proposed.start >= existing.start && proposed.start < existing.end)
        || (proposed.end > existing.start && proposed.end <= existing.end)
        || (proposed.start <= existing.start && proposed.end >= existing.end)
}

/// First non-cancelled appointment of `doctor_id` on `date` overlapping `slot`.
pub async fn find_conflict(
    store: &dyn Store,
    doctor_id: Uuid,
    date: NaiveDate,
    slot: Slot,
    exclude_appointment_id: Option<Uuid>,
) -> Result<Option<Appointment>, ApiError> {
    let filter = AppointmentFilter {
        doctor_id: Some(doctor_id),
        date_from: Some(date),
        date_to: Some(date),
        exclude_status: Some(AppointmentStatus::Cancelled),
        exclude_id: exclude_appointment_id,
        ..Default::default()
    };
    let candidates = store
        .list_appointments(&filter, &ListOptions::all(AppointmentSort::StartTime, SortOrder::Asc))
        .await?;

    Ok(candidates
        .into_iter()
        .map(|d| d.appointment)
        .find(|existing| intervals_overlap(slot, Slot::of(existing))))
}

pub fn conflict_error(existing: &Appointment) -> ApiError {
    ApiError::Conflict(
        "TIME_CONFLICT",
        format!(
            "Doctor already has an appointment from {} to {}",
            hhmm::format(&existing.start_time),
            hhmm::format(&existing.end_time)
        ),
    )
}

pub async fn ensure_no_conflict(
    store: &dyn Store,
    doctor_id: Uuid,
    date: NaiveDate,
    slot: Slot,
    exclude_appointment_id: Option<Uuid>,
) -> Result<(), ApiError> {
    match find_conflict(store, doctor_id, date, slot, exclude_appointment_id).await? {
        Some(existing) => {
            tracing::warn!(
                %doctor_id,
                %date,
                conflicting = %existing.appointment_id,
                "rejected double booking"
            );
            Err(conflict_error(&existing))
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        hhmm::parse(s).unwrap()
    }

    fn slot(a: &str, b: &str) -> Slot {
        Slot::new(t(a), t(b)).unwrap()
    }

    #[test]
    fn end_time_adds_treatment_duration() {
        assert_eq!(compute_end_time(t("09:00"), 30).unwrap(), t("09:30"));
        assert_eq!(compute_end_time(t("09:40"), 90).unwrap(), t("11:10"));
        assert_eq!(compute_end_time(t("23:00"), 59).unwrap(), t("23:59"));
    }

    #[test]
    fn end_time_rejects_midnight_rollover_and_bad_durations() {
        assert!(compute_end_time(t("23:30"), 30).is_err());
        assert!(compute_end_time(t("22:00"), 180).is_err());
        assert!(compute_end_time(t("09:00"), 0).is_err());
        assert!(compute_end_time(t("09:00"), -15).is_err());
    }

    #[test]
    fn slot_requires_start_before_end() {
        assert!(Slot::new(t("10:00"), t("10:00")).is_err());
        assert!(Slot::new(t("10:30"), t("10:00")).is_err());
    }

    #[test]
    fn adjacent_slots_do_not_overlap() {
        let existing = slot("10:00", "10:30");
        assert!(!intervals_overlap(slot("10:30", "11:00"), existing));
        assert!(!intervals_overlap(slot("09:30", "10:00"), existing));
    }

    #[test]
    fn partial_and_containing_slots_overlap() {
        let existing = slot("10:00", "10:30");
        assert!(intervals_overlap(slot("10:15", "10:45"), existing));
        assert!(intervals_overlap(slot("09:45", "10:15"), existing));
        assert!(intervals_overlap(slot("09:00", "11:00"), existing));
        assert!(intervals_overlap(slot("10:05", "10:25"), existing));
        assert!(intervals_overlap(slot("10:00", "10:30"), existing));
    }

    #[test]
    fn overlap_matches_half_open_disjointness_on_quarter_hours() {
        let times: Vec<NaiveTime> = (0..=12)
            .map(|q| NaiveTime::from_hms_opt(8 + q / 4, (q % 4) * 15, 0).unwrap())
            .collect();
        for &s in &times {
            for &e in times.iter().filter(|e| **e > s) {
                for &s2 in &times {
                    for &e2 in times.iter().filter(|e2| **e2 > s2) {
                        let existing = Slot { start: s, end: e };
                        let proposed = Slot { start: s2, end: e2 };
                        assert_eq!(
                            intervals_overlap(proposed, existing),
                            s2 < e && s < e2,
                            "{s}-{e} vs {s2}-{e2}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn conflict_message_names_the_colliding_interval() {
        let existing = Appointment {
            appointment_id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            treatment_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            start_time: t("10:00"),
            end_time: t("10:30"),
            status: AppointmentStatus::Confirmed,
            notes: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let err = conflict_error(&existing);
        assert_eq!(err.code(), "TIME_CONFLICT");
        assert!(err.to_string().contains("from 10:00 to 10:30"));
    }
}
