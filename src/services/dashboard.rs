use chrono::NaiveDateTime;
use serde::Serialize;

use super::{appointments, reminders};
use crate::error::ApiError;
use crate::models::{AppointmentDetails, Reminder};
use crate::store::Store;

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub upcoming_appointments: Vec<AppointmentDetails>,
    pub today_reminders: Vec<Reminder>,
    pub overdue_reminders: i64,
}

pub async fn load(store: &dyn Store, now: NaiveDateTime) -> Result<Dashboard, ApiError> {
    let today = now.date();
    let upcoming_appointments = appointments::upcoming(store, now, appointments::DEFAULT_UPCOMING_LIMIT).await?;
    let today_reminders = reminders::on_date(store, today).await?;
    let overdue_reminders = store.count_reminders(&reminders::overdue_filter(today)).await?;
    Ok(Dashboard {
        upcoming_appointments,
        today_reminders,
        overdue_reminders,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::date;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn empty_clinic_has_an_empty_dashboard() {
        let store = MemoryStore::new();
        let now = date(2024, 1, 1).and_hms_opt(9, 0, 0).unwrap();
        let d = load(&store, now).await.unwrap();
        assert!(d.upcoming_appointments.is_empty());
        assert!(d.today_reminders.is_empty());
        assert_eq!(d.overdue_reminders, 0);
    }
}
