use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::require_text;
use crate::error::ApiError;
use crate::models::{
    hhmm, NewReminder, Page, PageRequest, Reminder, ReminderFilter, ReminderSort, SortOrder,
};
use crate::store::{ListOptions, Store};

pub const DEFAULT_UPCOMING_LIMIT: i64 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateReminder {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub time: NaiveTime,
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateReminder {
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "hhmm::option::deserialize")]
    pub time: Option<NaiveTime>,
    pub title: Option<String>,
    pub text: Option<String>,
    pub completed: Option<bool>,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct ReminderStats {
    pub total: i64,
    pub completed: i64,
    pub pending: i64,
    pub today: i64,
    pub overdue: i64,
}

pub async fn list(
    store: &dyn Store,
    filter: &ReminderFilter,
    sort: ReminderSort,
    order: SortOrder,
    page: PageRequest,
) -> Result<Page<Reminder>, ApiError> {
    let total = store.count_reminders(filter).await?;
    let opts = ListOptions {
        sort,
        order,
        limit: Some(page.limit),
        offset: page.offset(),
    };
    let records = store.list_reminders(filter, &opts).await?;
    Ok(Page::new(records, total, page))
}

pub async fn get(store: &dyn Store, id: Uuid) -> Result<Reminder, ApiError> {
    store.get_reminder(id).await?.ok_or_else(|| ApiError::not_found("reminder"))
}

pub async fn create(store: &dyn Store, req: CreateReminder) -> Result<Reminder, ApiError> {
    let reminder = store
        .insert_reminder(&NewReminder {
            date: req.date,
            time: req.time,
            title: require_text("title", &req.title)?,
            text: req.text.trim().to_string(),
            completed: req.completed,
        })
        .await?;
    tracing::info!(reminder_id = %reminder.reminder_id, date = %reminder.date, "reminder created");
    Ok(reminder)
}

pub async fn update(store: &dyn Store, id: Uuid, req: UpdateReminder) -> Result<Reminder, ApiError> {
    let mut r = get(store, id).await?;
    if let Some(date) = req.date {
        r.date = date;
    }
    if let Some(time) = req.time {
        r.time = time;
    }
    if let Some(title) = req.title {
        r.title = require_text("title", &title)?;
    }
    if let Some(text) = req.text {
        r.text = text.trim().to_string();
    }
    if let Some(completed) = req.completed {
        r.completed = completed;
    }
    let updated = store
        .update_reminder(&r)
        .await?
        .ok_or_else(|| ApiError::not_found("reminder"))?;
    tracing::debug!(reminder_id = %id, "reminder updated");
    Ok(updated)
}

pub async fn toggle(store: &dyn Store, id: Uuid) -> Result<Reminder, ApiError> {
    let mut r = get(store, id).await?;
    r.completed = !r.completed;
    let updated = store
        .update_reminder(&r)
        .await?
        .ok_or_else(|| ApiError::not_found("reminder"))?;
    tracing::debug!(reminder_id = %id, completed = updated.completed, "reminder toggled");
    Ok(updated)
}

pub async fn delete(store: &dyn Store, id: Uuid) -> Result<(), ApiError> {
    if !store.delete_reminder(id).await? {
        return Err(ApiError::not_found("reminder"));
    }
    tracing::info!(reminder_id = %id, "reminder deleted");
    Ok(())
}

pub async fn on_date(store: &dyn Store, date: NaiveDate) -> Result<Vec<Reminder>, ApiError> {
    let filter = ReminderFilter {
        date: Some(date),
        ..Default::default()
    };
    Ok(store
        .list_reminders(&filter, &ListOptions::all(ReminderSort::Time, SortOrder::Asc))
        .await?)
}

/// Open reminders from today on, soonest first.
pub async fn upcoming(store: &dyn Store, today: NaiveDate, limit: i64) -> Result<Vec<Reminder>, ApiError> {
    let filter = ReminderFilter {
        date_from: Some(today),
        completed: Some(false),
        ..Default::default()
    };
    Ok(store
        .list_reminders(&filter, &ListOptions::first(ReminderSort::Date, SortOrder::Asc, limit))
        .await?)
}

/// Open reminders dated before today, newest first.
pub async fn overdue(store: &dyn Store, today: NaiveDate) -> Result<Vec<Reminder>, ApiError> {
    Ok(store
        .list_reminders(&overdue_filter(today), &ListOptions::all(ReminderSort::Date, SortOrder::Desc))
        .await?)
}

pub(crate) fn overdue_filter(today: NaiveDate) -> ReminderFilter {
    ReminderFilter {
        before: Some(today),
        completed: Some(false),
        ..Default::default()
    }
}

pub async fn stats(store: &dyn Store, today: NaiveDate) -> Result<ReminderStats, ApiError> {
    let total = store.count_reminders(&ReminderFilter::default()).await?;
    let completed = store
        .count_reminders(&ReminderFilter {
            completed: Some(true),
            ..Default::default()
        })
        .await?;
    let today_count = store
        .count_reminders(&ReminderFilter {
            date: Some(today),
            ..Default::default()
        })
        .await?;
    let overdue = store.count_reminders(&overdue_filter(today)).await?;
    Ok(ReminderStats {
        total,
        completed,
        pending: total - completed,
        today: today_count,
        overdue,
    })
}
