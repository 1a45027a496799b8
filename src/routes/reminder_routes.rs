// src/routes/reminder_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use super::clinic_now;
use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Page, PageRequest, Reminder, ReminderFilter, ReminderSort, SortOrder, MAX_PAGE_LIMIT},
    services::reminders::{self, CreateReminder, ReminderStats, UpdateReminder},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/reminders", get(list_reminders).post(create_reminder))
        .route("/reminders/today", get(today_reminders))
        .route("/reminders/upcoming", get(upcoming_reminders))
        .route("/reminders/overdue", get(overdue_reminders))
        .route("/reminders/stats", get(reminder_stats))
        .route(
            "/reminders/{reminder_id}",
            get(get_reminder).patch(update_reminder).delete(delete_reminder),
        )
        .route("/reminders/{reminder_id}/toggle", post(toggle_reminder))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub date: Option<NaiveDate>,
    pub completed: Option<bool>,
    pub search: Option<String>,
    #[serde(default)]
    pub sort: ReminderSort,
    pub order: Option<SortOrder>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

pub async fn list_reminders(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<Page<Reminder>>, ApiError> {
    let page = PageRequest::resolve(q.page, q.limit, state.default_page_limit);
    let filter = ReminderFilter {
        date: q.date,
        completed: q.completed,
        search: q.search.filter(|s| !s.trim().is_empty()),
        ..Default::default()
    };
    let order = q.order.unwrap_or(SortOrder::Asc);
    Ok(Json(reminders::list(state.store.as_ref(), &filter, q.sort, order, page).await?))
}

pub async fn get_reminder(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(reminder_id): Path<Uuid>,
) -> Result<Json<ApiOk<Reminder>>, ApiError> {
    let data = reminders::get(state.store.as_ref(), reminder_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn create_reminder(
    State(state): State<AppState>,
    _auth: AuthContext,
    Json(req): Json<CreateReminder>,
) -> Result<Json<ApiOk<Reminder>>, ApiError> {
    let data = reminders::create(state.store.as_ref(), req).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn update_reminder(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(reminder_id): Path<Uuid>,
    Json(req): Json<UpdateReminder>,
) -> Result<Json<ApiOk<Reminder>>, ApiError> {
    let data = reminders::update(state.store.as_ref(), reminder_id, req).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn delete_reminder(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(reminder_id): Path<Uuid>,
) -> Result<Json<ApiOk<bool>>, ApiError> {
    reminders::delete(state.store.as_ref(), reminder_id).await?;
    Ok(Json(ApiOk { data: true }))
}

pub async fn toggle_reminder(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(reminder_id): Path<Uuid>,
) -> Result<Json<ApiOk<Reminder>>, ApiError> {
    let data = reminders::toggle(state.store.as_ref(), reminder_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn today_reminders(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<Reminder>>>, ApiError> {
    let data = reminders::on_date(state.store.as_ref(), clinic_now().date()).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn upcoming_reminders(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<LimitQuery>,
) -> Result<Json<ApiOk<Vec<Reminder>>>, ApiError> {
    let limit = q.limit.unwrap_or(reminders::DEFAULT_UPCOMING_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let data = reminders::upcoming(state.store.as_ref(), clinic_now().date(), limit).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn overdue_reminders(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<Reminder>>>, ApiError> {
    let data = reminders::overdue(state.store.as_ref(), clinic_now().date()).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn reminder_stats(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<ReminderStats>>, ApiError> {
    let data = reminders::stats(state.store.as_ref(), clinic_now().date()).await?;
    Ok(Json(ApiOk { data }))
}
