// src/routes/appointment_routes.rs

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
    models::{
        ApiOk, AppState, AppointmentDetails, AppointmentFilter, AppointmentSort, AppointmentStatus,
        Page, PageRequest, SortOrder,
    },
    services::appointments::{
        self, AppointmentStats, ConflictQuery, ConflictResult, CreateAppointment, UpdateAppointment,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/upcoming", get(upcoming_appointments))
        .route("/appointments/stats", get(appointment_stats))
        .route("/appointments/range", get(appointments_in_range))
        .route("/appointments/by_date/{date}", get(appointments_on_date))
        .route("/appointments/check_conflict", post(check_conflict))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment)
                .patch(update_appointment)
                .delete(cancel_appointment),
        )
        .route("/appointments/{appointment_id}/cancel", post(cancel_appointment))
        .route("/doctors/{doctor_id}/appointments", get(doctor_appointments))
        .route("/patients/{patient_id}/appointments", get(patient_appointments))
}

/* ============================================================
   Query params
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub treatment_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub search: Option<String>,
    #[serde(default)]
    pub sort: AppointmentSort,
    #[serde(default)]
    pub order: SortOrder,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub doctor_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

/* ============================================================
   Reads
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<Page<AppointmentDetails>>, ApiError> {
    let page = PageRequest::resolve(q.page, q.limit, state.default_page_limit);
    let filter = AppointmentFilter {
        patient_id: q.patient_id,
        doctor_id: q.doctor_id,
        treatment_id: q.treatment_id,
        statuses: q.status.into_iter().collect(),
        date_from: q.date_from,
        date_to: q.date_to,
        search: q.search.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        ..Default::default()
    };
    let out = appointments::list(state.store.as_ref(), &filter, q.sort, q.order, page).await?;
    Ok(Json(out))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDetails>>, ApiError> {
    let data = appointments::get(state.store.as_ref(), appointment_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn appointments_on_date(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(date): Path<NaiveDate>,
) -> Result<Json<ApiOk<Vec<AppointmentDetails>>>, ApiError> {
    let data = appointments::by_date(state.store.as_ref(), date).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn appointments_in_range(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<RangeQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentDetails>>>, ApiError> {
    let data = appointments::by_range(state.store.as_ref(), q.start, q.end, q.doctor_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn doctor_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<AppointmentDetails>>>, ApiError> {
    let data = appointments::by_doctor(state.store.as_ref(), doctor_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn patient_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<AppointmentDetails>>>, ApiError> {
    let data = appointments::by_patient(state.store.as_ref(), patient_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn upcoming_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<LimitQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentDetails>>>, ApiError> {
    let limit = q
        .limit
        .unwrap_or(appointments::DEFAULT_UPCOMING_LIMIT)
        .clamp(1, crate::models::MAX_PAGE_LIMIT);
    let data = appointments::upcoming(state.store.as_ref(), clinic_now(), limit).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn appointment_stats(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<AppointmentStats>>, ApiError> {
    let data = appointments::stats(state.store.as_ref(), clinic_now().date()).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   Writes
   ============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Json(req): Json<CreateAppointment>,
) -> Result<Json<ApiOk<AppointmentDetails>>, ApiError> {
    let data = appointments::create(state.store.as_ref(), req).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn update_appointment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<UpdateAppointment>,
) -> Result<Json<ApiOk<AppointmentDetails>>, ApiError> {
    let data = appointments::update(state.store.as_ref(), appointment_id, req).await?;
    Ok(Json(ApiOk { data }))
}

/// DELETE and POST .../cancel both cancel; the row is kept.
pub async fn cancel_appointment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDetails>>, ApiError> {
    let data = appointments::cancel(state.store.as_ref(), appointment_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn check_conflict(
    State(state): State<AppState>,
    _auth: AuthContext,
    Json(req): Json<ConflictQuery>,
) -> Result<Json<ApiOk<ConflictResult>>, ApiError> {
    let data = appointments::check_conflict(state.store.as_ref(), req).await?;
    Ok(Json(ApiOk { data }))
}
