// src/routes/patient_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::clinic_now;
use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{
        ApiOk, AppState, Page, PageRequest, Patient, PatientFilter, PatientSort, SortOrder,
        MAX_PAGE_LIMIT,
    },
    services::patients::{self, CreatePatient, PatientStats, UpdatePatient},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/patients", get(list_patients).post(create_patient))
        .route("/patients/search", get(search_patients))
        .route("/patients/stats", get(patient_stats))
        .route(
            "/patients/{patient_id}",
            get(get_patient).patch(update_patient).delete(delete_patient),
        )
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub city: Option<String>,
    pub is_smoker: Option<bool>,
    pub has_allergies: Option<bool>,
    #[serde(default)]
    pub sort: PatientSort,
    pub order: Option<SortOrder>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_patients(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<Page<Patient>>, ApiError> {
    let page = PageRequest::resolve(q.page, q.limit, state.default_page_limit);
    let filter = PatientFilter {
        search: q.search.filter(|s| !s.trim().is_empty()),
        city: q.city.filter(|s| !s.trim().is_empty()),
        is_smoker: q.is_smoker,
        has_allergies: q.has_allergies,
        ..Default::default()
    };
    let order = q.order.unwrap_or(SortOrder::Asc);
    Ok(Json(patients::list(state.store.as_ref(), &filter, q.sort, order, page).await?))
}

pub async fn get_patient(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Patient>>, ApiError> {
    let data = patients::get(state.store.as_ref(), patient_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn create_patient(
    State(state): State<AppState>,
    _auth: AuthContext,
    Json(req): Json<CreatePatient>,
) -> Result<Json<ApiOk<Patient>>, ApiError> {
    let data = patients::create(state.store.as_ref(), req).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn update_patient(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(patient_id): Path<Uuid>,
    Json(req): Json<UpdatePatient>,
) -> Result<Json<ApiOk<Patient>>, ApiError> {
    let data = patients::update(state.store.as_ref(), patient_id, req).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<bool>>, ApiError> {
    patients::delete(state.store.as_ref(), patient_id).await?;
    Ok(Json(ApiOk { data: true }))
}

pub async fn search_patients(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<ApiOk<Vec<Patient>>>, ApiError> {
    let limit = q.limit.unwrap_or(patients::DEFAULT_SEARCH_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let data = patients::search(state.store.as_ref(), q.query.as_deref().unwrap_or_default(), limit).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn patient_stats(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<PatientStats>>, ApiError> {
    let data = patients::stats(state.store.as_ref(), clinic_now().date()).await?;
    Ok(Json(ApiOk { data }))
}
