// src/routes/doctor_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, Doctor, DoctorFilter, DoctorSort, Page, PageRequest, SortOrder},
    services::{
        doctors::{self, CreateDoctor, DoctorStats, UpdateDoctor},
        DeleteCheck,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/doctors", get(list_doctors).post(create_doctor))
        .route("/doctors/specializations", get(list_specializations))
        .route("/doctors/stats", get(doctor_stats))
        .route(
            "/doctors/{doctor_id}",
            get(get_doctor).patch(update_doctor).delete(delete_doctor),
        )
        .route("/doctors/{doctor_id}/can_delete", get(can_delete_doctor))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub specialization: Option<String>,
    #[serde(default)]
    pub sort: DoctorSort,
    pub order: Option<SortOrder>,
}

pub async fn list_doctors(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<Page<Doctor>>, ApiError> {
    let page = PageRequest::resolve(q.page, q.limit, state.default_page_limit);
    let filter = DoctorFilter {
        search: q.search.filter(|s| !s.trim().is_empty()),
        specialization: q.specialization.filter(|s| !s.trim().is_empty()),
    };
    let order = q.order.unwrap_or(SortOrder::Asc);
    Ok(Json(doctors::list(state.store.as_ref(), &filter, q.sort, order, page).await?))
}

pub async fn get_doctor(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<Doctor>>, ApiError> {
    let data = doctors::get(state.store.as_ref(), doctor_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn create_doctor(
    State(state): State<AppState>,
    _auth: AuthContext,
    Json(req): Json<CreateDoctor>,
) -> Result<Json<ApiOk<Doctor>>, ApiError> {
    let data = doctors::create(state.store.as_ref(), req).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn update_doctor(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(doctor_id): Path<Uuid>,
    Json(req): Json<UpdateDoctor>,
) -> Result<Json<ApiOk<Doctor>>, ApiError> {
    let data = doctors::update(state.store.as_ref(), doctor_id, req).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn delete_doctor(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<bool>>, ApiError> {
    doctors::delete(state.store.as_ref(), doctor_id).await?;
    Ok(Json(ApiOk { data: true }))
}

pub async fn can_delete_doctor(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<DeleteCheck>>, ApiError> {
    let data = doctors::can_delete(state.store.as_ref(), doctor_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn list_specializations(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<String>>>, ApiError> {
    let data = doctors::specializations(state.store.as_ref()).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn doctor_stats(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<DoctorStats>>, ApiError> {
    let data = doctors::stats(state.store.as_ref()).await?;
    Ok(Json(ApiOk { data }))
}
