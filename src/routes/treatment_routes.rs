// src/routes/treatment_routes.rs

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
    models::{
        ApiOk, AppState, Page, PageRequest, SortOrder, Treatment, TreatmentFilter, TreatmentSort,
        MAX_PAGE_LIMIT,
    },
    services::{
        treatments::{self, CreateTreatment, PopularTreatment, TreatmentStats, UpdateTreatment},
        DeleteCheck,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/treatments", get(list_treatments).post(create_treatment))
        .route("/treatments/categories", get(list_categories))
        .route("/treatments/categories/{category}", get(treatments_in_category))
        .route("/treatments/search", get(search_treatments))
        .route("/treatments/stats", get(treatment_stats))
        .route("/treatments/popular", get(popular_treatments))
        .route(
            "/treatments/{treatment_id}",
            get(get_treatment).patch(update_treatment).delete(delete_treatment),
        )
        .route("/treatments/{treatment_id}/can_delete", get(can_delete_treatment))
}

/* ============================================================
   Query params
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub min_price_cents: Option<i64>,
    pub max_price_cents: Option<i64>,
    #[serde(default)]
    pub sort: TreatmentSort,
    pub order: Option<SortOrder>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/* ============================================================
   Handlers
   ============================================================ */

pub async fn list_treatments(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<Page<Treatment>>, ApiError> {
    let page = PageRequest::resolve(q.page, q.limit, state.default_page_limit);
    let filter = TreatmentFilter {
        search: q.search.filter(|s| !s.trim().is_empty()),
        category: q.category.filter(|s| !s.trim().is_empty()),
        min_price_cents: q.min_price_cents,
        max_price_cents: q.max_price_cents,
    };
    let order = q.order.unwrap_or(SortOrder::Asc);
    Ok(Json(treatments::list(state.store.as_ref(), &filter, q.sort, order, page).await?))
}

pub async fn get_treatment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(treatment_id): Path<Uuid>,
) -> Result<Json<ApiOk<Treatment>>, ApiError> {
    let data = treatments::get(state.store.as_ref(), treatment_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn create_treatment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Json(req): Json<CreateTreatment>,
) -> Result<Json<ApiOk<Treatment>>, ApiError> {
    let data = treatments::create(state.store.as_ref(), req).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn update_treatment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(treatment_id): Path<Uuid>,
    Json(req): Json<UpdateTreatment>,
) -> Result<Json<ApiOk<Treatment>>, ApiError> {
    let data = treatments::update(state.store.as_ref(), treatment_id, req).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn delete_treatment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(treatment_id): Path<Uuid>,
) -> Result<Json<ApiOk<bool>>, ApiError> {
    treatments::delete(state.store.as_ref(), treatment_id).await?;
    Ok(Json(ApiOk { data: true }))
}

pub async fn can_delete_treatment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(treatment_id): Path<Uuid>,
) -> Result<Json<ApiOk<DeleteCheck>>, ApiError> {
    let data = treatments::can_delete(state.store.as_ref(), treatment_id).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn list_categories(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<String>>>, ApiError> {
    let data = treatments::categories(state.store.as_ref()).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn treatments_in_category(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(category): Path<String>,
) -> Result<Json<ApiOk<Vec<Treatment>>>, ApiError> {
    let data = treatments::by_category(state.store.as_ref(), &category).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn search_treatments(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<ApiOk<Vec<Treatment>>>, ApiError> {
    let limit = q.limit.unwrap_or(treatments::DEFAULT_SEARCH_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let data = treatments::search(state.store.as_ref(), q.query.as_deref().unwrap_or_default(), limit).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn treatment_stats(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<TreatmentStats>>, ApiError> {
    let data = treatments::stats(state.store.as_ref()).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn popular_treatments(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<LimitQuery>,
) -> Result<Json<ApiOk<Vec<PopularTreatment>>>, ApiError> {
    let limit = q.limit.unwrap_or(treatments::DEFAULT_POPULAR_LIMIT).max(1);
    let data = treatments::popular(state.store.as_ref(), limit).await?;
    Ok(Json(ApiOk { data }))
}
