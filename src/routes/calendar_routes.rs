// src/routes/calendar_routes.rs

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
    models::{ApiOk, AppState},
    services::calendar::{self, MonthView},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/calendar/{year}/{month}", get(month_view))
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub doctor_id: Option<Uuid>,
}

pub async fn month_view(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path((year, month)): Path<(i32, u32)>,
    Query(q): Query<CalendarQuery>,
) -> Result<Json<ApiOk<MonthView>>, ApiError> {
    let data = calendar::month_view(state.store.as_ref(), year, month, q.doctor_id).await?;
    Ok(Json(ApiOk { data }))
}
