use axum::{Json, Router, extract::State, routing::get};

use super::clinic_now;
use crate::error::ApiError;
use crate::middleware::auth_context::AuthContext;
use crate::models::{ApiOk, AppState};
use crate::services::dashboard::{self, Dashboard};

pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard))
}

pub async fn dashboard(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Dashboard>>, ApiError> {
    let data = dashboard::load(state.store.as_ref(), clinic_now()).await?;
    Ok(Json(ApiOk { data }))
}
