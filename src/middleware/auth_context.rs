use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};

use crate::auth::token_matches;
use crate::error::ApiError;
use crate::models::AppState;

/// Proof that the request may use the API. When no token hash is configured
/// every request passes.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext;

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let Some(expected) = state.api_token_hash.as_deref() else {
                return Ok(AuthContext);
            };

            // Extract Authorization: Bearer <token>
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::unauthorized())?;

            if !token_matches(authz.token(), expected) {
                tracing::warn!(path = %parts.uri.path(), "rejected request with unknown API token");
                return Err(ApiError::unauthorized());
            }
            Ok(AuthContext)
        }
    }
}
