//! API key authentication.
//!
//! When `HERALD_API_KEY` is configured, every push route requires a matching
//! `X-API-Key` header. With no key configured the extractor lets everything
//! through.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use subtle::ConstantTimeEq;

use herald_common::error::AppError;

use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Marker extractor for authenticated requests.
///
/// ```ignore
/// async fn handler(_auth: ApiKey, Json(body): Json<Body>) -> impl IntoResponse { ... }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ApiKey;

impl FromRequestParts<AppState> for ApiKey {
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let expected = state.config.api_key.clone();

        let provided = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        async move { check_api_key(expected.as_deref(), provided.as_deref()) }
    }
}

fn check_api_key(expected: Option<&str>, provided: Option<&str>) -> Result<ApiKey, AppError> {
    let Some(expected) = expected else {
        return Ok(ApiKey);
    };

    match provided {
        Some(key) if bool::from(key.as_bytes().ct_eq(expected.as_bytes())) => Ok(ApiKey),
        Some(_) => Err(AppError::Auth("Invalid API key".to_string())),
        None => Err(AppError::Auth("Missing X-API-Key header".to_string())),
    }
}
