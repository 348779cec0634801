use crate::config::ApiConfig;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

#[derive(Clone)]
pub struct AuthState {
    pub config: ApiConfig,
}

pub fn create_auth_state(config: ApiConfig) -> Arc<AuthState> {
    Arc::new(AuthState { config })
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response()
}

/// API-key middleware. Accepts `x-api-key` or `Authorization: Bearer`;
/// the comparison is constant-time to keep key bytes out of timing.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    // CORS preflight must pass without credentials
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let expected_key = match &auth_state.config.api_key {
        Some(key) => key,
        // No key configured: authentication is disabled (development mode)
        None => return Ok(next.run(request).await),
    };

    let path = request.uri().path().to_string();
    let provided = if let Some(value) = headers.get("x-api-key") {
        value.to_str().ok()
    } else if let Some(value) = headers.get("authorization") {
        value.to_str().ok().and_then(|v| v.strip_prefix("Bearer "))
    } else {
        None
    };

    let provided = match provided {
        Some(key) => key,
        None => {
            warn!("missing or malformed API key for {path}");
            return Err(unauthorized());
        }
    };

    if provided.as_bytes().ct_eq(expected_key.as_bytes()).into() {
        Ok(next.run(request).await)
    } else {
        warn!("invalid API key for {path}");
        Err(unauthorized())
    }
}
