//! API key authentication.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};

use super::types::ErrorResponse;

const BEARER_PREFIX: &str = "Bearer ";

/// Accepted API keys. Authentication is off while the set is empty.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    api_keys: HashSet<String>,
}

impl SecurityConfig {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_keys.insert(key.into());
        self
    }

    pub fn auth_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    /// Number of registered keys.
    pub fn key_count(&self) -> usize {
        self.api_keys.len()
    }

    pub fn is_valid(&self, key: &str) -> bool {
        self.api_keys.contains(key)
    }

    /// Extract the key from an `Authorization` header value.
    pub fn extract_key(header_value: &str) -> Option<&str> {
        header_value
            .strip_prefix(BEARER_PREFIX)
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Reject requests without a valid `Authorization: Bearer <key>` header.
pub async fn auth_middleware(
    State(security): State<Arc<SecurityConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    if !security.auth_enabled() {
        return Ok(next.run(request).await);
    }

    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(SecurityConfig::extract_key)
        .is_some_and(|key| security.is_valid(key));

    if authorized {
        Ok(next.run(request).await)
    } else {
        tracing::debug!(path = %request.uri().path(), "Rejected unauthenticated request");
        Err((StatusCode::UNAUTHORIZED, Json(ErrorResponse::unauthorized())))
    }
}
