//! HTTP Basic gate for the admin and debug surface.
//!
//! Credentials are read from the current configuration snapshot on every
//! request, so a reload that changes them takes effect immediately. With
//! no credentials configured the gate stays open.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;

use crate::http::server::AppState;

const CHALLENGE: &str = "Basic realm=\"admin\"";

/// Why a request failed the admin gate.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminAuthError {
    #[error("Authentication required.")]
    Missing,

    #[error("Invalid credentials.")]
    Invalid,
}

impl IntoResponse for AdminAuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE))],
            self.to_string(),
        )
            .into_response()
    }
}

pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AdminAuthError> {
    let config = state.store.snapshot();
    if let Some((username, password)) = config.admin_credentials() {
        check_basic(request.headers(), username, password)?;
    }
    Ok(next.run(request).await)
}

/// Verify an `Authorization: Basic` header against the expected pair.
pub fn check_basic(headers: &HeaderMap, username: &str, password: &str) -> Result<(), AdminAuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AdminAuthError::Missing)?;

    let encoded = value
        .strip_prefix("Basic ")
        .ok_or(AdminAuthError::Missing)?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AdminAuthError::Invalid)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AdminAuthError::Invalid)?;

    match decoded.split_once(':') {
        Some((u, p)) if u == username && p == password => Ok(()),
        _ => Err(AdminAuthError::Invalid),
    }
}
