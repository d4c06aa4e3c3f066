//! Admin, liveness and debug handlers.

use std::collections::BTreeMap;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{Configuration, ConfigStore, StoreError, UserView};
use crate::http::server::AppState;
use crate::probe::{is_valid_subdomain, ProbeReport};

pub const GENERATED_TOKEN_LEN: usize = 20;
pub const TOKEN_MIN_LEN: usize = 8;
pub const TOKEN_MAX_LEN: usize = 32;

/// Error response with a `{error}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn save_failed() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save configuration")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict => Self::new(StatusCode::CONFLICT, error.to_string()),
            StoreError::NotFound => Self::new(StatusCode::NOT_FOUND, error.to_string()),
            StoreError::Config(e) => {
                tracing::error!(error = %e, "Admin mutation failed");
                Self::save_failed()
            }
        }
    }
}

/// `{success: true, message}`
#[derive(Debug, Serialize)]
pub struct Success {
    pub success: bool,
    pub message: &'static str,
}

impl Success {
    fn json(message: &'static str) -> Json<Self> {
        Json(Self {
            success: true,
            message,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateToken {
    pub username: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateToken {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenList {
    pub users: Vec<UserView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub results: BTreeMap<String, ProbeReport>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DebugUser {
    pub user: String,
    pub subdomain: String,
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    let valid = !username.is_empty()
        && username
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(ApiError::bad_request(
            "Username must contain only lowercase letters, numbers and hyphens",
        ))
    }
}

pub fn validate_token(token: &str) -> Result<(), ApiError> {
    if (TOKEN_MIN_LEN..=TOKEN_MAX_LEN).contains(&token.chars().count()) {
        Ok(())
    } else {
        Err(ApiError::bad_request("Token must be 8-32 characters"))
    }
}

pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Run a store mutation on the blocking pool; it writes the config file.
async fn blocking<F>(store: &std::sync::Arc<ConfigStore>, mutation: F) -> Result<(), ApiError>
where
    F: FnOnce(&ConfigStore) -> Result<(), StoreError> + Send + 'static,
{
    let store = store.clone();
    match tokio::task::spawn_blocking(move || mutation(&store)).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            tracing::error!(error = %e, "Admin mutation task failed");
            Err(ApiError::save_failed())
        }
    }
}

pub async fn list_tokens(State(state): State<AppState>) -> Json<TokenList> {
    Json(TokenList {
        users: state.store.user_views(),
    })
}

pub async fn create_token(
    State(state): State<AppState>,
    body: Result<Json<CreateToken>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let username = body.username.filter(|u| !u.is_empty());
    let token = body.token.filter(|t| !t.is_empty());
    let (Some(username), Some(token)) = (username, token) else {
        return Err(ApiError::bad_request("Username and token are required"));
    };
    validate_username(&username)?;
    validate_token(&token)?;

    let user = username.clone();
    blocking(&state.store, move |store| store.add_user(&user, &token)).await?;

    tracing::info!(user = %username, "Token added");
    Ok(Success::json("Token added successfully"))
}

pub async fn update_token(
    State(state): State<AppState>,
    Path(username): Path<String>,
    body: Result<Json<UpdateToken>, JsonRejection>,
) -> Result<Json<Success>, ApiError> {
    if state.store.snapshot().user(&username).is_none() {
        return Err(StoreError::NotFound.into());
    }

    let body = match body {
        Ok(Json(body)) => body,
        Err(JsonRejection::MissingJsonContentType(_)) => UpdateToken::default(),
        Err(e) => return Err(ApiError::bad_request(e.body_text())),
    };
    let token = body.token.filter(|t| !t.is_empty());
    if let Some(token) = &token {
        validate_token(token)?;
    }

    let user = username.clone();
    blocking(&state.store, move |store| store.update_token(&user, token.as_deref())).await?;

    tracing::info!(user = %username, "Token updated");
    Ok(Success::json("Token updated successfully"))
}

pub async fn delete_token(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Success>, ApiError> {
    let user = username.clone();
    blocking(&state.store, move |store| store.delete_user(&user)).await?;

    tracing::info!(user = %username, "Token deleted");
    Ok(Success::json("Token deleted successfully"))
}

pub async fn new_token() -> Json<serde_json::Value> {
    Json(json!({ "token": generate_token() }))
}

pub async fn frontend_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "tunnelDomain": state.prober.settings().tunnel_domain }))
}

pub async fn tunnel_status(
    State(state): State<AppState>,
    Path(subdomain): Path<String>,
) -> Result<Json<ProbeReport>, ApiError> {
    if !is_valid_subdomain(&subdomain) {
        return Err(ApiError::bad_request("Invalid subdomain"));
    }
    tracing::debug!(subdomain = %subdomain, "Checking tunnel status");
    Ok(Json(state.prober.report(&subdomain).await))
}

pub async fn tunnel_status_all(State(state): State<AppState>) -> Json<BatchStatus> {
    let config = state.store.snapshot();
    let targets: Vec<(String, String)> = config
        .users
        .iter()
        .map(|(user, record)| (user.clone(), record.subdomain_for(user).to_string()))
        .collect();
    tracing::debug!(users = targets.len(), "Checking tunnel status for all users");

    Json(BatchStatus {
        results: state.prober.check_all(targets).await,
        checked_at: Utc::now(),
    })
}

fn debug_enabled(config: &Configuration) -> Result<(), ApiError> {
    if config.debug {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::FORBIDDEN, "debug mode disabled"))
    }
}

pub async fn debug_config(State(state): State<AppState>) -> Result<Json<Configuration>, ApiError> {
    let config = state.store.snapshot();
    debug_enabled(&config)?;
    Ok(Json(config.redacted()))
}

pub async fn debug_users(State(state): State<AppState>) -> Result<Json<Vec<DebugUser>>, ApiError> {
    let config = state.store.snapshot();
    debug_enabled(&config)?;
    Ok(Json(
        config
            .users
            .iter()
            .map(|(user, record)| DebugUser {
                user: user.clone(),
                subdomain: record.subdomain_for(user).to_string(),
            })
            .collect(),
    ))
}
