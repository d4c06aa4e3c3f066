//! Operator surface: token management, tunnel status and debug views.
//!
//! Everything here sits behind [`auth::require_admin`].

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, put},
    Router,
};

use self::auth::require_admin;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/api/tokens", get(list_tokens).post(create_token))
        .route("/api/tokens/{username}", put(update_token).delete(delete_token))
        .route("/api/generate-token", get(new_token))
        .route("/api/config", get(frontend_config))
        .route("/api/tunnel-status", get(tunnel_status_all))
        .route("/api/tunnel-status/{subdomain}", get(tunnel_status))
        .route("/debug/config", get(debug_config))
        .route("/debug/users", get(debug_users))
        .layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .with_state(state)
}
