//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the axum Router: control endpoint, `/health`, admin surface
//! - Wire up middleware (tracing, panic containment)
//! - Turn control events into verdicts and hand login activity to the store
//! - Serve until the shutdown broadcast fires

use std::any::Any;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::config::ConfigStore;
use crate::control::{authorize, ActivityUpdate, ControlRequest, Verdict};
use crate::observability::metrics;
use crate::probe::LivenessProber;

/// Header carrying the tunnel server's request id.
pub const X_FRP_REQID: &str = "x-frp-reqid";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConfigStore>,
    pub prober: LivenessProber,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub debug: bool,
    pub users: usize,
    pub last_config_reload: DateTime<Utc>,
}

/// HTTP server for the gate.
pub struct HttpServer {
    router: Router,
    handler_path: String,
}

impl HttpServer {
    /// Create a server. The control path is taken from the configuration
    /// current at this point and stays fixed for the process lifetime.
    pub fn new(state: AppState) -> Self {
        let handler_path = state.store.snapshot().server.path.clone();
        let router = build_router(state, &handler_path);
        Self {
            router,
            handler_path,
        }
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            handler_path = %self.handler_path,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the full router with all middleware layers.
pub fn build_router(state: AppState, handler_path: &str) -> Router {
    Router::new()
        .route(handler_path, post(control_handler))
        .route("/health", get(health))
        .with_state(state.clone())
        .merge(setup_admin_router(state))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
}

/// Control-event endpoint. Always answers 200; failures become rejections.
async fn control_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Verdict> {
    let received_at = Utc::now();
    let req_id = headers
        .get(X_FRP_REQID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let request = match ControlRequest::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(req_id = %req_id, error = %e, "Rejecting invalid control request");
            metrics::record_verdict("invalid", false);
            return Json(Verdict::reject(e.to_string()));
        }
    };

    let config = state.store.snapshot();
    let decision = authorize(&config, &request.event, &req_id, received_at);
    metrics::record_verdict(request.event.operation().as_str(), decision.verdict.is_accepted());

    if let Some(update) = decision.activity {
        record_activity(&state.store, update, &req_id).await;
    }

    Json(decision.verdict)
}

/// Persist login activity. A failed write is logged; the login still stands.
async fn record_activity(store: &Arc<ConfigStore>, update: ActivityUpdate, req_id: &str) {
    let store = store.clone();
    let user = update.user.clone();
    let result = tokio::task::spawn_blocking(move || {
        store.record_activity(&update.user, &update.ip, update.at)
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(req_id = %req_id, user = %user, error = %e, "Failed to persist login activity")
        }
        Err(e) => {
            tracing::error!(req_id = %req_id, user = %user, error = %e, "Login activity task failed")
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    let config = state.store.snapshot();
    Json(HealthStatus {
        status: "ok",
        debug: config.debug,
        users: config.users.len(),
        last_config_reload: state.store.last_reload(),
    })
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(detail = %detail, "Request handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(Verdict::reject("internal server error")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_panic_response_hides_detail() {
        let response = panic_response(Box::new("secret detail".to_string()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"reject": true, "reject_reason": "internal server error"})
        );
    }
}
