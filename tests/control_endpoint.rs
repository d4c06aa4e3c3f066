//! Router-level tests for the control endpoint and the admin surface.

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use tower::ServiceExt;

use tunnel_gate::config::{loader::load_config, ConfigStore};
use tunnel_gate::http::{build_router, AppState};
use tunnel_gate::probe::{LivenessProber, ProbeSettings};

mod common;

const CONFIG: &str = r#"
[server]
port = 7002
path = "/handler"

[admin]
username = "admin"
password = "hunter22"

[users.alice]
token = "alice-token"

[users.bob]
token = "bob-token"
subdomain = "bobs-radio"
"#;

struct Harness {
    router: Router,
    store: Arc<ConfigStore>,
    _dir: tempfile::TempDir,
}

fn harness(content: &str) -> Harness {
    let (dir, path) = common::config_file(content);
    let store = Arc::new(ConfigStore::open(&path).unwrap());
    let prober = LivenessProber::new(ProbeSettings::new("tunnel.example.com")).unwrap();
    let router = build_router(
        AppState {
            store: store.clone(),
            prober,
        },
        "/handler",
    );
    Harness {
        router,
        store,
        _dir: dir,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&body).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&body).into_owned())
    });
    (status, value)
}

async fn control(router: &Router, body: &str) -> Value {
    let request = Request::post("/handler")
        .header("x-frp-reqid", "req-1")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, value) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
    value
}

fn admin(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::AUTHORIZATION,
            format!("Basic {}", STANDARD.encode("admin:hunter22")),
        );
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn test_login_accepted_and_activity_persisted() {
    let h = harness(CONFIG);
    let verdict = control(
        &h.router,
        r#"{"version":"0.1.0","op":"Login","content":{"user":"alice","metas":{"token":"alice-token"},"client_address":"203.0.113.9:51234"}}"#,
    )
    .await;

    assert_eq!(verdict, json!({"reject": false, "unchange": true}));
    assert_eq!(h.store.activity("alice").unwrap().last_ip, "203.0.113.9");

    let on_disk = load_config(h.store.path()).unwrap();
    let alice = on_disk.user("alice").unwrap();
    assert_eq!(alice.last_ip.as_deref(), Some("203.0.113.9"));
    assert!(alice.last_login.is_some());
}

#[tokio::test]
async fn test_login_bad_token_rejected_without_activity() {
    let h = harness(CONFIG);
    let verdict = control(
        &h.router,
        r#"{"op":"Login","content":{"user":"alice","metas":{"token":"nope"}}}"#,
    )
    .await;

    assert_eq!(verdict, json!({"reject": true, "reject_reason": "invalid credentials"}));
    assert!(h.store.activity("alice").is_none());
}

#[tokio::test]
async fn test_unknown_operation_rejected() {
    let h = harness(CONFIG);
    let verdict = control(&h.router, r#"{"op":"Bogus","content":{}}"#).await;
    assert_eq!(verdict, json!({"reject": true, "reject_reason": "unknown operation: Bogus"}));
}

#[tokio::test]
async fn test_new_proxy_subdomain_rules() {
    let h = harness(CONFIG);

    let wrong = control(
        &h.router,
        r#"{"op":"NewProxy","content":{"user":{"user":"bob"},"proxy_name":"web","subdomain":"alice"}}"#,
    )
    .await;
    assert_eq!(
        wrong,
        json!({"reject": true, "reject_reason": "subdomain 'alice' not allowed for this user"})
    );

    let right = control(
        &h.router,
        r#"{"op":"NewProxy","content":{"user":{"user":"bob"},"proxy_name":"web","subdomain":"bobs-radio"}}"#,
    )
    .await;
    assert_eq!(right["reject"], false);

    let none = control(
        &h.router,
        r#"{"op":"NewProxy","content":{"user":{"user":"bob"},"proxy_name":"tcp","proxy_type":"tcp","remote_port":6000}}"#,
    )
    .await;
    assert_eq!(none["reject"], false);
}

#[tokio::test]
async fn test_malformed_body_is_rejection_not_error() {
    let h = harness(CONFIG);
    let verdict = control(&h.router, "{not json").await;

    assert_eq!(verdict["reject"], true);
    assert!(verdict["reject_reason"]
        .as_str()
        .unwrap()
        .starts_with("malformed request"));
}

#[tokio::test]
async fn test_lifecycle_events_accepted() {
    let h = harness(CONFIG);
    for body in [
        r#"{"op":"Ping","content":{"user":{"user":"alice"},"timestamp":1}}"#,
        r#"{"op":"CloseProxy","content":{"user":{"user":"alice"},"proxy_name":"web"}}"#,
        r#"{"op":"NewWorkConn","content":{"user":{"user":"alice"},"run_id":"r1"}}"#,
        r#"{"op":"NewUserConn","content":{"user":{"user":"alice"},"proxy_name":"web","remote_addr":"198.51.100.1:4000"}}"#,
    ] {
        assert_eq!(control(&h.router, body).await["reject"], false, "{body}");
    }
}

#[tokio::test]
async fn test_lifecycle_events_tolerate_unexpected_content() {
    let h = harness(CONFIG);
    for body in [
        r#"{"op":"Ping","content":{"user":{"user":"alice"},"timestamp":"1760000000"}}"#,
        r#"{"op":"CloseProxy","content":"hello"}"#,
        r#"{"op":"NewWorkConn","content":[1,2]}"#,
        r#"{"op":"NewUserConn","content":{"proxy_name":7}}"#,
    ] {
        assert_eq!(control(&h.router, body).await["reject"], false, "{body}");
    }
}

#[tokio::test]
async fn test_health_is_ungated() {
    let h = harness(CONFIG);
    let (status, body) = send(&h.router, Request::get("/health").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["debug"], false);
    assert_eq!(body["users"], 2);
    assert!(body["lastConfigReload"].is_string());
}

#[tokio::test]
async fn test_admin_requires_credentials() {
    let h = harness(CONFIG);

    let response = h
        .router
        .clone()
        .oneshot(Request::get("/api/tokens").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "Basic realm=\"admin\""
    );

    let wrong = Request::get("/api/tokens")
        .header(
            header::AUTHORIZATION,
            format!("Basic {}", STANDARD.encode("admin:wrong")),
        )
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.router, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, "Invalid credentials.");
}

#[tokio::test]
async fn test_admin_open_without_credentials() {
    let h = harness("[users.alice]\ntoken = \"alice-token\"\n");
    let (status, body) = send(&h.router, Request::get("/api/tokens").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"][0]["user"], "alice");
}

#[tokio::test]
async fn test_token_lifecycle() {
    let h = harness(CONFIG);

    let (status, body) = send(
        &h.router,
        admin("POST", "/api/tokens", Some(json!({"username": "carol", "token": "carol-token"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true, "message": "Token added successfully"}));

    let (status, _) = send(
        &h.router,
        admin("POST", "/api/tokens", Some(json!({"username": "carol", "token": "other-token"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &h.router,
        admin("POST", "/api/tokens", Some(json!({"username": "Carol!", "token": "carol-token"}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(
        &h.router,
        admin("PUT", "/api/tokens/carol", Some(json!({"token": "short"}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &h.router,
        admin("PUT", "/api/tokens/carol", Some(json!({"token": "carol-rotated"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.store.snapshot().user("carol").unwrap().token, "carol-rotated");

    let (status, body) = send(&h.router, admin("GET", "/api/tokens", None)).await;
    assert_eq!(status, StatusCode::OK);
    let carol = body["users"]
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["user"] == "carol")
        .unwrap()
        .clone();
    assert_eq!(carol["subdomain"], "carol");
    assert_eq!(carol["lastLogin"], Value::Null);

    let (status, _) = send(&h.router, admin("DELETE", "/api/tokens/carol", None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&h.router, admin("DELETE", "/api/tokens/carol", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "User not found"}));

    let on_disk = load_config(h.store.path()).unwrap();
    assert!(on_disk.user("carol").is_none());
    assert_eq!(on_disk.users.len(), 2);
}

#[tokio::test]
async fn test_new_user_can_log_in() {
    let h = harness(CONFIG);
    send(
        &h.router,
        admin("POST", "/api/tokens", Some(json!({"username": "dave", "token": "dave-token"}))),
    )
    .await;

    let verdict = control(
        &h.router,
        r#"{"op":"Login","content":{"user":"dave","metas":{"token":"dave-token"}}}"#,
    )
    .await;
    assert_eq!(verdict["reject"], false);
    assert_eq!(h.store.activity("dave").unwrap().last_ip, "unknown");
}

#[tokio::test]
async fn test_generate_token_and_frontend_config() {
    let h = harness(CONFIG);

    let (_, body) = send(&h.router, admin("GET", "/api/generate-token", None)).await;
    let token = body["token"].as_str().unwrap();
    assert_eq!(token.len(), 20);
    assert!(token.bytes().all(|b| b.is_ascii_alphanumeric()));

    let (_, body) = send(&h.router, admin("GET", "/api/config", None)).await;
    assert_eq!(body, json!({"tunnelDomain": "tunnel.example.com"}));
}

#[tokio::test]
async fn test_tunnel_status_rejects_foreign_hosts() {
    let h = harness(CONFIG);
    for uri in [
        "/api/tunnel-status/evil.com",
        "/api/tunnel-status/169.254.169.254%2F%3F",
        "/api/tunnel-status/Alice",
    ] {
        let (status, body) = send(&h.router, admin("GET", uri, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body, json!({"error": "Invalid subdomain"}));
    }
}

#[tokio::test]
async fn test_debug_views_follow_debug_flag() {
    let h = harness(CONFIG);
    let (status, body) = send(&h.router, admin("GET", "/debug/config", None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({"error": "debug mode disabled"}));

    let h = harness(&format!("debug = true\n{}", CONFIG));
    let (status, body) = send(&h.router, admin("GET", "/debug/config", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"]["alice"]["token"], "***hidden***");
    assert_eq!(body["users"]["bob"]["token"], "***hidden***");
    assert!(!body.to_string().contains("alice-token"));
    assert!(!body.to_string().contains("hunter22"));

    let (status, body) = send(&h.router, admin("GET", "/debug/users", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            {"user": "alice", "subdomain": "alice"},
            {"user": "bob", "subdomain": "bobs-radio"}
        ])
    );
}
