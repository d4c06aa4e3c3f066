//! Authorization decisions for control events.
//!
//! `authorize` is a pure function of the event and one configuration
//! snapshot. The only effect it asks for is an [`ActivityUpdate`] after an
//! accepted login, which the caller hands to the config store.

use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};

use crate::config::schema::Configuration;
use crate::control::event::{
    CloseProxyContent, ControlEvent, LoginContent, NewProxyContent, NewUserConnContent,
    NewWorkConnContent, PingContent,
};
use crate::control::verdict::Verdict;

/// Login activity the store should record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityUpdate {
    pub user: String,
    pub ip: String,
    pub at: DateTime<Utc>,
}

/// Outcome of authorizing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub activity: Option<ActivityUpdate>,
}

impl Decision {
    fn accept() -> Self {
        Self {
            verdict: Verdict::Accept,
            activity: None,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::reject(reason),
            activity: None,
        }
    }
}

/// Decide whether `event` is permitted under `config`.
pub fn authorize(
    config: &Configuration,
    event: &ControlEvent,
    req_id: &str,
    received_at: DateTime<Utc>,
) -> Decision {
    let decision = match event {
        ControlEvent::Login(content) => login(config, content, req_id, received_at),
        ControlEvent::NewProxy(content) => new_proxy(config, content, req_id),
        ControlEvent::CloseProxy(content) => close_proxy(event, content, req_id),
        ControlEvent::Ping(content) => ping(event, content, req_id),
        ControlEvent::NewWorkConn(content) => new_work_conn(event, content, req_id),
        ControlEvent::NewUserConn(content) => new_user_conn(event, content, req_id),
    };

    tracing::debug!(
        req_id = %req_id,
        op = event.operation().as_str(),
        accepted = decision.verdict.is_accepted(),
        reason = ?decision.verdict.reason(),
        "Decision"
    );
    decision
}

fn login(
    config: &Configuration,
    content: &LoginContent,
    req_id: &str,
    received_at: DateTime<Utc>,
) -> Decision {
    tracing::info!(
        req_id = %req_id,
        user = ?content.user,
        client_address = ?content.client_address,
        "Login"
    );
    tracing::debug!(req_id = %req_id, content = ?content, "Login content");

    let Some(user) = content.user.as_deref().filter(|u| !u.is_empty()) else {
        tracing::info!(req_id = %req_id, "Login rejected: missing user");
        return Decision::reject("missing user");
    };
    let Some(token) = content.token() else {
        tracing::info!(req_id = %req_id, user = %user, "Login rejected: missing token");
        return Decision::reject("missing token");
    };

    match config.user(user) {
        None => {
            tracing::debug!(user = %user, "User not found in config");
            tracing::info!(req_id = %req_id, user = %user, "Login rejected: invalid credentials");
            return Decision::reject("invalid credentials");
        }
        Some(record) if record.token != token => {
            tracing::debug!(user = %user, "Token mismatch");
            tracing::info!(req_id = %req_id, user = %user, "Login rejected: invalid credentials");
            return Decision::reject("invalid credentials");
        }
        Some(_) => {}
    }

    let ip = client_ip(content.client_address.as_deref());
    tracing::info!(req_id = %req_id, user = %user, ip = %ip, "Login accepted");

    Decision {
        verdict: Verdict::Accept,
        activity: Some(ActivityUpdate {
            user: user.to_string(),
            ip,
            at: received_at,
        }),
    }
}

fn new_proxy(config: &Configuration, content: &NewProxyContent, req_id: &str) -> Decision {
    let user = content
        .user
        .as_ref()
        .and_then(|info| info.user.as_deref())
        .filter(|u| !u.is_empty());

    tracing::info!(
        req_id = %req_id,
        user = ?user,
        proxy = ?content.proxy_name,
        proxy_type = ?content.proxy_type,
        "NewProxy"
    );
    tracing::debug!(req_id = %req_id, content = ?content, "NewProxy content");

    let Some(user) = user else {
        tracing::info!(req_id = %req_id, "NewProxy rejected: missing user info");
        return Decision::reject("missing user info");
    };

    if let Some(subdomain) = content.subdomain.as_deref().filter(|s| !s.is_empty()) {
        let allowed = config.allowed_subdomain(user);
        if allowed != Some(subdomain) {
            tracing::info!(
                req_id = %req_id,
                user = %user,
                subdomain = %subdomain,
                allowed = ?allowed,
                "NewProxy rejected: subdomain not allowed"
            );
            return Decision::reject(format!(
                "subdomain '{}' not allowed for this user",
                subdomain
            ));
        }
    }

    // Custom domains are not restricted; they are only surfaced in logs.
    for domain in content.custom_domains.iter().flatten() {
        tracing::debug!(req_id = %req_id, user = %user, domain = %domain, "Custom domain");
    }

    tracing::info!(req_id = %req_id, user = %user, proxy = ?content.proxy_name, "NewProxy accepted");
    Decision::accept()
}

fn close_proxy(event: &ControlEvent, content: &CloseProxyContent, req_id: &str) -> Decision {
    tracing::info!(
        req_id = %req_id,
        user = ?event.user(),
        proxy = ?content.proxy_name,
        "CloseProxy"
    );
    Decision::accept()
}

fn ping(event: &ControlEvent, content: &PingContent, req_id: &str) -> Decision {
    tracing::debug!(
        req_id = %req_id,
        user = ?event.user(),
        timestamp = ?content.timestamp,
        "Ping"
    );
    Decision::accept()
}

fn new_work_conn(event: &ControlEvent, content: &NewWorkConnContent, req_id: &str) -> Decision {
    tracing::debug!(
        req_id = %req_id,
        user = ?event.user(),
        run_id = ?content.run_id,
        "NewWorkConn"
    );
    Decision::accept()
}

fn new_user_conn(event: &ControlEvent, content: &NewUserConnContent, req_id: &str) -> Decision {
    tracing::info!(
        req_id = %req_id,
        user = ?event.user(),
        proxy = ?content.proxy_name,
        proxy_type = ?content.proxy_type,
        remote_addr = ?content.remote_addr,
        "NewUserConn"
    );
    Decision::accept()
}

/// IP portion of a client address; `unknown` when absent.
pub fn client_ip(address: Option<&str>) -> String {
    let Some(address) = address.map(str::trim).filter(|a| !a.is_empty()) else {
        return "unknown".to_string();
    };

    if let Ok(socket) = address.parse::<SocketAddr>() {
        return socket.ip().to_string();
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return ip.to_string();
    }
    match address.rsplit_once(':') {
        Some((host, port))
            if !host.contains(':') && !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
        {
            host.to_string()
        }
        _ => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::UserRecord;
    use crate::control::event::{ControlRequest, UserInfo};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn config() -> Configuration {
        let mut config = Configuration::default();
        config
            .users
            .insert("alice".into(), UserRecord::new("alice", "alice-token"));
        config.users.insert(
            "bob".into(),
            UserRecord {
                token: "bob-token".into(),
                subdomain: Some("bobs-radio".into()),
                last_login: None,
                last_ip: None,
            },
        );
        config.users.insert(
            "carol".into(),
            UserRecord {
                token: "carol-token".into(),
                subdomain: None,
                last_login: None,
                last_ip: None,
            },
        );
        config
    }

    fn login(user: Option<&str>, token: Option<&str>, address: Option<&str>) -> ControlEvent {
        ControlEvent::Login(LoginContent {
            user: user.map(str::to_string),
            metas: token.map(|t| BTreeMap::from([("token".to_string(), t.to_string())])),
            client_address: address.map(str::to_string),
            ..Default::default()
        })
    }

    fn new_proxy(user: Option<&str>, subdomain: Option<&str>) -> ControlEvent {
        ControlEvent::NewProxy(NewProxyContent {
            user: user.map(|u| UserInfo {
                user: Some(u.to_string()),
                ..Default::default()
            }),
            proxy_name: Some("web".into()),
            proxy_type: Some("http".into()),
            subdomain: subdomain.map(str::to_string),
            custom_domains: Some(vec!["radio.example.org".into()]),
            remote_port: None,
        })
    }

    fn decide(event: &ControlEvent) -> Decision {
        authorize(&config(), event, "req-1", Utc::now())
    }

    #[test]
    fn test_login_accepts_and_records_activity() {
        let received = Utc::now();
        let decision = authorize(
            &config(),
            &login(Some("alice"), Some("alice-token"), Some("203.0.113.9:51522")),
            "req-1",
            received,
        );

        assert_eq!(decision.verdict, Verdict::Accept);
        let activity = decision.activity.unwrap();
        assert_eq!(activity.user, "alice");
        assert_eq!(activity.ip, "203.0.113.9");
        assert!(activity.at >= received);
    }

    #[test]
    fn test_login_rejections() {
        let cases = [
            (login(None, Some("t"), None), "missing user"),
            (login(Some(""), Some("t"), None), "missing user"),
            (login(Some("alice"), None, None), "missing token"),
            (login(Some("alice"), Some(""), None), "missing token"),
            (login(Some("alice"), Some("wrong"), None), "invalid credentials"),
            (login(Some("alice"), Some("ALICE-TOKEN"), None), "invalid credentials"),
            (login(Some("mallory"), Some("alice-token"), None), "invalid credentials"),
        ];

        for (event, reason) in cases {
            let decision = decide(&event);
            assert_eq!(decision.verdict, Verdict::reject(reason), "{:?}", event);
            assert!(decision.activity.is_none());
        }
    }

    #[test]
    fn test_unknown_user_always_invalid_credentials() {
        for user in ["nobody", "ALICE", "alice ", "bobs-radio"] {
            let decision = decide(&login(Some(user), Some("alice-token"), None));
            assert_eq!(decision.verdict, Verdict::reject("invalid credentials"));
        }
    }

    #[test]
    fn test_login_without_address_records_unknown() {
        let decision = decide(&login(Some("bob"), Some("bob-token"), None));
        assert_eq!(decision.activity.unwrap().ip, "unknown");
    }

    #[test]
    fn test_new_proxy_subdomain_rules() {
        assert!(decide(&new_proxy(Some("alice"), Some("alice"))).verdict.is_accepted());
        assert!(decide(&new_proxy(Some("bob"), Some("bobs-radio"))).verdict.is_accepted());
        assert!(decide(&new_proxy(Some("carol"), Some("carol"))).verdict.is_accepted());
        assert!(decide(&new_proxy(Some("alice"), None)).verdict.is_accepted());
        assert!(decide(&new_proxy(Some("alice"), Some(""))).verdict.is_accepted());

        for (user, subdomain) in [("bob", "bob"), ("alice", "bobs-radio"), ("ghost", "ghost")] {
            let decision = decide(&new_proxy(Some(user), Some(subdomain)));
            let reason = decision.verdict.reason().unwrap().to_string();
            assert!(reason.contains(&format!("'{}'", subdomain)), "{}", reason);
        }
    }

    #[test]
    fn test_new_proxy_missing_user() {
        assert_eq!(
            decide(&new_proxy(None, Some("alice"))).verdict,
            Verdict::reject("missing user info")
        );
    }

    #[test]
    fn test_lifecycle_events_always_accepted() {
        let events = [
            json!({"op": "CloseProxy", "content": {"proxy_name": "web"}}),
            json!({"op": "Ping", "content": {}}),
            json!({"op": "NewWorkConn", "content": {"user": {"user": "ghost"}, "run_id": "x"}}),
            json!({"op": "NewUserConn", "content": {"remote_addr": "198.51.100.1:4000"}}),
        ];
        for body in events {
            let request = ControlRequest::from_slice(body.to_string().as_bytes()).unwrap();
            let decision = authorize(&Configuration::default(), &request.event, "r", Utc::now());
            assert_eq!(decision.verdict, Verdict::Accept);
            assert!(decision.activity.is_none());
        }
    }

    #[test]
    fn test_client_ip_extraction() {
        assert_eq!(client_ip(Some("203.0.113.9:51522")), "203.0.113.9");
        assert_eq!(client_ip(Some("203.0.113.9")), "203.0.113.9");
        assert_eq!(client_ip(Some("[2001:db8::1]:7000")), "2001:db8::1");
        assert_eq!(client_ip(Some("2001:db8::1")), "2001:db8::1");
        assert_eq!(client_ip(Some("client.example:7000")), "client.example");
        assert_eq!(client_ip(Some("")), "unknown");
        assert_eq!(client_ip(None), "unknown");
    }
}
