//! Two-stage tunnel liveness probing.
//!
//! Stage one asks the application's identity endpoint (`/static_data`).
//! The tunnel gateway answers 404 both for a dead tunnel and for a live
//! tunnel without that route, so a 404 there triggers stage two against
//! the root to tell the two apart.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::observability::metrics;
use crate::probe::liveness::{Liveness, OfflineKind, ProbeReport, TunerIdentity};

/// Default per-request timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default number of probes in flight during a batch.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 32;

const IDENTITY_PATH: &str = "static_data";
const ACCEPT_VALUE: &str = "application/json, text/html, */*";
const USER_AGENT: &str = concat!("tunnel-gate/", env!("CARGO_PKG_VERSION"));

/// Why no probe URL could be built for a subdomain.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("invalid subdomain '{0}'")]
    InvalidSubdomain(String),

    #[error("invalid tunnel URL: {0}")]
    Url(#[from] url::ParseError),
}

/// A single DNS label: 1 to 63 of `[a-z0-9-]`, not starting or ending with `-`.
pub fn is_valid_subdomain(subdomain: &str) -> bool {
    (1..=63).contains(&subdomain.len())
        && !subdomain.starts_with('-')
        && !subdomain.ends_with('-')
        && subdomain
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Probe settings.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Base domain the subdomains live under, e.g. `tunnel.example.com`.
    pub tunnel_domain: String,
    /// `https` in production.
    pub scheme: String,
    pub timeout: Duration,
    pub concurrency: usize,
}

impl ProbeSettings {
    pub fn new(tunnel_domain: impl Into<String>) -> Self {
        Self {
            tunnel_domain: tunnel_domain.into(),
            scheme: "https".to_string(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }
}

/// Classifies a subdomain's tunnel by probing it over HTTP.
#[derive(Debug, Clone)]
pub struct LivenessProber {
    client: Client,
    settings: ProbeSettings,
}

impl LivenessProber {
    /// Build a prober with its own HTTP client.
    pub fn new(settings: ProbeSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self::with_client(client, settings))
    }

    /// Build a prober around an existing client.
    pub fn with_client(client: Client, settings: ProbeSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// `{scheme}://{subdomain}.{tunnel_domain}/`. The subdomain must be a
    /// single DNS label so the request cannot leave the tunnel domain.
    pub fn base_url(&self, subdomain: &str) -> Result<Url, TargetError> {
        if !is_valid_subdomain(subdomain) {
            return Err(TargetError::InvalidSubdomain(subdomain.to_string()));
        }
        Ok(Url::parse(&format!(
            "{}://{}.{}/",
            self.settings.scheme, subdomain, self.settings.tunnel_domain
        ))?)
    }

    /// Classify one subdomain. Never fails: every probe failure is a result.
    pub async fn check(&self, subdomain: &str) -> Liveness {
        let result = self.classify(subdomain).await;
        metrics::record_probe(result.label());
        tracing::debug!(subdomain = %subdomain, status = result.label(), result = ?result, "Tunnel check");
        result
    }

    /// [`LivenessProber::check`] stamped with subdomain and time.
    pub async fn report(&self, subdomain: &str) -> ProbeReport {
        let result = self.check(subdomain).await;
        ProbeReport {
            subdomain: subdomain.to_string(),
            result,
            checked_at: Utc::now(),
        }
    }

    /// Check many `(user, subdomain)` pairs concurrently. A slow or failing
    /// probe only affects its own entry.
    pub async fn check_all<I>(&self, targets: I) -> BTreeMap<String, ProbeReport>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        stream::iter(targets)
            .map(|(user, subdomain)| async move {
                let report = self.report(&subdomain).await;
                (user, report)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    async fn classify(&self, subdomain: &str) -> Liveness {
        let base = match self.base_url(subdomain) {
            Ok(url) => url,
            Err(e) => return Liveness::offline(OfflineKind::ConnectionError, e.to_string()),
        };
        let identity_url = match base.join(IDENTITY_PATH) {
            Ok(url) => url,
            Err(e) => {
                return Liveness::offline(
                    OfflineKind::ConnectionError,
                    format!("invalid tunnel URL: {}", e),
                )
            }
        };

        let response = match self.fetch(identity_url).await {
            Ok(response) => response,
            Err(e) => return transport_failure(e),
        };

        // Classification goes by status; the body is only read when it
        // can carry the identity.
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(subdomain = %subdomain, "/static_data returned 404, checking root");
            return self.classify_root(base).await;
        }
        if !status.is_success() {
            return Liveness::HttpError {
                status: status.as_u16(),
                message: format!("HTTP {}", status.as_u16()),
            };
        }

        match response.bytes().await {
            Ok(body) => classify_identity(&body),
            Err(e) => transport_failure(e),
        }
    }

    async fn classify_root(&self, base: Url) -> Liveness {
        let status = match self.fetch(base).await {
            Ok(response) => response.status(),
            Err(_) => return Liveness::tunnel_down(),
        };

        if status == StatusCode::NOT_FOUND {
            Liveness::tunnel_down()
        } else if status.is_success() {
            Liveness::not_expected_app("Not the expected application (no /static_data endpoint)")
        } else {
            Liveness::not_expected_app(format!(
                "Not the expected application (root: HTTP {})",
                status.as_u16()
            ))
        }
    }

    /// Send a GET; resolves as soon as the response head has arrived.
    async fn fetch(&self, url: Url) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .get(url)
            .header(ACCEPT, ACCEPT_VALUE)
            .timeout(self.settings.timeout)
            .send()
            .await
    }
}

fn transport_failure(error: reqwest::Error) -> Liveness {
    if error.is_timeout() {
        Liveness::offline(OfflineKind::Timeout, "Connection timeout")
    } else {
        Liveness::offline(OfflineKind::ConnectionError, error.to_string())
    }
}

/// Classify a 2xx body from the identity endpoint.
fn classify_identity(body: &[u8]) -> Liveness {
    let data: Value = match serde_json::from_slice(body) {
        Ok(data) => data,
        Err(_) => {
            return Liveness::not_expected_app(
                "Response is not valid JSON - not the expected application",
            )
        }
    };

    match data.get("tunerName").and_then(Value::as_str) {
        Some(name) => Liveness::Online(TunerIdentity {
            tuner_name: name.to_string(),
            tuner_desc: descriptive(&data, "tunerDesc"),
            qth_latitude: descriptive(&data, "qthLatitude"),
            qth_longitude: descriptive(&data, "qthLongitude"),
        }),
        None => Liveness::not_expected_app(
            "Valid JSON but missing tunerName - probably not the expected application",
        ),
    }
}

fn descriptive(data: &Value, field: &str) -> Option<Value> {
    data.get(field)
        .filter(|v| !v.is_null() && v.as_str() != Some(""))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::liveness::WarningKind;

    #[test]
    fn test_identity_online() {
        let result = classify_identity(br#"{"tunerName":"MyTuner"}"#);
        assert_eq!(
            result,
            Liveness::Online(TunerIdentity {
                tuner_name: "MyTuner".into(),
                tuner_desc: None,
                qth_latitude: None,
                qth_longitude: None,
            })
        );
    }

    #[test]
    fn test_identity_copies_descriptive_fields() {
        let body = br#"{"tunerName":"T","tunerDesc":"Roof antenna","qthLatitude":"52.1","qthLongitude":4.3,"other":1}"#;
        let Liveness::Online(identity) = classify_identity(body) else {
            panic!("expected online");
        };
        assert_eq!(identity.tuner_desc, Some(Value::from("Roof antenna")));
        assert_eq!(identity.qth_latitude, Some(Value::from("52.1")));
        assert_eq!(identity.qth_longitude, Some(Value::from(4.3)));
    }

    #[test]
    fn test_identity_not_expected_app() {
        for body in [&b"<html>hello</html>"[..], br#"{"name":"x"}"#, br#"{"tunerName":7}"#, b"[1,2]"] {
            assert!(matches!(
                classify_identity(body),
                Liveness::Warning {
                    kind: WarningKind::NotExpectedApp,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_base_url() {
        let prober = LivenessProber::new(ProbeSettings::new("tunnel.example.com")).unwrap();
        assert_eq!(
            prober.base_url("alice").unwrap().as_str(),
            "https://alice.tunnel.example.com/"
        );
        assert_eq!(
            prober.base_url("alice").unwrap().join(IDENTITY_PATH).unwrap().as_str(),
            "https://alice.tunnel.example.com/static_data"
        );
    }

    #[test]
    fn test_subdomain_must_be_one_label() {
        for good in ["alice", "bobs-radio", "a", "r2d2", &"a".repeat(63)] {
            assert!(is_valid_subdomain(good), "{good:?}");
        }
        for bad in [
            "",
            "169.254.169.254/?",
            "evil.com#",
            "a.b",
            "Alice",
            "-alice",
            "alice-",
            "user@host",
            &"a".repeat(64),
        ] {
            assert!(!is_valid_subdomain(bad), "{bad:?}");
        }
    }

    #[test]
    fn test_base_url_stays_under_tunnel_domain() {
        let prober = LivenessProber::new(ProbeSettings::new("tunnel.example.com")).unwrap();
        assert!(matches!(
            prober.base_url("169.254.169.254/?"),
            Err(TargetError::InvalidSubdomain(_))
        ));
        assert!(prober.base_url("evil.com#").is_err());
    }

    #[tokio::test]
    async fn test_invalid_subdomain_is_connection_error() {
        let prober = LivenessProber::new(ProbeSettings::new("tunnel.example.com")).unwrap();
        for subdomain in ["bad host/with space", "169.254.169.254/?"] {
            let result = prober.check(subdomain).await;
            assert!(matches!(
                result,
                Liveness::Offline {
                    kind: OfflineKind::ConnectionError,
                    ..
                }
            ));
        }
    }
}
