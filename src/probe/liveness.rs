//! Liveness classifications and their JSON shape.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// What the probed tunnel turned out to be.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Liveness {
    /// The expected application answered with its identity.
    Online(TunerIdentity),

    /// Something is serving, but not the expected application.
    Warning {
        #[serde(rename = "type")]
        kind: WarningKind,
        message: String,
    },

    /// Nothing reachable behind the subdomain.
    Offline {
        #[serde(rename = "type")]
        kind: OfflineKind,
        message: String,
    },

    /// The identity endpoint answered with an unexpected status.
    #[serde(rename = "error")]
    HttpError {
        #[serde(rename = "httpStatus")]
        status: u16,
        message: String,
    },
}

/// Identity reported by the application's `/static_data` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunerIdentity {
    pub tuner_name: String,
    pub tuner_desc: Option<Value>,
    pub qth_latitude: Option<Value>,
    pub qth_longitude: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    NotExpectedApp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineKind {
    TunnelDown,
    Timeout,
    ConnectionError,
}

impl Liveness {
    pub(crate) fn not_expected_app(message: impl Into<String>) -> Self {
        Self::Warning {
            kind: WarningKind::NotExpectedApp,
            message: message.into(),
        }
    }

    pub(crate) fn offline(kind: OfflineKind, message: impl Into<String>) -> Self {
        Self::Offline {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn tunnel_down() -> Self {
        Self::offline(OfflineKind::TunnelDown, "Tunnel not connected")
    }

    /// Status label, as used in the JSON `status` field.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Online(_) => "online",
            Self::Warning { .. } => "warning",
            Self::Offline { .. } => "offline",
            Self::HttpError { .. } => "error",
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online(_))
    }
}

/// A classification stamped with the subdomain and check time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub subdomain: String,
    #[serde(flatten)]
    pub result: Liveness,
    pub checked_at: DateTime<Utc>,
}
