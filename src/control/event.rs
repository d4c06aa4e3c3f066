//! Control events sent by the tunnel server's plugin hook.
//!
//! The envelope is `{version, op, content}`; `content` is decoded into the
//! payload type of the named operation. Anything that does not fit becomes
//! a [`ValidationError`], which the caller turns into a rejection.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// The operations this gate is asked to authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Login,
    NewProxy,
    CloseProxy,
    Ping,
    NewWorkConn,
    NewUserConn,
}

impl Operation {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "Login" => Some(Self::Login),
            "NewProxy" => Some(Self::NewProxy),
            "CloseProxy" => Some(Self::CloseProxy),
            "Ping" => Some(Self::Ping),
            "NewWorkConn" => Some(Self::NewWorkConn),
            "NewUserConn" => Some(Self::NewUserConn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "Login",
            Self::NewProxy => "NewProxy",
            Self::CloseProxy => "CloseProxy",
            Self::Ping => "Ping",
            Self::NewWorkConn => "NewWorkConn",
            Self::NewUserConn => "NewUserConn",
        }
    }
}

/// Why an inbound request could not be turned into a [`ControlEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed request: {0}")]
    MalformedBody(String),

    #[error("missing operation")]
    MissingOperation,

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("malformed {op} content: {detail}")]
    MalformedContent { op: &'static str, detail: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    content: Option<Value>,
}

/// Identity block embedded in post-login events.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserInfo {
    pub user: Option<String>,
    pub metas: Option<BTreeMap<String, String>>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoginContent {
    pub version: Option<String>,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub user: Option<String>,
    pub run_id: Option<String>,
    pub pool_count: Option<u32>,
    pub metas: Option<BTreeMap<String, String>>,
    pub client_address: Option<String>,
}

impl LoginContent {
    pub fn token(&self) -> Option<&str> {
        self.metas
            .as_ref()
            .and_then(|metas| metas.get("token"))
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NewProxyContent {
    pub user: Option<UserInfo>,
    pub proxy_name: Option<String>,
    pub proxy_type: Option<String>,
    pub subdomain: Option<String>,
    pub custom_domains: Option<Vec<String>>,
    pub remote_port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CloseProxyContent {
    pub user: Option<UserInfo>,
    pub proxy_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PingContent {
    pub user: Option<UserInfo>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NewWorkConnContent {
    pub user: Option<UserInfo>,
    pub run_id: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NewUserConnContent {
    pub user: Option<UserInfo>,
    pub proxy_name: Option<String>,
    pub proxy_type: Option<String>,
    pub remote_addr: Option<String>,
}

/// One inbound control event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Login(LoginContent),
    NewProxy(NewProxyContent),
    CloseProxy(CloseProxyContent),
    Ping(PingContent),
    NewWorkConn(NewWorkConnContent),
    NewUserConn(NewUserConnContent),
}

/// A decoded request: protocol version plus the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub version: Option<String>,
    pub event: ControlEvent,
}

impl ControlRequest {
    /// Decode a request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, ValidationError> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| ValidationError::MalformedBody(e.to_string()))?;

        let op = envelope
            .op
            .filter(|op| !op.is_empty())
            .ok_or(ValidationError::MissingOperation)?;
        let operation =
            Operation::parse(&op).ok_or_else(|| ValidationError::UnknownOperation(op.clone()))?;

        let content = match envelope.content {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(content) => content,
        };

        Ok(Self {
            version: envelope.version,
            event: ControlEvent::decode(operation, content)?,
        })
    }
}

impl ControlEvent {
    /// Decode `content` as the payload of `operation`.
    pub fn decode(operation: Operation, content: Value) -> Result<Self, ValidationError> {
        fn payload<T: serde::de::DeserializeOwned>(
            operation: Operation,
            content: Value,
        ) -> Result<T, ValidationError> {
            serde_json::from_value(content).map_err(|e| ValidationError::MalformedContent {
                op: operation.as_str(),
                detail: e.to_string(),
            })
        }

        // Lifecycle payloads are informational only; a shape mismatch there
        // must not cost the client its session.
        fn lenient<T: serde::de::DeserializeOwned + Default>(
            operation: Operation,
            content: Value,
        ) -> T {
            payload(operation, content).unwrap_or_else(|e| {
                tracing::debug!(op = operation.as_str(), error = %e, "Ignoring unexpected content");
                T::default()
            })
        }

        Ok(match operation {
            Operation::Login => Self::Login(payload(operation, content)?),
            Operation::NewProxy => Self::NewProxy(payload(operation, content)?),
            Operation::CloseProxy => Self::CloseProxy(lenient(operation, content)),
            Operation::Ping => Self::Ping(lenient(operation, content)),
            Operation::NewWorkConn => Self::NewWorkConn(lenient(operation, content)),
            Operation::NewUserConn => Self::NewUserConn(lenient(operation, content)),
        })
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::Login(_) => Operation::Login,
            Self::NewProxy(_) => Operation::NewProxy,
            Self::CloseProxy(_) => Operation::CloseProxy,
            Self::Ping(_) => Operation::Ping,
            Self::NewWorkConn(_) => Operation::NewWorkConn,
            Self::NewUserConn(_) => Operation::NewUserConn,
        }
    }

    /// The acting user as reported by the event, if any.
    pub fn user(&self) -> Option<&str> {
        let user = match self {
            Self::Login(c) => c.user.as_deref(),
            Self::NewProxy(c) => embedded_user(&c.user),
            Self::CloseProxy(c) => embedded_user(&c.user),
            Self::Ping(c) => embedded_user(&c.user),
            Self::NewWorkConn(c) => embedded_user(&c.user),
            Self::NewUserConn(c) => embedded_user(&c.user),
        };
        user.filter(|u| !u.is_empty())
    }
}

fn embedded_user(info: &Option<UserInfo>) -> Option<&str> {
    info.as_ref().and_then(|info| info.user.as_deref())
}
