//! Configuration schema definitions.
//!
//! This module defines the persisted configuration of the gate: the admin
//! credential pair, the registered tunnel users and the server binding.
//! All types derive Serde traits for (de)serialization from the TOML file.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder written in place of every token by introspection endpoints.
pub const TOKEN_PLACEHOLDER: &str = "***hidden***";

/// Root configuration, replaced wholesale on every reload.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct Configuration {
    /// Verbose diagnostics and the `/debug` introspection endpoints.
    pub debug: bool,

    /// Network binding and control-event endpoint path.
    pub server: ServerSettings,

    /// Credentials for the admin surface. Absent means open access.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin: Option<AdminCredentials>,

    /// Registered tunnel users keyed by user identifier.
    pub users: BTreeMap<String, UserRecord>,
}

impl Configuration {
    /// Look up a user record.
    pub fn user(&self, user: &str) -> Option<&UserRecord> {
        self.users.get(user)
    }

    /// Resolve the subdomain a user may register, if the user exists.
    pub fn allowed_subdomain<'a>(&'a self, user: &'a str) -> Option<&'a str> {
        self.users.get(user).map(|record| record.subdomain_for(user))
    }

    /// Admin username and password, only when both are configured.
    pub fn admin_credentials(&self) -> Option<(&str, &str)> {
        let admin = self.admin.as_ref()?;
        let username = admin.username.as_deref().filter(|u| !u.is_empty())?;
        let password = admin.password.as_deref().filter(|p| !p.is_empty())?;
        Some((username, password))
    }

    /// A copy safe to expose: every token replaced by [`TOKEN_PLACEHOLDER`].
    pub fn redacted(&self) -> Configuration {
        let mut copy = self.clone();
        for record in copy.users.values_mut() {
            record.token = TOKEN_PLACEHOLDER.to_string();
        }
        if let Some(admin) = copy.admin.as_mut() {
            if admin.password.is_some() {
                admin.password = Some(TOKEN_PLACEHOLDER.to_string());
            }
        }
        copy
    }
}

/// Server binding settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    /// TCP port to listen on.
    pub port: u16,

    /// Path of the control-event endpoint.
    pub path: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 7002,
            path: "/handler".to_string(),
        }
    }
}

/// HTTP Basic credentials gating `/api` and `/debug`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AdminCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// A registered tunnel user.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UserRecord {
    /// Shared secret, compared by exact string equality.
    pub token: String,

    /// Routing label under the tunnel domain. Defaults to the user identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,

    /// Written as an RFC 3339 string; hand edits may use a bare TOML datetime.
    #[serde(
        default,
        deserialize_with = "login_time::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_login: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ip: Option<String>,
}

impl UserRecord {
    /// A fresh record whose subdomain equals the user identifier.
    pub fn new(user: &str, token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            subdomain: Some(user.to_string()),
            last_login: None,
            last_ip: None,
        }
    }

    /// The subdomain this user owns. Every reader goes through here.
    pub fn subdomain_for<'a>(&'a self, user: &'a str) -> &'a str {
        self.subdomain
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(user)
    }
}

mod login_time {
    use std::fmt;

    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::{self, value::MapAccessDeserializer, MapAccess, Visitor};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LoginTime).map(Some)
    }

    /// Offset-less datetimes are taken as UTC.
    fn parse(text: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(text)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    struct LoginTime;

    impl<'de> Visitor<'de> for LoginTime {
        type Value = DateTime<Utc>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an RFC 3339 timestamp")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
            parse(value).ok_or_else(|| E::custom(format!("invalid timestamp '{}'", value)))
        }

        fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
            let native = toml::value::Datetime::deserialize(MapAccessDeserializer::new(map))?;
            self.visit_str(&native.to_string())
        }
    }
}
