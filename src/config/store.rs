//! The single owner of configuration state.
//!
//! Holds the current [`Configuration`] snapshot and the login activity
//! observed at runtime. Readers take cheap `Arc` snapshots; every write to
//! the file goes through one process-wide exclusive section so that saves
//! never interleave with each other or with a reload.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::loader::{load_config, write_config, ConfigError};
use crate::config::schema::{Configuration, UserRecord};

/// Last observed login of a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginActivity {
    pub last_login: DateTime<Utc>,
    pub last_ip: String,
}

/// Failure of an administrative mutation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("User already exists")]
    Conflict,

    #[error("User not found")]
    NotFound,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Admin listing entry for one user.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub user: String,
    pub token: String,
    pub subdomain: String,
    pub last_login: Option<DateTime<Utc>>,
    pub last_ip: Option<String>,
}

/// Configuration store backed by a TOML file.
pub struct ConfigStore {
    path: PathBuf,
    current: ArcSwap<Configuration>,
    activity: DashMap<String, LoginActivity>,
    last_reload: ArcSwap<DateTime<Utc>>,
    write_gate: Mutex<()>,
    updates: watch::Sender<Arc<Configuration>>,
}

impl ConfigStore {
    /// Open the store with an initial load. Failure here is fatal to startup.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = Arc::new(load_config(&path)?);
        let (updates, _) = watch::channel(config.clone());

        let store = Self {
            path,
            current: ArcSwap::new(config.clone()),
            activity: DashMap::new(),
            last_reload: ArcSwap::from_pointee(Utc::now()),
            write_gate: Mutex::new(()),
            updates,
        };
        store.adopt_activity(&config);
        Ok(store)
    }

    /// Path of the persisted configuration.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current configuration snapshot.
    pub fn snapshot(&self) -> Arc<Configuration> {
        self.current.load_full()
    }

    /// Time of the last successful load.
    pub fn last_reload(&self) -> DateTime<Utc> {
        **self.last_reload.load()
    }

    /// Receive every configuration adopted by a successful load.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Configuration>> {
        self.updates.subscribe()
    }

    /// Number of users with recorded login activity.
    pub fn active_users(&self) -> usize {
        self.activity.len()
    }

    /// Activity recorded for a user, if any.
    pub fn activity(&self, user: &str) -> Option<LoginActivity> {
        self.activity.get(user).map(|entry| entry.value().clone())
    }

    /// Re-read the file and swap it in. On failure the previous
    /// configuration stays in place.
    pub fn load(&self) -> Result<Arc<Configuration>, ConfigError> {
        let _gate = self.lock();
        let config = Arc::new(load_config(&self.path)?);

        self.adopt_activity(&config);
        self.current.store(config.clone());
        self.last_reload.store(Arc::new(Utc::now()));
        self.updates.send_replace(config.clone());

        tracing::info!(users = config.users.len(), "Configuration reloaded");
        Ok(config)
    }

    /// Merge login activity into the configuration and persist it.
    pub fn save(&self) -> Result<(), ConfigError> {
        let _gate = self.lock();
        self.persist(&self.base())
    }

    /// Record a successful login and persist it.
    pub fn record_activity(
        &self,
        user: &str,
        ip: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ConfigError> {
        let _gate = self.lock();
        self.activity.insert(
            user.to_string(),
            LoginActivity {
                last_login: at,
                last_ip: ip.to_string(),
            },
        );
        self.persist(&self.base())
    }

    /// Register a new user whose subdomain equals its identifier.
    pub fn add_user(&self, user: &str, token: &str) -> Result<(), StoreError> {
        self.mutate(|config| {
            if config.users.contains_key(user) {
                return Err(StoreError::Conflict);
            }
            config
                .users
                .insert(user.to_string(), UserRecord::new(user, token));
            Ok(())
        })
    }

    /// Replace a user's token. `None` re-persists the record unchanged.
    pub fn update_token(&self, user: &str, token: Option<&str>) -> Result<(), StoreError> {
        self.mutate(|config| {
            let record = config.users.get_mut(user).ok_or(StoreError::NotFound)?;
            if let Some(token) = token {
                record.token = token.to_string();
            }
            Ok(())
        })
    }

    /// Remove a user together with its login activity.
    pub fn delete_user(&self, user: &str) -> Result<(), StoreError> {
        self.mutate(|config| {
            config.users.remove(user).ok_or(StoreError::NotFound)?;
            Ok(())
        })?;
        self.activity.remove(user);
        Ok(())
    }

    /// Users with their resolved subdomain and last activity.
    pub fn user_views(&self) -> Vec<UserView> {
        let config = self.snapshot();
        config
            .users
            .iter()
            .map(|(user, record)| {
                let activity = self.activity(user);
                UserView {
                    user: user.clone(),
                    token: record.token.clone(),
                    subdomain: record.subdomain_for(user).to_string(),
                    last_login: activity.as_ref().map(|a| a.last_login),
                    last_ip: activity.map(|a| a.last_ip),
                }
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` to a copy of the configuration, persist it, and only
    /// then make it current.
    fn mutate<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Configuration) -> Result<(), StoreError>,
    {
        let _gate = self.lock();
        let mut working = self.base();
        change(&mut working)?;
        self.persist(&working)?;
        Ok(())
    }

    /// What a write starts from: the file as it is now, so that edits the
    /// watcher has not picked up yet are kept. Falls back to the snapshot
    /// when the file cannot be read or parsed. Caller holds the gate.
    fn base(&self) -> Configuration {
        match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Config file unreadable, saving from the in-memory configuration"
                );
                Configuration::clone(&self.current.load())
            }
        }
    }

    /// Write `base` merged with login activity. Caller holds the gate.
    fn persist(&self, base: &Configuration) -> Result<(), ConfigError> {
        let merged = self.merged(base);
        if let Err(e) = write_config(&self.path, &merged) {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to save configuration");
            return Err(e);
        }
        self.current.store(Arc::new(merged));
        tracing::debug!(path = %self.path.display(), "Configuration saved");
        Ok(())
    }

    fn merged(&self, base: &Configuration) -> Configuration {
        let mut merged = base.clone();
        for (user, record) in merged.users.iter_mut() {
            let Some(activity) = self.activity.get(user) else {
                continue;
            };
            if record.last_login.map_or(true, |on_file| activity.last_login >= on_file) {
                record.last_login = Some(activity.last_login);
                record.last_ip = Some(activity.last_ip.clone());
            }
        }
        merged
    }

    /// Rebuild activity for the users of a newly loaded configuration.
    /// The newer of file and memory wins; users no longer present are dropped.
    fn adopt_activity(&self, config: &Configuration) {
        self.activity.retain(|user, _| config.users.contains_key(user));

        for (user, record) in &config.users {
            let Some(last_login) = record.last_login else {
                continue;
            };
            let from_file = LoginActivity {
                last_login,
                last_ip: record.last_ip.clone().unwrap_or_else(|| "unknown".to_string()),
            };
            self.activity
                .entry(user.clone())
                .and_modify(|current| {
                    if from_file.last_login >= current.last_login {
                        *current = from_file.clone();
                    }
                })
                .or_insert_with(|| from_file.clone());
        }
    }
}
