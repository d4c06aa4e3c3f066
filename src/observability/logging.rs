//! Structured logging.
//!
//! The filter follows the configuration's `debug` flag at runtime: the
//! subscriber is installed with a reloadable `EnvFilter` and every adopted
//! configuration swaps it. An explicit `RUST_LOG` pins the filter instead.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::Configuration;

const DEBUG_DIRECTIVES: &str = "tunnel_gate=debug,tower_http=debug";
const DEFAULT_DIRECTIVES: &str = "tunnel_gate=info,tower_http=info";

/// Directives for the given debug flag.
pub fn directives(debug: bool) -> &'static str {
    if debug {
        DEBUG_DIRECTIVES
    } else {
        DEFAULT_DIRECTIVES
    }
}

/// Handle for adjusting the installed filter.
#[derive(Clone)]
pub struct LogControl {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl LogControl {
    /// Install the global subscriber.
    pub fn init(debug: bool) -> Self {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer())
                    .init();
                Self { handle: None }
            }
            Err(_) => {
                let (filter, handle) = reload::Layer::new(EnvFilter::new(directives(debug)));
                tracing_subscriber::registry()
                    .with(filter)
                    .with(tracing_subscriber::fmt::layer())
                    .init();
                Self {
                    handle: Some(handle),
                }
            }
        }
    }

    /// Switch between debug and default verbosity. No-op under `RUST_LOG`.
    pub fn set_debug(&self, enabled: bool) {
        let Some(handle) = &self.handle else {
            return;
        };
        match handle.reload(EnvFilter::new(directives(enabled))) {
            Ok(()) => tracing::info!(debug = enabled, "Log level updated"),
            Err(e) => tracing::warn!(error = %e, "Failed to update log level"),
        }
    }
}

/// Apply the debug flag of every configuration published on `updates`.
pub async fn follow_debug_flag(
    control: LogControl,
    mut updates: watch::Receiver<Arc<Configuration>>,
) {
    let mut debug = updates.borrow_and_update().debug;
    while updates.changed().await.is_ok() {
        let next = updates.borrow_and_update().debug;
        if next != debug {
            debug = next;
            control.set_debug(debug);
        }
    }
}
