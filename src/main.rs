//! tunnel-gate
//!
//! Server-plugin endpoint for an frp tunnel server plus an operator API.
//!
//! ```text
//!   frp server ──POST <path>──▶ control::authorize ──▶ Verdict
//!                                     │ accepted Login
//!                                     ▼
//!   config.toml ◀── save ──── ConfigStore ◀── reload ── ConfigWatcher
//!                                     ▲
//!   operator ──/api, /debug──▶ admin ─┘──▶ LivenessProber ──▶ https://<sub>.<domain>
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use tunnel_gate::config::{ConfigStore, ConfigWatcher};
use tunnel_gate::http::{AppState, HttpServer};
use tunnel_gate::lifecycle::Shutdown;
use tunnel_gate::observability::{logging, metrics};
use tunnel_gate::probe::{prober::DEFAULT_BATCH_CONCURRENCY, LivenessProber, ProbeSettings};

#[derive(Parser, Debug)]
#[command(name = "tunnel-gate", version, about = "frp server plugin and tunnel status service")]
struct Args {
    /// Configuration file
    #[arg(long, env = "CONFIG_PATH", default_value = "./config.toml")]
    config: PathBuf,

    /// Domain the tunnel subdomains live under
    #[arg(long, env = "TUNNEL_DOMAIN", default_value = "example.com")]
    tunnel_domain: String,

    /// Per-request liveness probe timeout
    #[arg(long, env = "PROBE_TIMEOUT_MS", default_value_t = 5000)]
    probe_timeout_ms: u64,

    /// Quiet period before a changed config file is reloaded
    #[arg(long, env = "RELOAD_DEBOUNCE_MS", default_value_t = 1000)]
    reload_debounce_ms: u64,

    /// Scheme used to reach tunnels
    #[arg(long, env = "PROBE_SCHEME", default_value = "https")]
    probe_scheme: String,

    /// Prometheus listener address; disabled when unset
    #[arg(long, env = "METRICS_ADDRESS")]
    metrics_address: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let store = match ConfigStore::open(&args.config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            // No subscriber yet.
            eprintln!("failed to load {}: {}", args.config.display(), e);
            return Err(e.into());
        }
    };
    let config = store.snapshot();

    let log_control = logging::LogControl::init(config.debug);
    tokio::spawn(logging::follow_debug_flag(log_control, store.subscribe()));

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        users = config.users.len(),
        debug = config.debug,
        "tunnel-gate starting"
    );
    tracing::info!(
        path = %store.path().display(),
        users = config.users.len(),
        with_activity = store.active_users(),
        "Configuration loaded"
    );
    if config.admin_credentials().is_none() {
        tracing::warn!("No admin credentials configured, admin API is open");
    }

    if let Some(addr) = args.metrics_address {
        metrics::init_metrics(addr);
    }

    let shutdown = Shutdown::new();
    shutdown.listen_for_ctrl_c();

    let _watcher = ConfigWatcher::new(
        &args.config,
        Duration::from_millis(args.reload_debounce_ms),
    )
    .spawn(store.clone(), shutdown.subscribe());

    let prober = LivenessProber::new(ProbeSettings {
        tunnel_domain: args.tunnel_domain.clone(),
        scheme: args.probe_scheme.clone(),
        timeout: Duration::from_millis(args.probe_timeout_ms),
        concurrency: DEFAULT_BATCH_CONCURRENCY,
    })?;
    tracing::info!(tunnel_domain = %args.tunnel_domain, "Liveness prober ready");

    let listener = TcpListener::bind(("0.0.0.0", config.server.port)).await?;
    let server = HttpServer::new(AppState { store, prober });
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!(
        still_subscribed = shutdown.receiver_count(),
        "Shutdown complete"
    );
    Ok(())
}
