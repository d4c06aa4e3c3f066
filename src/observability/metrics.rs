//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tunnel_gate_verdicts_total` (counter): control verdicts by op, outcome
//! - `tunnel_gate_probes_total` (counter): liveness results by status
//! - `tunnel_gate_config_reloads_total` (counter): watcher reloads by result
//!
//! Recording is a no-op until [`init_metrics`] installs the Prometheus
//! recorder.

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

pub const COUNTER_VERDICTS: &str = "tunnel_gate_verdicts_total";
pub const COUNTER_PROBES: &str = "tunnel_gate_probes_total";
pub const COUNTER_CONFIG_RELOADS: &str = "tunnel_gate_config_reloads_total";

/// Install the Prometheus recorder with its own scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_verdict(op: &str, accepted: bool) {
    let outcome = if accepted { "accept" } else { "reject" };
    counter!(COUNTER_VERDICTS, "op" => op.to_string(), "outcome" => outcome).increment(1);
}

pub fn record_probe(status: &'static str) {
    counter!(COUNTER_PROBES, "status" => status).increment(1);
}

pub fn record_reload(ok: bool) {
    let result = if ok { "success" } else { "failure" };
    counter!(COUNTER_CONFIG_RELOADS, "result" => result).increment(1);
}
