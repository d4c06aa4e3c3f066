//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! control, probe and config subsystems produce:
//!     → tracing events (req_id, op, user, subdomain fields)
//!     → metrics.rs counters (verdicts, probes, reloads)
//!
//! Consumers:
//!     → stdout via tracing-subscriber fmt layer
//!     → optional Prometheus scrape listener
//! ```

pub mod logging;
pub mod metrics;
