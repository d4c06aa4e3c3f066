//! Tunnel liveness probing.
//!
//! A subdomain is checked in up to two outbound requests; see
//! [`prober`] for the decision sequence and [`liveness`] for the JSON
//! shape of a result.

pub mod liveness;
pub mod prober;

pub use liveness::{Liveness, OfflineKind, ProbeReport, TunerIdentity, WarningKind};
pub use prober::{is_valid_subdomain, LivenessProber, ProbeSettings, TargetError};
