//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum setup, tracing, panic containment)
//!     → POST <handler path> → control::authorize → Verdict
//!     → /health
//!     → /api, /debug → admin (Basic auth gate)
//! ```

pub mod server;

pub use server::{build_router, AppState, HttpServer};
