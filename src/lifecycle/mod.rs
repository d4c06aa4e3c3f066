//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config (fatal on error) → start watcher → bind → serve
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C → broadcast → server drains, watcher stops → exit
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
