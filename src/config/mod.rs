//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → store.rs (ArcSwap<Configuration> + login activity)
//!     → readers take Arc snapshots
//!
//! On file change:
//!     watcher.rs debounces filesystem events
//!     → ConfigStore::load re-reads and validates
//!     → atomic swap, activity merged by recency
//!     → subscribers notified through a watch channel
//!
//! On admin mutation or accepted login:
//!     ConfigStore writes a merged copy to a staging file
//!     → rename over the config file
//!     → swap in only after the write succeeded
//! ```
//!
//! # Design Decisions
//! - A snapshot is never mutated; every change builds a new `Configuration`
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - The handler path and port are read once at startup

pub mod loader;
pub mod schema;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::ConfigError;
pub use schema::{Configuration, UserRecord};
pub use store::{ConfigStore, LoginActivity, StoreError, UserView};
pub use watcher::ConfigWatcher;
