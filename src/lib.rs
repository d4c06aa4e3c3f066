//! Authorization gate and tunnel liveness prober for an frp tunnel server.

pub mod admin;
pub mod config;
pub mod control;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod probe;

pub use config::{ConfigStore, Configuration};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
