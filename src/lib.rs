//! Service runtime library.
//!
//! Hot-reloadable configuration, structured logging with optional file
//! rotation, and HTTP middleware for access logging and panic recovery.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::{ConfigStore, ConfigWatcher, ServiceConfig};
pub use http::HttpServer;
pub use observability::{Field, Logger};
