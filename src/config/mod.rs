//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (YAML/TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → store.rs (Arc<ServiceConfig> behind ArcSwap, read by all subsystems)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap in store.rs (or keep old config and log the failure)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - Optional sections have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Startup load failures are fatal, reload failures are not

pub mod loader;
pub mod schema;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{LogConfig, LogLevel, RecoveryConfig, ServiceConfig};
pub use store::ConfigStore;
pub use watcher::{ConfigWatcher, WatchHandle};
