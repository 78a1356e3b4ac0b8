//! Startup orchestration.
//!
//! # Order
//! 1. Load and validate configuration (fatal on error)
//! 2. Initialize the process logger from it
//! 3. Start the config watcher
//!
//! Listeners are bound by the caller afterwards, so traffic only arrives
//! once everything above is ready.

use std::path::Path;

use thiserror::Error;

use crate::config::{ConfigError, ConfigStore, ConfigWatcher, WatchHandle};
use crate::observability::logging::{Field, Logger, LoggingError};

/// Error type for startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("logging: {0}")]
    Logging(#[from] LoggingError),
}

/// Long-lived services created at startup.
pub struct Services {
    pub store: ConfigStore,
    pub logger: Logger,
    pub watcher: ConfigWatcher,
    /// Dropping this stops hot reload.
    pub watch: WatchHandle,
}

/// Bring up config, logging and hot reload for the file at `config_path`.
///
/// Must be called from within a tokio runtime.
pub fn start(config_path: &Path) -> Result<Services, StartupError> {
    let store = ConfigStore::open(config_path)?;
    let config = store.load();

    let logger = Logger::init(&config.log)?;
    logger.info(
        "configuration loaded",
        &[
            Field::new("path", config_path.display()),
            Field::new("app", &config.app.name),
            Field::new("env", &config.app.env),
            Field::new("bind_address", config.server.bind_address()),
        ],
    );

    let watcher = ConfigWatcher::new(config_path, store.clone(), logger.clone());
    let watch = watcher.clone().spawn()?;

    Ok(Services {
        store,
        logger,
        watcher,
        watch,
    })
}
