//! Shared, hot-swappable configuration snapshot.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::ServiceConfig;

/// Holds the current [`ServiceConfig`].
///
/// Reads are lock-free and never wait on a concurrent [`replace`]. A reader
/// gets an `Arc` to a complete snapshot and keeps it alive for as long as it
/// needs; the snapshot is freed once the last reader drops it after a newer
/// one has been installed.
///
/// [`replace`]: ConfigStore::replace
#[derive(Clone)]
pub struct ConfigStore {
    /// `ArcSwap` is not `Clone`; the outer `Arc` lets the store be moved
    /// into tasks and axum state.
    inner: Arc<ArcSwap<ServiceConfig>>,
    generation: Arc<AtomicU64>,
}

impl ConfigStore {
    /// Create a store around an already-validated snapshot.
    pub fn new(initial: ServiceConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Load, validate and wrap the configuration file at `path`.
    ///
    /// Any failure here is a startup failure; nothing is defaulted.
    pub fn open(path: &Path) -> Result<Self, ConfigError> {
        load_config(path).map(Self::new)
    }

    /// Get the current snapshot.
    pub fn load(&self) -> Arc<ServiceConfig> {
        self.inner.load_full()
    }

    /// Install `candidate` as the current snapshot.
    ///
    /// Every `load` that starts after this returns sees `candidate` or a
    /// later replacement.
    pub fn replace(&self, candidate: ServiceConfig) {
        self.inner.store(Arc::new(candidate));
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of successful replacements since creation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("generation", &self.generation())
            .field("app", &self.load().app.name)
            .finish()
    }
}
