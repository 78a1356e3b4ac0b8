//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Init logger → Start watcher
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger config reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then logging, then reload
//! - Fail fast: any startup error is fatal

pub mod signals;
pub mod startup;

pub use signals::{shutdown_signal, spawn_hangup_reload};
pub use startup::{start, Services, StartupError};
