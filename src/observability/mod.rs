//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Components and middleware:
//!     → logging.rs (Logger: leveled records with key-value fields)
//!     → sink.rs (stdout, rotating file, or in-memory buffer)
//! ```
//!
//! # Design Decisions
//! - One logger per process, built from config at startup
//! - Records are line-oriented for grep and log shippers
//! - Logging never fails the caller

pub mod logging;
pub mod sink;

pub use logging::{Field, Logger, LoggingError};
pub use sink::{BufferSink, RotatingFileSink, RotationPolicy};
