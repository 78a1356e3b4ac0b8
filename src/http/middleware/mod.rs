//! Request middleware.
//!
//! # Order (outermost first)
//! ```text
//! request_log → request id → recovery → timeout → handler
//! ```
//! The access log wraps recovery so it records the status recovery sets.

pub mod recovery;
pub mod request_log;

pub use recovery::{recovery_middleware, ConnectionAborted, Fault, FaultKind, RecoveryState};
pub use request_log::request_log_middleware;
