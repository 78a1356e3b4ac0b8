//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → middleware/request_log.rs (timing, access record)
//!     → middleware/recovery.rs (panic boundary)
//!     → application handlers (handlers.rs and the embedding service)
//!     → Send to client
//! ```

pub mod context;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use context::{client_ip, RequestErrors};
pub use server::{build_router, HttpServer};
