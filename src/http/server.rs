//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wrap the application Router with the middleware stack
//! - Bind server to listener
//! - Serve until the shutdown future resolves

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{middleware::from_fn_with_state, Router};
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};

use crate::config::ConfigStore;
use crate::http::middleware::{recovery_middleware, request_log_middleware, RecoveryState};
use crate::observability::logging::{Field, Logger};

/// HTTP server for the service.
pub struct HttpServer {
    router: Router,
    logger: Logger,
}

impl HttpServer {
    /// Create a server around the application's routes.
    pub fn new(routes: Router, store: ConfigStore, logger: Logger) -> Self {
        let router = build_router(routes, store, logger.clone());
        Self { router, logger }
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        self.logger
            .info("HTTP server starting", &[Field::new("address", addr)]);

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        self.logger.info("HTTP server stopped", &[]);
        Ok(())
    }
}

/// Apply the middleware stack to `routes`.
///
/// Outermost first: request log, request id, recovery, timeout. The request
/// timeout is fixed at startup; everything else reads the live config.
#[allow(deprecated)]
pub fn build_router(routes: Router, store: ConfigStore, logger: Logger) -> Router {
    let request_timeout = Duration::from_secs(store.load().server.request_timeout_secs);
    let recovery = RecoveryState::new(store, logger.clone());

    routes
        .layer(TimeoutLayer::new(request_timeout))
        .layer(from_fn_with_state(recovery, recovery_middleware))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(from_fn_with_state(logger, request_log_middleware))
}
