//! Per-request access log.
//!
//! Emits one Debug record per request once the response is known:
//! `status method path query ip user-agent errors cost`.
//! Installed outermost so it sees responses produced by recovery.

use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::header::USER_AGENT,
    middleware::Next,
    response::Response,
};
use tracing::Level;

use crate::http::context::{client_ip, RequestErrors};
use crate::observability::logging::{Field, Logger};

pub async fn request_log_middleware(
    State(logger): State<Logger>,
    mut request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();

    // Handlers and recovery append to this; we read it after the response.
    let errors = RequestErrors::new();
    request.extensions_mut().insert(errors.clone());

    if !logger.enabled(Level::DEBUG) {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let query = request.uri().query().unwrap_or_default().to_owned();
    let ip = client_ip(request.headers(), request.extensions());
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    let response = next.run(request).await;
    let cost = start.elapsed();

    logger.debug(
        "request",
        &[
            Field::new("status", response.status().as_u16()),
            Field::new("method", method),
            Field::new("path", path),
            Field::new("query", query),
            Field::new("ip", ip),
            Field::new("user-agent", user_agent),
            Field::new("errors", errors.joined()),
            Field::debug("cost", cost),
        ],
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    use crate::config::schema::{LogConfig, LogLevel};
    use crate::observability::sink::BufferSink;

    fn logger(level: LogLevel) -> (Logger, BufferSink) {
        let sink = BufferSink::new();
        let config = LogConfig {
            level,
            ..LogConfig::default()
        };
        (Logger::with_writer(&config, sink.clone()), sink)
    }

    fn app(logger: Logger) -> Router {
        Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route(
                "/teapot",
                get(|errors: RequestErrors| async move {
                    errors.push("cache unavailable");
                    errors.push("fallback used");
                    StatusCode::IM_A_TEAPOT
                }),
            )
            .layer(from_fn_with_state(logger, request_log_middleware))
    }

    #[tokio::test]
    async fn logs_one_record_per_request() {
        let (logger, sink) = logger(LogLevel::Debug);

        let response = app(logger)
            .oneshot(
                HttpRequest::builder()
                    .uri("/ok?page=2")
                    .header("user-agent", "curl/8.4")
                    .header("x-real-ip", "10.1.2.3")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(line.contains("\tDEBUG\t"));
        assert!(line.contains(
            r#"status=200 method=GET path=/ok query="page=2" ip=10.1.2.3 user-agent=curl/8.4 errors="" cost="#
        ));
    }

    #[tokio::test]
    async fn logs_handler_status_and_errors() {
        let (logger, sink) = logger(LogLevel::Debug);

        let response = app(logger)
            .oneshot(HttpRequest::builder().uri("/teapot").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);

        let line = &sink.lines()[0];
        assert!(line.contains("status=418"));
        assert!(line.contains(r#"errors="Error #01: cache unavailable\nError #02: fallback used""#));
    }

    #[tokio::test]
    async fn silent_above_debug() {
        let (logger, sink) = logger(LogLevel::Info);

        app(logger)
            .oneshot(HttpRequest::builder().uri("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(sink.lines().is_empty());
    }
}
