//! Per-request context shared along the middleware chain.
//!
//! # Responsibilities
//! - Collect non-fatal errors raised while handling a request
//! - Resolve the client address behind proxies

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};

/// Non-fatal errors attached to a request while it is handled.
///
/// The request log middleware inserts one per request and reads it back
/// after the response is produced. Handlers add to it through the
/// extractor:
///
/// ```rust,ignore
/// async fn handler(errors: RequestErrors) -> StatusCode {
///     errors.push("cache miss, served from database");
///     StatusCode::OK
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestErrors {
    inner: Arc<Mutex<Vec<String>>>,
}

impl RequestErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, err: impl fmt::Display) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(err.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Error #01: first` / `Error #02: second`, one per line.
    pub fn joined(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .enumerate()
            .map(|(i, err)| format!("Error #{:02}: {}", i + 1, err))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl<S> FromRequestParts<S> for RequestErrors
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Without the request log layer errors go nowhere, but handlers
        // still work.
        Ok(parts
            .extensions
            .get::<RequestErrors>()
            .cloned()
            .unwrap_or_default())
    }
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// TCP peer. Empty when none is known.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}
