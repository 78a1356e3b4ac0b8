//! Panic recovery middleware.
//!
//! # Responsibilities
//! - Catch panics raised while the rest of the chain handles a request
//! - Tell a dead client connection apart from any other fault
//! - Log the fault with a header-only dump of the request
//! - Answer 500, or nothing useful when the peer is already gone
//!
//! # Per-request States
//! ```text
//! Running ──► Completed          (handler returned)
//!         └─► FaultIntercepted   (handler panicked)
//!               ├─ BrokenConnection → log, record on RequestErrors, empty 499
//!               └─ Generic          → log (+ stack), 500
//! ```
//!
//! # Design Decisions
//! - The dump is taken before the handler runs and never includes the body
//! - Credentials in headers are masked in the dump
//! - Whether to capture a stack is read from the live config per request
//! - A process panic hook records where the panic happened (and the stack)
//!   while the unwinding frames still exist; panics outside a recovery
//!   scope go to the previous hook unchanged

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode, Uri, Version},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;

use crate::config::ConfigStore;
use crate::http::context::RequestErrors;
use crate::observability::logging::{Field, Logger};

/// Headers whose values never reach the logs.
const REDACTED_HEADERS: [&str; 3] = ["authorization", "proxy-authorization", "cookie"];

/// Marker extension on responses to requests whose client disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionAborted;

/// State for [`recovery_middleware`].
#[derive(Clone)]
pub struct RecoveryState {
    store: ConfigStore,
    logger: Logger,
}

impl RecoveryState {
    /// Also installs the panic hook, see [`install_panic_hook`].
    pub fn new(store: ConfigStore, logger: Logger) -> Self {
        install_panic_hook();
        Self { store, logger }
    }
}

/// What kind of fault a panic represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The client connection is already reset or closed.
    BrokenConnection,
    /// Anything else.
    Generic,
}

/// A panic caught by [`recovery_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    /// Classify a panic payload.
    ///
    /// Payloads are usually `&str` or `String` from `panic!`, but handlers
    /// may also `panic_any` an `io::Error`.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        if let Some(err) = payload.downcast_ref::<io::Error>() {
            let message = err.to_string();
            let kind = match err.kind() {
                io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                    FaultKind::BrokenConnection
                }
                _ => classify_message(&message),
            };
            return Self { kind, message };
        }

        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(err) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
            err.to_string()
        } else {
            "unknown panic payload".to_string()
        };

        Self {
            kind: classify_message(&message),
            message,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn classify_message(message: &str) -> FaultKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("broken pipe") || lower.contains("connection reset by peer") {
        FaultKind::BrokenConnection
    } else {
        FaultKind::Generic
    }
}

thread_local! {
    /// `Some(capture_stack)` while a request inside [`recovery_middleware`]
    /// is being polled on this thread.
    static SCOPE: Cell<Option<bool>> = const { Cell::new(None) };

    /// Filled by the panic hook, drained by the middleware that catches it.
    static LAST_PANIC: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

/// Where a contained panic was raised.
#[derive(Debug)]
pub struct PanicSite {
    pub location: Option<String>,
    pub stack: Option<Backtrace>,
}

/// Install the process panic hook used by [`recovery_middleware`].
///
/// Idempotent. Panics raised inside a recovery scope are recorded for the
/// middleware and not printed; all others reach the previous hook.
pub fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| match SCOPE.with(Cell::get) {
            Some(capture_stack) => {
                let site = PanicSite {
                    location: info.location().map(ToString::to_string),
                    stack: capture_stack.then(Backtrace::force_capture),
                };
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(site));
            }
            None => previous(info),
        }));
    });
}

fn take_panic_site() -> Option<PanicSite> {
    LAST_PANIC.with(|slot| slot.borrow_mut().take())
}

/// Marks every poll of the wrapped future as a recovery scope.
struct Scoped<F> {
    inner: Pin<Box<F>>,
    capture_stack: bool,
}

/// Restores the enclosing scope, also when a poll unwinds.
struct ScopeGuard(Option<bool>);

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE.with(|scope| scope.set(self.0));
    }
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        // Drop anything left by a panic the inner future caught itself.
        LAST_PANIC.with(|slot| slot.borrow_mut().take());
        let _guard = ScopeGuard(SCOPE.with(|scope| scope.replace(Some(this.capture_stack))));
        this.inner.as_mut().poll(cx)
    }
}

/// Request line and headers, without the body.
#[derive(Debug, Clone)]
pub struct RequestDump {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
}

impl RequestDump {
    pub fn capture(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
        }
    }
}

impl fmt::Display for RequestDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}\r\n", self.method, self.uri, self.version)?;
        for (name, value) in &self.headers {
            if REDACTED_HEADERS.contains(&name.as_str()) {
                write!(f, "{name}: *\r\n")?;
            } else {
                write!(f, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()))?;
            }
        }
        Ok(())
    }
}

pub async fn recovery_middleware(
    State(state): State<RecoveryState>,
    request: Request,
    next: Next,
) -> Response {
    let dump = RequestDump::capture(&request);
    let errors = request.extensions().get::<RequestErrors>().cloned();
    let scoped = Scoped {
        inner: Box::pin(next.run(request)),
        capture_stack: state.store.load().recovery.stack,
    };

    match AssertUnwindSafe(scoped).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            let fault = Fault::from_panic(payload.as_ref());
            handle_fault(&state, fault, take_panic_site(), &dump, errors.as_ref())
        }
    }
}

fn handle_fault(
    state: &RecoveryState,
    fault: Fault,
    site: Option<PanicSite>,
    dump: &RequestDump,
    errors: Option<&RequestErrors>,
) -> Response {
    let location = site.as_ref().and_then(|site| site.location.clone());

    match fault.kind {
        FaultKind::BrokenConnection => {
            let mut fields = vec![Field::new("error", &fault), Field::new("request", dump)];
            if let Some(location) = location {
                fields.push(Field::new("location", location));
            }
            state.logger.error("broken connection", &fields);
            if let Some(errors) = errors {
                errors.push(&fault);
            }
            // The peer is gone; whatever we return is never read.
            let mut response = Response::new(Body::empty());
            *response.status_mut() =
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST);
            response.extensions_mut().insert(ConnectionAborted);
            response
        }
        FaultKind::Generic => {
            let mut fields = vec![Field::new("error", &fault), Field::new("request", dump)];
            if let Some(location) = location {
                fields.push(Field::new("location", location));
            }
            if let Some(stack) = site.and_then(|site| site.stack) {
                fields.push(Field::new("stack", stack));
            }
            state.logger.error("recovered from panic", &fields);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request as HttpRequest};

    #[test]
    fn classifies_string_payloads() {
        let generic: Box<dyn Any + Send> = Box::new("index out of bounds");
        assert_eq!(Fault::from_panic(generic.as_ref()).kind, FaultKind::Generic);

        let broken: Box<dyn Any + Send> =
            Box::new(String::from("write failed: Broken pipe (os error 32)"));
        let fault = Fault::from_panic(broken.as_ref());
        assert_eq!(fault.kind, FaultKind::BrokenConnection);
        assert_eq!(fault.message, "write failed: Broken pipe (os error 32)");

        let reset: Box<dyn Any + Send> = Box::new("read: connection reset by peer");
        assert_eq!(Fault::from_panic(reset.as_ref()).kind, FaultKind::BrokenConnection);
    }

    #[test]
    fn classifies_io_error_payloads() {
        let pipe: Box<dyn Any + Send> = Box::new(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(Fault::from_panic(pipe.as_ref()).kind, FaultKind::BrokenConnection);

        let reset: Box<dyn Any + Send> =
            Box::new(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(Fault::from_panic(reset.as_ref()).kind, FaultKind::BrokenConnection);

        let other: Box<dyn Any + Send> = Box::new(io::Error::other("disk full"));
        let fault = Fault::from_panic(other.as_ref());
        assert_eq!(fault.kind, FaultKind::Generic);
        assert_eq!(fault.message, "disk full");
    }

    #[test]
    fn unknown_payload_is_generic() {
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        let fault = Fault::from_panic(payload.as_ref());
        assert_eq!(fault.kind, FaultKind::Generic);
        assert_eq!(fault.message, "unknown panic payload");
    }

    #[inline(never)]
    fn failing_ledger_check() {
        panic!("ledger out of balance");
    }

    #[tokio::test]
    async fn panic_site_is_captured_before_unwinding() {
        install_panic_hook();
        let scoped = Scoped {
            inner: Box::pin(async {
                failing_ledger_check();
            }),
            capture_stack: true,
        };

        let result = AssertUnwindSafe(scoped).catch_unwind().await;
        assert!(result.is_err());

        let site = take_panic_site().expect("hook records the panic");
        assert!(site.location.unwrap().contains("recovery.rs"));
        let stack = site.stack.unwrap().to_string();
        assert!(stack.contains("failing_ledger_check"), "{stack}");
        assert!(SCOPE.with(Cell::get).is_none());
    }

    #[tokio::test]
    async fn stack_is_skipped_when_not_requested() {
        install_panic_hook();
        let scoped = Scoped {
            inner: Box::pin(async {
                failing_ledger_check();
            }),
            capture_stack: false,
        };

        assert!(AssertUnwindSafe(scoped).catch_unwind().await.is_err());

        let site = take_panic_site().unwrap();
        assert!(site.location.is_some());
        assert!(site.stack.is_none());
    }

    #[test]
    fn dump_masks_credentials_and_skips_body() {
        let mut request = HttpRequest::builder()
            .method("POST")
            .uri("/orders?id=7")
            .body(Body::from("secret-body"))
            .unwrap();
        let headers = request.headers_mut();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc"));
        headers.insert("cookie", HeaderValue::from_static("session=xyz"));
        headers.insert("x-trace", HeaderValue::from_static("t-1"));

        let dump = RequestDump::capture(&request).to_string();

        assert!(dump.starts_with("POST /orders?id=7 HTTP/1.1\r\n"));
        assert!(dump.contains("authorization: *\r\n"));
        assert!(dump.contains("cookie: *\r\n"));
        assert!(dump.contains("x-trace: t-1\r\n"));
        assert!(!dump.contains("abc"));
        assert!(!dump.contains("xyz"));
        assert!(!dump.contains("secret-body"));
    }
}
