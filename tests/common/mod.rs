//! Shared utilities for integration tests.

use std::fs;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use service_runtime::config::loader::{parse_config, ConfigFormat};
use service_runtime::config::{LogConfig, LogLevel};
use service_runtime::observability::BufferSink;
use service_runtime::{ConfigStore, HttpServer, Logger, ServiceConfig};

/// Minimal valid YAML document listening on `port`.
pub fn yaml_config(port: u16, extra: &str) -> String {
    format!("app:\n  name: test-service\nserver:\n  host: 127.0.0.1\n  port: {port}\n{extra}")
}

#[allow(dead_code)]
pub fn service_config(extra: &str) -> ServiceConfig {
    parse_config(&yaml_config(8080, extra), ConfigFormat::Yaml).unwrap()
}

/// Write `content` to `service.yaml` in a fresh temporary directory.
#[allow(dead_code)]
pub fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("service.yaml");
    fs::write(&path, content).unwrap();
    (dir, path)
}

/// A logger writing into memory at `level`.
pub fn buffer_logger(level: LogLevel) -> (Logger, BufferSink) {
    let sink = BufferSink::new();
    let config = LogConfig {
        level,
        ..LogConfig::default()
    };
    (Logger::with_writer(&config, sink.clone()), sink)
}

/// A running server on an ephemeral port. Dropping it shuts the server down.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    #[allow(dead_code)]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Serve `routes` behind the full middleware stack.
#[allow(dead_code)]
pub async fn start_server(routes: Router, store: ConfigStore, logger: Logger) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    let server = HttpServer::new(routes, store, logger);
    tokio::spawn(server.run(listener, async move {
        let _ = rx.await;
    }));

    TestServer {
        addr,
        shutdown: Some(tx),
    }
}

/// Poll `check` until it holds or `timeout` elapses.
#[allow(dead_code)]
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check().await
}
