//! OS signal handling.
//!
//! # Responsibilities
//! - SIGTERM/SIGINT → resolve the shutdown future
//! - SIGHUP → reload configuration, not shutdown

use tokio::task::JoinHandle;

use crate::config::ConfigWatcher;

/// Resolves on Ctrl+C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

/// Reload the watched file on every SIGHUP.
///
/// Outcomes are logged by [`ConfigWatcher::reload`]. Returns `None` where
/// SIGHUP does not exist or the handler cannot be installed.
pub fn spawn_hangup_reload(watcher: ConfigWatcher) -> Option<JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler");
                return None;
            }
        };
        Some(tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                tracing::info!("SIGHUP received, reloading configuration");
                let watcher = watcher.clone();
                // Success and failure are logged by `reload` itself.
                if let Err(e) = tokio::task::spawn_blocking(move || watcher.reload()).await {
                    tracing::error!(error = %e, "Config reload task failed");
                }
            }
        }))
    }

    #[cfg(not(unix))]
    {
        let _ = watcher;
        None
    }
}
