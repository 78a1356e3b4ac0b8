//! Service runtime.
//!
//! # Architecture Overview
//!
//! ```text
//!     config file ──▶ ConfigStore ◀── ConfigWatcher (file events, SIGHUP)
//!                         │
//!                         ▼
//!     Client ──▶ request log ──▶ request id ──▶ recovery ──▶ timeout ──▶ handler
//!                    │                              │
//!                    └──────────▶ Logger ◀──────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use service_runtime::config::load_config;
use service_runtime::http::handlers::service_routes;
use service_runtime::lifecycle::{self, shutdown_signal, spawn_hangup_reload};
use service_runtime::HttpServer;

#[derive(Parser)]
#[command(name = "service-runtime")]
#[command(about = "HTTP service with hot-reloaded configuration", long_about = None)]
struct Args {
    /// Path to the YAML or TOML configuration file
    #[arg(short, long, env = "SERVICE_CONFIG", default_value = "config/config.yaml")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.check {
        let config = load_config(&args.config)?;
        println!(
            "{}: ok ({} on {})",
            args.config.display(),
            config.app.name,
            config.server.bind_address()
        );
        return Ok(());
    }

    let services = lifecycle::start(&args.config)?;
    let _hangup = spawn_hangup_reload(services.watcher.clone());

    let bind_address = services.store.load().server.bind_address();
    let listener = TcpListener::bind(&bind_address).await?;

    let server = HttpServer::new(
        service_routes(services.store.clone()),
        services.store.clone(),
        services.logger.clone(),
    );
    server.run(listener, shutdown_signal()).await?;

    drop(services.watch);
    services.logger.info("shutdown complete", &[]);
    Ok(())
}
