//! Built-in service endpoints.

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::config::ConfigStore;

/// `/health` and `/version`.
pub fn service_routes(store: ConfigStore) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .with_state(store)
}

async fn health() -> &'static str {
    "ok"
}

/// Reads the live snapshot, so a reload shows up on the next call.
async fn version(State(store): State<ConfigStore>) -> Json<Value> {
    let config = store.load();
    Json(json!({
        "name": config.app.name,
        "env": config.app.env,
        "version": config.app.version,
    }))
}
