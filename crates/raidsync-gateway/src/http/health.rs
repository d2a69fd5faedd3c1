use axum::{extract::State, Json};
use raidsync_notify::event::format_timestamp;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe, returns server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "live_connections": state.hub.live_count(),
        "last_updated": format_timestamp(&state.hub.last_updated()),
    }))
}
