use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use raidsync_core::config::RaidsyncConfig;
use raidsync_notify::Hub;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::http;

/// Shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: RaidsyncConfig,
    pub hub: Arc<Hub>,
}

impl AppState {
    /// Build state with a fresh hub. The caller decides when to `start` it.
    pub fn new(config: RaidsyncConfig) -> Self {
        let hub = Arc::new(Hub::new(config.notify.clone()));
        Self { config, hub }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.gateway.cors_origins);

    Router::new()
        .route("/health", get(http::health::health_handler))
        .route("/api/events/updates", get(http::events::subscribe_handler))
        .route(
            "/api/events/last-updated",
            get(http::events::last_updated_handler),
        )
        .route(
            "/api/events/announce",
            post(http::announce::announce_handler),
        )
        .route(
            "/api/last-updated",
            get(http::events::last_updated_json_handler),
        )
        .with_state(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Any origin when the list is empty, otherwise only the listed ones.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
