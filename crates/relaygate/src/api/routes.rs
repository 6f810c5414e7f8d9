//! API route definitions.

use std::path::PathBuf;

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::ws;

use super::handlers;
use super::state::AppState;

/// Router knobs that come from configuration rather than state.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Path the relay WebSocket is mounted on.
    pub relay_path: String,
    /// Built UI bundle, served for any path no route claims.
    pub dist_dir: Option<PathBuf>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            relay_path: "/td".to_string(),
            dist_dir: None,
        }
    }
}

/// Create the application router.
pub fn create_router(state: AppState, config: &RouterConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE]);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        // Kit inventory
        .route("/api/kits", get(handlers::list_kits))
        .route("/api/kit", get(handlers::get_active_kit))
        .route("/api/kit/active", post(handlers::set_active_kit))
        // Decoder device commands
        .route(
            "/kiloview/{device_id}/reboot",
            post(handlers::reboot_device),
        )
        .route(
            "/kiloview/{device_id}/presets",
            get(handlers::device_presets),
        )
        .route(
            "/kiloview/{device_id}/current",
            get(handlers::device_current),
        )
        .route(
            "/kiloview/{device_id}/decode",
            post(handlers::switch_decoder),
        )
        // Relay
        .route(&config.relay_path, get(ws::ws_handler))
        .with_state(state);

    if let Some(dist) = &config.dist_dir {
        // Client-side routes resolve to the bundle entry point.
        let spa = ServeDir::new(dist).fallback(ServeFile::new(dist.join("index.html")));
        router = router.fallback_service(spa);
    }

    router
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(cors)
        .layer(trace_layer)
}
