//! Router assembly: session API, WebSocket upgrade, static SPA, CORS and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Versioned JSON API, mounted under `/api/v1`.
fn api() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(http::http_health))
        .route("/catalog", get(http::http_get_catalog))
        .route("/sessions", post(http::http_create_session))
        .route("/sessions/:id", get(http::http_get_session).delete(http::http_delete_session))
        .route("/sessions/:id/commands", post(http::http_post_command))
}

/// Full application router. `/ws/:id` attaches a socket to an existing
/// session; anything unmatched falls through to the SPA in `static_dir`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.server.static_dir.clone();
    let spa = ServeDir::new(&static_dir)
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new(format!("{static_dir}/index.html")));

    let trace = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/ws/:id", get(ws::ws_upgrade))
        .nest("/api/v1", api())
        .with_state(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(trace)
        .fallback_service(spa)
}
