//! QForge · Question Authoring Backend
//!
//! - Axum HTTP + WebSocket API over per-user authoring sessions
//! - Context cascades, generation and question submission against the
//!   generation service (`GenerationBackend`, HTTP client by default)
//! - Static SPA fallback (<static_dir>/index.html)
//!
//! Important env variables:
//!   PORT               : u16 (default 3000)
//!   BACKEND_BASE_URL   : generation service base URL
//!   BACKEND_API_KEY    : bearer token for the generation service
//!   QFORGE_CONFIG_PATH : path to TOML config ([server], [backend]); idle
//!                        drafts are swept after server.session_idle_secs
//!   LOG_LEVEL          : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT         : "pretty" (default) or "json"

mod telemetry;
mod util;
mod error;
mod domain;
mod arguments;
mod reducer;
mod config;
mod backend;
mod session;
mod cascade;
mod generation;
mod reuse;
mod aggregate;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::config::ServiceConfig;
use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let config = ServiceConfig::from_env();
  let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

  // Shared state: backend client and the session table.
  let state = Arc::new(AppState::new(config)?);

  // Idle draft sweep.
  let sweeper = state.clone();
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
      interval.tick().await;
      sweeper.sweep_idle(tokio::time::Instant::now()).await;
    }
  });

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  let listener = TcpListener::bind(addr).await?;
  info!(target: "qforge_backend", %addr, "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
      info!(target: "qforge_backend", "Shutdown signal received");
    })
    .await?;
  Ok(())
}
