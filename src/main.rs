//! Quizpress · Twice-Daily News Quiz Backend
//!
//! - Axum HTTP API serving the current quiz edition
//! - Gemini integration for quiz generation (via environment variables)
//! - Durable file cache + generation lock under QUIZ_DATA_DIR
//!
//! Important env variables:
//!   PORT          : u16 (default 3000)
//!   GEMINI_API_KEY    : enables quiz generation if present
//!   GEMINI_BASE_URL    : default "https://generativelanguage.googleapis.com/v1beta"
//!   GEMINI_MODEL  : default "gemini-1.5-flash"
//!   GEMINI_TIMEOUT_SECS : generation request timeout (default 60)
//!   QUIZ_CONFIG_PATH  : path to TOML config (prompt + generation/cache tuning)
//!   QUIZ_DATA_DIR    : cache + lock directory (default "./cache")
//!   LOG_LEVEL    : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT      : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod config;
mod error;
mod edition;
mod cache;
mod lock;
mod orchestrator;
mod gemini;
mod state;
mod protocol;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (durable stores, Gemini client, prompts).
  let state = Arc::new(AppState::new());

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "quizpress_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).await?;
  Ok(())
}
