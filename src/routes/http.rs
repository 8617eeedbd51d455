//! HTTP endpoint handlers. These are thin wrappers that forward to the orchestrator.
//! Each handler is instrumented and logs basic result info.

use std::sync::Arc;
use axum::{extract::State, Json, response::IntoResponse};
use tracing::{info, instrument};

use crate::error::QuizError;
use crate::protocol::{to_out, HealthOut, QuizOut};
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_get_quiz(
  State(state): State<Arc<AppState>>,
) -> Result<Json<QuizOut>, QuizError> {
  let resolved = state.orchestrator.resolve().await?;
  info!(target: "quiz", source = %resolved.source, edition = resolved.edition, "HTTP quiz served");
  Ok(Json(to_out(resolved)))
}
