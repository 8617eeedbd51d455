//! Error taxonomy surfaced to HTTP callers.
//!
//! Propagation policy:
//! - store failures on the read path are absorbed by the orchestrator (miss)
//! - store failures on the lock/write path surface as `StoreUnavailable`
//! - generation failures are surfaced without any in-request retry
//! - the generation lock is released before any error return (guard drop)

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use thiserror::Error;

use crate::protocol::ErrorOut;

/// Failures of the durable medium backing the cache and lock files.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
}

/// Everything a quiz request can fail with, with a stable machine-readable kind.
#[derive(Debug, Error)]
pub enum QuizError {
  #[error("server configuration error: {0}")]
  Configuration(String),
  #[error("quiz store unavailable: {0}")]
  StoreUnavailable(#[from] StoreError),
  #[error("failed to generate quiz: {0}")]
  GenerationFailed(String),
  #[error("quiz generation is in progress; please try again in a moment")]
  RegenerationInProgress,
}

impl QuizError {
  pub fn kind(&self) -> &'static str {
    match self {
      QuizError::Configuration(_) => "configuration",
      QuizError::StoreUnavailable(_) => "store_unavailable",
      QuizError::GenerationFailed(_) => "generation_failed",
      QuizError::RegenerationInProgress => "regeneration_in_progress",
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      QuizError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
      QuizError::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
      QuizError::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
      QuizError::RegenerationInProgress => StatusCode::SERVICE_UNAVAILABLE,
    }
  }
}

impl IntoResponse for QuizError {
  fn into_response(self) -> Response {
    let status = self.status();
    let body = Json(ErrorOut { error: self.to_string(), kind: self.kind() });
    (status, body).into_response()
  }
}
