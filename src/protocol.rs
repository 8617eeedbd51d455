//! Public protocol structs for HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::domain::ServeSource;
use crate::orchestrator::ResolvedQuiz;

/// Success envelope for quiz delivery.
#[derive(Debug, Serialize)]
pub struct QuizOut {
    pub quiz: Value,
    pub meta: QuizMetaOut,
}

#[derive(Debug, Serialize)]
pub struct QuizMetaOut {
    pub source: ServeSource,
    pub generated: DateTime<Utc>,
    pub edition: &'static str,
}

/// Convert the resolved quiz (internal) to the public DTO.
pub fn to_out(r: ResolvedQuiz) -> QuizOut {
    QuizOut {
        quiz: r.quiz,
        meta: QuizMetaOut {
            source: r.source,
            generated: r.generated_at,
            edition: r.edition,
        },
    }
}

/// Structured error body with a stable machine-readable kind.
#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
    pub kind: &'static str,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
