//! Domain models used by the backend: serve provenance and quiz validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where did the served quiz come from?
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServeSource {
  /// Read back from the durable cache for the current edition.
  Cache,
  /// Freshly generated via the Gemini API during this request.
  Api,
}

impl std::fmt::Display for ServeSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ServeSource::Cache => write!(f, "cache"),
      ServeSource::Api => write!(f, "api"),
    }
  }
}

/// Structural validation for a generated quiz payload.
///
/// The quiz stays an opaque blob everywhere else; this is the only place that
/// looks inside it. A payload that fails here is a generation failure and
/// must never reach the cache. The question floor comes from configuration.
pub fn validate_quiz(quiz: &Value, min_questions: usize) -> Result<(), String> {
  let questions = quiz
    .get("questions")
    .and_then(Value::as_array)
    .ok_or_else(|| "quiz payload has no questions array".to_string())?;

  if questions.len() < min_questions {
    return Err(format!(
      "quiz has {} questions; at least {} required",
      questions.len(),
      min_questions
    ));
  }

  for (idx, q) in questions.iter().enumerate() {
    let question_ok = q.get("question").and_then(Value::as_str).map_or(false, |s| !s.is_empty());
    let options_ok = q.get("options").and_then(Value::as_array).map_or(false, |a| !a.is_empty());
    let answer_ok = q.get("answer").and_then(Value::as_str).map_or(false, |s| !s.is_empty());
    if !question_ok || !options_ok || !answer_ok {
      return Err(format!("question {} is missing required fields", idx));
    }
  }

  Ok(())
}
