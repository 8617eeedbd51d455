//! Minimal Gemini client for quiz generation.
//!
//! We only call generateContent and request a strict JSON payload. Calls are
//! instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key (it travels in a header, not the URL) and
//! we keep payload truncations short.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{instrument, info, error};

use crate::config::{GenerationCfg, Prompts};
use crate::util::{fill_template, trunc_for_log};

/// Supplies "now" to the orchestrator. Swapped for a fixed clock in tests.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Produces a fresh quiz payload for the window containing `now`.
/// The Gemini client is the real implementation; tests substitute their own.
#[async_trait]
pub trait QuizGenerator: Send + Sync {
  async fn generate(&self, now: DateTime<Utc>) -> Result<Value, String>;
}

#[derive(Clone)]
pub struct GeminiClient {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub prompts: Prompts,
  pub generation: GenerationCfg,
}

impl GeminiClient {
  /// Construct the client if we find GEMINI_API_KEY; otherwise return None.
  pub fn from_env(prompts: Prompts, generation: GenerationCfg) -> Option<Self> {
    let api_key = std::env::var("GEMINI_API_KEY").ok()?;
    let base_url = std::env::var("GEMINI_BASE_URL")
      .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into());
    let model =
      std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".into());
    let timeout_secs = std::env::var("GEMINI_TIMEOUT_SECS")
      .ok()
      .and_then(|s| s.parse::<u64>().ok())
      .unwrap_or(60);

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(timeout_secs))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, model, prompts, generation })
  }

  /// "between <start> and <end>" covering the configured lookback window.
  fn date_range(&self, now: DateTime<Utc>) -> String {
    let start = now - chrono::Duration::days(self.generation.lookback_days);
    format!(
      "between {} and {}",
      start.format("%B %-d, %Y"),
      now.format("%B %-d, %Y")
    )
  }

  /// One generateContent call, returning the quiz JSON decoded from the
  /// model's text part.
  #[instrument(level = "info", skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
  async fn generate_content(&self, prompt: &str) -> Result<Value, String> {
    let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
    let req = GenerateContentRequest {
      contents: vec![Content { parts: vec![Part { text: prompt.to_string() }] }],
      tools: vec![Tool { google_search: GoogleSearch {} }],
      generation_config: GenerationConfig { response_mime_type: "application/json".into() },
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "quizpress-backend/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("x-goog-api-key", &self.api_key)
      .json(&req).send().await.map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_gemini_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(format!("Gemini HTTP {}: {}", status, msg));
    }

    let body: GenerateContentResponse = res.json().await.map_err(|e| e.to_string())?;
    if let Some(usage) = &body.usage_metadata {
      info!(prompt_tokens = ?usage.prompt_token_count, candidate_tokens = ?usage.candidates_token_count, total_tokens = ?usage.total_token_count, "Gemini usage");
    }
    let text = body.candidates.get(0)
      .and_then(|c| c.content.parts.get(0))
      .and_then(|p| p.text.clone())
      .ok_or_else(|| "No content found in Gemini response".to_string())?;

    serde_json::from_str::<Value>(&text)
      .map_err(|e| format!("Quiz JSON parse error: {} (payload: {})", e, trunc_for_log(&text, 120)))
  }
}

#[async_trait]
impl QuizGenerator for GeminiClient {
  #[instrument(level = "info", skip(self), fields(model = %self.model))]
  async fn generate(&self, now: DateTime<Utc>) -> Result<Value, String> {
    let prompt = fill_template(
      &self.prompts.quiz_template,
      &[
        ("date_range", &self.date_range(now)),
        ("min_questions", &self.generation.min_questions.to_string()),
      ],
    );

    let start = std::time::Instant::now();
    let result = self.generate_content(&prompt).await;
    let elapsed = start.elapsed();

    match result {
      Ok(quiz) => {
        info!(?elapsed, "Model response received successfully");
        Ok(quiz)
      }
      Err(e) => {
        error!(?elapsed, error = %e, "Model call failed during quiz generation");
        Err(format!("Model generation failed: {e}"))
      }
    }
  }
}

// --- generateContent DTOs ---

#[derive(Serialize)]
struct GenerateContentRequest {
  contents: Vec<Content>,
  tools: Vec<Tool>,
  #[serde(rename = "generationConfig")]
  generation_config: GenerationConfig,
}
#[derive(Serialize)]
struct Content { parts: Vec<Part> }
#[derive(Serialize)]
struct Part { text: String }
#[derive(Serialize)]
struct Tool { google_search: GoogleSearch }
#[derive(Serialize)]
struct GoogleSearch {}
#[derive(Serialize)]
struct GenerationConfig {
  #[serde(rename = "responseMimeType")]
  response_mime_type: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
  #[serde(default)] candidates: Vec<Candidate>,
  #[serde(default, rename = "usageMetadata")] usage_metadata: Option<UsageMetadata>,
}
#[derive(Deserialize)]
struct Candidate { #[serde(default)] content: CandidateContent }
#[derive(Deserialize, Default)]
struct CandidateContent { #[serde(default)] parts: Vec<CandidatePart> }
#[derive(Deserialize)]
struct CandidatePart { #[serde(default)] text: Option<String> }
#[derive(Deserialize)]
struct UsageMetadata {
  #[serde(default, rename = "promptTokenCount")] prompt_token_count: Option<u32>,
  #[serde(default, rename = "candidatesTokenCount")] candidates_token_count: Option<u32>,
  #[serde(default, rename = "totalTokenCount")] total_token_count: Option<u32>,
}

/// Try to extract a clean error message from a Gemini error body.
fn extract_gemini_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}
