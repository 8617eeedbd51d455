//! Loading quiz configuration (prompt + generation/edition/cache tuning) from TOML.
//!
//! See `QuizConfig` for the expected schema. Every field has a default, so an
//! absent or partial file still yields a working configuration.

use serde::Deserialize;
use tracing::{info, error};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct QuizConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub generation: GenerationCfg,
  #[serde(default)]
  pub edition: EditionCfg,
  #[serde(default)]
  pub cache: CacheCfg,
}

/// Prompt used by the Gemini client. The default asks for a current-events
/// quiz; override it in TOML to tune tone/topics.
/// `{date_range}` and `{min_questions}` are substituted at call time.
#[derive(Clone, Debug, Deserialize)]
pub struct Prompts {
  pub quiz_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      quiz_template: "You are a news quiz generator. Create a multiple-choice quiz about notable world events {date_range}. Respond ONLY with strict JSON: an object with a \"questions\" array of at least {min_questions} items. Each item has fields: id (number), question (string), options (array of 4 strings), answer (string, one of the options), explanation (string), source (object with text and url).".into(),
    }
  }
}

/// Generation requirements. The question floor is configuration, not core
/// logic: a payload below `min_questions` is rejected and never cached.
#[derive(Clone, Debug, Deserialize)]
pub struct GenerationCfg {
  #[serde(default = "default_min_questions")]
  pub min_questions: usize,
  /// How many days of news the prompt's date range covers.
  #[serde(default = "default_lookback_days")]
  pub lookback_days: i64,
}

impl Default for GenerationCfg {
  fn default() -> Self {
    Self { min_questions: default_min_questions(), lookback_days: default_lookback_days() }
  }
}

fn default_min_questions() -> usize { 15 }
fn default_lookback_days() -> i64 { 2 }

/// Edition windows are computed in this fixed offset from UTC.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct EditionCfg {
  #[serde(default)]
  pub utc_offset_minutes: i32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CacheCfg {
  /// A generation lock older than this is treated as abandoned.
  #[serde(default = "default_lock_timeout_secs")]
  pub lock_timeout_secs: u64,
  /// Single bounded wait before re-reading the cache when the lock is held.
  #[serde(default = "default_contention_wait_secs")]
  pub contention_wait_secs: u64,
}

impl Default for CacheCfg {
  fn default() -> Self {
    Self {
      lock_timeout_secs: default_lock_timeout_secs(),
      contention_wait_secs: default_contention_wait_secs(),
    }
  }
}

fn default_lock_timeout_secs() -> u64 { 120 }
fn default_contention_wait_secs() -> u64 { 5 }

/// Attempt to load `QuizConfig` from QUIZ_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_quiz_config_from_env() -> Option<QuizConfig> {
  let path = std::env::var("QUIZ_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<QuizConfig>(&s) {
      Ok(cfg) => {
        info!(target: "quizpress_backend", %path, "Loaded quiz config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "quizpress_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "quizpress_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
