//! Application state: durable stores, edition policy, Gemini client, prompts.
//!
//! This module owns:
//!   - the quiz orchestrator (cache + lock + policy + generator wiring)
//!   - nothing else: the orchestrator keeps no in-memory quiz state, so
//!     every request decides from the durable cache and lock and restarts
//!     are harmless.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::cache::CacheStore;
use crate::config::load_quiz_config_from_env;
use crate::edition::EditionPolicy;
use crate::gemini::{GeminiClient, QuizGenerator, SystemClock};
use crate::lock::LockCoordinator;
use crate::orchestrator::QuizOrchestrator;

pub struct AppState {
    pub orchestrator: QuizOrchestrator,
}

impl AppState {
    /// Build state from env: load config, open the stores, init the Gemini client.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let config = load_quiz_config_from_env().unwrap_or_default();

        let data_dir = std::env::var("QUIZ_DATA_DIR").unwrap_or_else(|_| "./cache".into());
        let cache = CacheStore::new(&data_dir);
        let lock =
            LockCoordinator::new(&data_dir, Duration::from_secs(config.cache.lock_timeout_secs));
        let policy = EditionPolicy::new(config.edition.utc_offset_minutes);

        info!(
            target: "quiz",
            %data_dir,
            min_questions = config.generation.min_questions,
            lock_timeout_secs = config.cache.lock_timeout_secs,
            contention_wait_secs = config.cache.contention_wait_secs,
            utc_offset_minutes = config.edition.utc_offset_minutes,
            "Quiz store configured"
        );

        // Build optional Gemini client (if API key present).
        let gemini = GeminiClient::from_env(config.prompts.clone(), config.generation.clone());
        match &gemini {
            Some(g) => {
                info!(target: "quizpress_backend", base_url = %g.base_url, model = %g.model, "Gemini enabled.")
            }
            None => {
                info!(target: "quizpress_backend", "Gemini disabled (no GEMINI_API_KEY). Quiz requests will fail until configured.")
            }
        }

        let orchestrator = QuizOrchestrator {
            cache,
            lock,
            policy,
            generator: gemini.map(|g| Arc::new(g) as Arc<dyn QuizGenerator>),
            clock: Arc::new(SystemClock),
            min_questions: config.generation.min_questions,
            contention_wait: Duration::from_secs(config.cache.contention_wait_secs),
        };

        Self { orchestrator }
    }
}
