//! The cache/regeneration state machine.
//!
//! Every request reconstructs its decision from the durable stores: check
//! the cached entry against the current edition key, and on a miss either
//! win the generation lock and regenerate, or wait out the flight that did
//! and re-read once. The orchestrator keeps no state of its own between
//! calls, so parallel requests and restarts coordinate purely through the
//! cache and lock files.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::domain::{validate_quiz, ServeSource};
use crate::edition::EditionPolicy;
use crate::error::QuizError;
use crate::gemini::{Clock, QuizGenerator};
use crate::lock::LockCoordinator;

/// A quiz ready to serve, with provenance metadata.
#[derive(Clone, Debug)]
pub struct ResolvedQuiz {
  pub quiz: Value,
  pub source: ServeSource,
  pub generated_at: DateTime<Utc>,
  pub edition: &'static str,
}

pub struct QuizOrchestrator {
  pub cache: CacheStore,
  pub lock: LockCoordinator,
  pub policy: EditionPolicy,
  pub generator: Option<Arc<dyn QuizGenerator>>,
  pub clock: Arc<dyn Clock>,
  pub min_questions: usize,
  pub contention_wait: Duration,
}

impl QuizOrchestrator {
  /// Resolve the quiz for "now": serve the cached edition when valid,
  /// otherwise regenerate under the lock, or wait briefly for the flight
  /// that holds it.
  #[instrument(level = "info", skip(self))]
  pub async fn resolve(&self) -> Result<ResolvedQuiz, QuizError> {
    // Missing credentials are a deployment problem; bail before touching
    // any store.
    let generator = self.generator.as_ref().ok_or_else(|| {
      QuizError::Configuration("generation API key is not configured".into())
    })?;

    let now = self.clock.now();
    let key = self.policy.key_for(now);

    if let Some(entry) = self.read_cache_for(&key) {
      info!(target: "quiz", %key, source = %ServeSource::Cache, "Serving cached edition");
      return Ok(self.resolved(entry, ServeSource::Cache, now));
    }

    match self.lock.try_acquire(now) {
      Some(_guard) => {
        // We own the flight. The guard releases the lock on every exit
        // path below, early error returns and panics included.
        let quiz = generator.generate(now).await.map_err(QuizError::GenerationFailed)?;
        validate_quiz(&quiz, self.min_questions).map_err(QuizError::GenerationFailed)?;

        let entry = CacheEntry { key: key.clone(), quiz, generated_at: now };
        self.cache.write(&entry)?;
        info!(target: "quiz", %key, source = %ServeSource::Api, "Fresh quiz generated and cached");
        Ok(self.resolved(entry, ServeSource::Api, now))
      }
      None => {
        // Another flight is regenerating. One bounded wait, one re-read;
        // callers retry at the transport level if that is not enough.
        info!(target: "quiz", %key, wait = ?self.contention_wait, "Lock held; waiting for the in-flight generation");
        tokio::time::sleep(self.contention_wait).await;
        match self.read_cache_for(&key) {
          Some(entry) => {
            info!(target: "quiz", %key, "In-flight generation finished; serving its result");
            Ok(self.resolved(entry, ServeSource::Cache, now))
          }
          None => {
            warn!(target: "quiz", %key, "Cache still invalid after waiting on the lock");
            Err(QuizError::RegenerationInProgress)
          }
        }
      }
    }
  }

  /// Cache read scoped to the current key. Store failures degrade to a
  /// miss; an entry with a different key is the same as no entry at all.
  fn read_cache_for(&self, key: &str) -> Option<CacheEntry> {
    match self.cache.read() {
      Ok(Some(entry)) if entry.key == key => Some(entry),
      Ok(Some(entry)) => {
        debug!(target: "quiz", stored = %entry.key, current = %key, "Cached edition is stale");
        None
      }
      Ok(None) => None,
      Err(e) => {
        warn!(target: "quiz", error = %e, "Cache read failed; treating as miss");
        None
      }
    }
  }

  fn resolved(&self, entry: CacheEntry, source: ServeSource, now: DateTime<Utc>) -> ResolvedQuiz {
    ResolvedQuiz {
      quiz: entry.quiz,
      source,
      generated_at: entry.generated_at,
      edition: self.policy.edition_label(now),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::Path;
  use std::sync::atomic::{AtomicUsize, Ordering};

  use chrono::TimeZone;
  use serde_json::json;
  use tempfile::tempdir;

  struct FixedClock(DateTime<Utc>);
  impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
      self.0
    }
  }

  struct FakeGenerator {
    quiz: Value,
    calls: AtomicUsize,
    delay: Duration,
    fail: bool,
  }

  impl FakeGenerator {
    fn returning(quiz: Value) -> Arc<Self> {
      Arc::new(Self { quiz, calls: AtomicUsize::new(0), delay: Duration::ZERO, fail: false })
    }

    fn slow(quiz: Value, delay: Duration) -> Arc<Self> {
      Arc::new(Self { quiz, calls: AtomicUsize::new(0), delay, fail: false })
    }

    fn failing() -> Arc<Self> {
      Arc::new(Self { quiz: Value::Null, calls: AtomicUsize::new(0), delay: Duration::ZERO, fail: true })
    }
  }

  #[async_trait::async_trait]
  impl QuizGenerator for FakeGenerator {
    async fn generate(&self, _now: DateTime<Utc>) -> Result<Value, String> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }
      if self.fail {
        Err("provider exploded".into())
      } else {
        Ok(self.quiz.clone())
      }
    }
  }

  fn quiz_with(n: u32) -> Value {
    let questions: Vec<Value> = (0..n)
      .map(|i| {
        json!({
          "id": i,
          "question": format!("Question {i}?"),
          "options": ["a", "b", "c", "d"],
          "answer": "a"
        })
      })
      .collect();
    json!({ "questions": questions })
  }

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 10, 9, 0, 0).unwrap()
  }

  fn orchestrator(dir: &Path, generator: Option<Arc<FakeGenerator>>) -> QuizOrchestrator {
    QuizOrchestrator {
      cache: CacheStore::new(dir),
      lock: LockCoordinator::new(dir, Duration::from_secs(120)),
      policy: EditionPolicy::new(0),
      generator: generator.map(|g| g as Arc<dyn QuizGenerator>),
      clock: Arc::new(FixedClock(now())),
      min_questions: 3,
      contention_wait: Duration::from_millis(50),
    }
  }

  #[tokio::test]
  async fn missing_generator_is_a_configuration_error() {
    let dir = tempdir().unwrap();
    let orch = orchestrator(dir.path(), None);
    let err = orch.resolve().await.unwrap_err();
    assert_eq!(err.kind(), "configuration");
    // Detected before any cache/lock interaction: nothing was created.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }

  #[tokio::test]
  async fn valid_cache_is_served_verbatim() {
    let dir = tempdir().unwrap();
    let gen = FakeGenerator::returning(quiz_with(3));
    let orch = orchestrator(dir.path(), Some(gen.clone()));

    let stored = quiz_with(5);
    orch.cache
      .write(&CacheEntry { key: orch.policy.key_for(now()), quiz: stored.clone(), generated_at: now() })
      .unwrap();

    let out = orch.resolve().await.unwrap();
    assert_eq!(out.source, ServeSource::Cache);
    assert_eq!(out.quiz, stored);
    assert_eq!(out.edition, "Morning Edition");
    assert_eq!(gen.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn stale_key_is_never_served_and_triggers_regeneration() {
    let dir = tempdir().unwrap();
    let fresh = quiz_with(3);
    let gen = FakeGenerator::returning(fresh.clone());
    let orch = orchestrator(dir.path(), Some(gen.clone()));

    orch.cache
      .write(&CacheEntry { key: "2025-09-09-PM".into(), quiz: quiz_with(5), generated_at: now() })
      .unwrap();

    let out = orch.resolve().await.unwrap();
    assert_eq!(out.source, ServeSource::Api);
    assert_eq!(out.quiz, fresh);
    assert_eq!(gen.calls.load(Ordering::SeqCst), 1);
    assert_eq!(orch.cache.read().unwrap().unwrap().key, "2025-09-10-AM");
  }

  #[tokio::test]
  async fn short_quiz_is_rejected_and_not_persisted() {
    let dir = tempdir().unwrap();
    let gen = FakeGenerator::returning(quiz_with(2));
    let orch = orchestrator(dir.path(), Some(gen.clone()));

    let err = orch.resolve().await.unwrap_err();
    assert_eq!(err.kind(), "generation_failed");
    assert!(orch.cache.read().unwrap().is_none());
    // The lock was released on the error path.
    assert!(orch.lock.try_acquire(now()).is_some());
  }

  #[tokio::test]
  async fn generator_failure_surfaces_and_releases_the_lock() {
    let dir = tempdir().unwrap();
    let gen = FakeGenerator::failing();
    let orch = orchestrator(dir.path(), Some(gen.clone()));

    let err = orch.resolve().await.unwrap_err();
    assert_eq!(err.kind(), "generation_failed");
    assert!(err.to_string().contains("provider exploded"));
    assert!(orch.lock.try_acquire(now()).is_some());
  }

  #[tokio::test]
  async fn lock_is_free_after_a_successful_flight() {
    let dir = tempdir().unwrap();
    let gen = FakeGenerator::returning(quiz_with(3));
    let orch = orchestrator(dir.path(), Some(gen));

    orch.resolve().await.unwrap();
    assert!(orch.lock.try_acquire(now()).is_some());
  }

  #[tokio::test]
  async fn concurrent_misses_generate_exactly_once() {
    let dir = tempdir().unwrap();
    let quiz = quiz_with(3);
    let gen = FakeGenerator::slow(quiz.clone(), Duration::from_millis(20));
    let orch = Arc::new(QuizOrchestrator {
      contention_wait: Duration::from_millis(200),
      ..orchestrator(dir.path(), Some(gen.clone()))
    });

    let tasks: Vec<_> = (0..5)
      .map(|_| {
        let orch = orch.clone();
        tokio::spawn(async move { orch.resolve().await })
      })
      .collect();

    for task in tasks {
      let out = task.await.unwrap().unwrap();
      assert_eq!(out.quiz, quiz);
    }
    assert_eq!(gen.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn loser_never_calls_the_generator() {
    let dir = tempdir().unwrap();
    let gen = FakeGenerator::returning(quiz_with(3));
    let orch = orchestrator(dir.path(), Some(gen.clone()));

    // Someone else holds the lock and never finishes.
    let _held = orch.lock.try_acquire(now()).unwrap();

    let err = orch.resolve().await.unwrap_err();
    assert_eq!(err.kind(), "regeneration_in_progress");
    assert_eq!(gen.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn waiter_picks_up_the_other_flights_result() {
    let dir = tempdir().unwrap();
    let gen = FakeGenerator::returning(quiz_with(3));
    let orch = Arc::new(QuizOrchestrator {
      contention_wait: Duration::from_millis(100),
      ..orchestrator(dir.path(), Some(gen.clone()))
    });

    let held = orch.lock.try_acquire(now()).unwrap();
    let waiter = {
      let orch = orch.clone();
      tokio::spawn(async move { orch.resolve().await })
    };

    // While the waiter sleeps, the holder finishes and publishes its entry.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let published = quiz_with(4);
    orch.cache
      .write(&CacheEntry { key: orch.policy.key_for(now()), quiz: published.clone(), generated_at: now() })
      .unwrap();
    drop(held);

    let out = waiter.await.unwrap().unwrap();
    assert_eq!(out.source, ServeSource::Cache);
    assert_eq!(out.quiz, published);
    assert_eq!(gen.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn corrupt_cache_is_a_miss_and_regenerates() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join(crate::cache::CACHE_FILE), "][ nope").unwrap();
    let gen = FakeGenerator::returning(quiz_with(3));
    let orch = orchestrator(dir.path(), Some(gen.clone()));

    let out = orch.resolve().await.unwrap();
    assert_eq!(out.source, ServeSource::Api);
    assert_eq!(gen.calls.load(Ordering::SeqCst), 1);
  }
}
