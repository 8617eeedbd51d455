//! Durable quiz cache: a single JSON entry, replaced atomically.
//!
//! The store keeps the last generated quiz together with the edition key it
//! was generated for. Entries are immutable; regeneration writes a whole new
//! entry (last-writer-wins). Writes go to a unique temp file in the same
//! directory followed by a rename, so a concurrent reader never observes a
//! partially written entry.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;

pub const CACHE_FILE: &str = "quiz_cache.json";

/// The last generated quiz plus the edition key it was generated for.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
  pub key: String,
  pub quiz: Value,
  pub generated_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct CacheStore {
  path: PathBuf,
}

impl CacheStore {
  pub fn new(data_dir: impl AsRef<Path>) -> Self {
    Self { path: data_dir.as_ref().join(CACHE_FILE) }
  }

  /// Read the stored entry. A missing or unparsable file is a miss, not an
  /// error; only unrecoverable I/O faults surface as `Err`.
  pub fn read(&self) -> Result<Option<CacheEntry>, StoreError> {
    let raw = match fs::read_to_string(&self.path) {
      Ok(s) => s,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(StoreError::Io(e)),
    };
    match serde_json::from_str::<CacheEntry>(&raw) {
      Ok(entry) => Ok(Some(entry)),
      Err(e) => {
        warn!(target: "quiz", path = %self.path.display(), error = %e, "Cache file unparsable; treating as empty");
        Ok(None)
      }
    }
  }

  /// Persist a new entry, creating the data directory on demand.
  pub fn write(&self, entry: &CacheEntry) -> Result<(), StoreError> {
    if let Some(dir) = self.path.parent() {
      fs::create_dir_all(dir)?;
    }
    let body = serde_json::to_string_pretty(entry)?;
    // Unique temp name: concurrent writers must not clobber each other's
    // half-written temp files.
    let tmp = self.path.with_file_name(format!("{}.tmp-{}", CACHE_FILE, Uuid::new_v4()));
    fs::write(&tmp, body)?;
    if let Err(e) = fs::rename(&tmp, &self.path) {
      let _ = fs::remove_file(&tmp);
      return Err(StoreError::Io(e));
    }
    debug!(target: "quiz", path = %self.path.display(), key = %entry.key, "Cache entry written");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tempfile::tempdir;

  fn entry(key: &str) -> CacheEntry {
    CacheEntry {
      key: key.to_string(),
      quiz: json!({ "questions": [ { "question": "q?", "options": ["a"], "answer": "a" } ] }),
      generated_at: Utc::now(),
    }
  }

  #[test]
  fn absent_file_is_a_miss() {
    let dir = tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    assert!(store.read().unwrap().is_none());
  }

  #[test]
  fn corrupt_file_is_a_miss_not_an_error() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join(CACHE_FILE), "{ not json").unwrap();
    let store = CacheStore::new(dir.path());
    assert!(store.read().unwrap().is_none());
  }

  #[test]
  fn write_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    store.write(&entry("2025-09-10-AM")).unwrap();
    let back = store.read().unwrap().unwrap();
    assert_eq!(back.key, "2025-09-10-AM");
    assert_eq!(back.quiz["questions"][0]["answer"], "a");
  }

  #[test]
  fn write_replaces_the_previous_entry() {
    let dir = tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    store.write(&entry("2025-09-10-AM")).unwrap();
    store.write(&entry("2025-09-10-PM")).unwrap();
    assert_eq!(store.read().unwrap().unwrap().key, "2025-09-10-PM");
  }

  #[test]
  fn write_creates_the_data_dir() {
    let dir = tempdir().unwrap();
    let store = CacheStore::new(dir.path().join("nested/cache"));
    store.write(&entry("2025-09-10-AM")).unwrap();
    assert!(store.read().unwrap().is_some());
  }

  #[test]
  fn no_temp_files_left_behind() {
    let dir = tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    store.write(&entry("2025-09-10-AM")).unwrap();
    let names: Vec<_> = fs::read_dir(dir.path())
      .unwrap()
      .map(|e| e.unwrap().file_name().into_string().unwrap())
      .collect();
    assert_eq!(names, vec![CACHE_FILE.to_string()]);
  }
}
