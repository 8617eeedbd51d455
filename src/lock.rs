//! Durable generation lock with a staleness timeout.
//!
//! The lock is a JSON file holding `held_since` and a holder token. Acquire
//! races are settled by the exclusive-create semantics of the filesystem: of
//! any number of concurrent callers, exactly one wins the `O_EXCL` create. A
//! lock older than the timeout is presumed abandoned by a crashed holder and
//! may be reclaimed; reclamation re-reads the record immediately before
//! removal and only removes the exact bytes it judged stale, then re-runs
//! the exclusive create, so racing reclaimers also resolve to a single
//! winner.
//!
//! Fail-closed: if the backing medium misbehaves, `try_acquire` reports the
//! lock as held. Callers never regenerate without a confirmed lock.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

pub const LOCK_FILE: &str = "quiz_generation.lock";

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
  held_since: DateTime<Utc>,
  token: Uuid,
}

#[derive(Clone, Debug)]
pub struct LockCoordinator {
  path: PathBuf,
  timeout: Duration,
  // In-process check-and-set atomicity; the exclusive create remains the
  // cross-process funnel (single-instance deployment assumption).
  serial: Arc<Mutex<()>>,
}

impl LockCoordinator {
  pub fn new(data_dir: impl AsRef<Path>, timeout: Duration) -> Self {
    Self { path: data_dir.as_ref().join(LOCK_FILE), timeout, serial: Arc::new(Mutex::new(())) }
  }

  /// Attempt to take the lock. `None` means it is held by a live flight, or
  /// the backing medium failed (fail closed).
  pub fn try_acquire(&self, now: DateTime<Utc>) -> Option<LockGuard> {
    let _serial = self.serial.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(dir) = self.path.parent() {
      if let Err(e) = fs::create_dir_all(dir) {
        warn!(target: "quiz", error = %e, "Lock directory unavailable; treating lock as held");
        return None;
      }
    }

    match self.create_exclusive(now) {
      Ok(guard) => return Some(guard),
      Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
      Err(e) => {
        warn!(target: "quiz", error = %e, "Lock create failed; treating lock as held");
        return None;
      }
    }

    // A lock file exists. Read and judge it; a holder younger than the
    // timeout keeps the lock.
    let judged = match fs::read_to_string(&self.path) {
      Ok(raw) => raw,
      // Vanished between create and read: the holder just released. One
      // more exclusive create settles it.
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        return self.create_exclusive(now).ok();
      }
      Err(e) => {
        warn!(target: "quiz", error = %e, "Lock read failed; treating lock as held");
        return None;
      }
    };
    if !self.is_stale(&judged, now) {
      return None;
    }

    // Stale: the holder is presumed dead. Re-read right before removal and
    // only remove the exact record we judged, never a lock another flight
    // just refreshed.
    debug!(target: "quiz", path = %self.path.display(), "Reclaiming stale generation lock");
    match fs::read_to_string(&self.path) {
      Ok(current) if current == judged => {}
      Ok(_) => return None,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(_) => return None,
    }
    match fs::remove_file(&self.path) {
      Ok(()) => {}
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => {
        warn!(target: "quiz", error = %e, "Stale lock removal failed; treating lock as held");
        return None;
      }
    }
    match self.create_exclusive(now) {
      Ok(guard) => Some(guard),
      Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => None,
      Err(e) => {
        warn!(target: "quiz", error = %e, "Lock create failed; treating lock as held");
        None
      }
    }
  }

  fn create_exclusive(&self, now: DateTime<Utc>) -> std::io::Result<LockGuard> {
    let record = LockRecord { held_since: now, token: Uuid::new_v4() };
    let body = serde_json::to_string(&record)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let mut file = OpenOptions::new().write(true).create_new(true).open(&self.path)?;
    file.write_all(body.as_bytes())?;
    Ok(LockGuard { path: self.path.clone(), token: record.token })
  }

  fn is_stale(&self, raw: &str, now: DateTime<Utc>) -> bool {
    match serde_json::from_str::<LockRecord>(raw) {
      Ok(record) => {
        let age = now.signed_duration_since(record.held_since);
        age.num_milliseconds() >= self.timeout.as_millis() as i64
      }
      // An unparsable record can never age out on its own; reclaim it.
      Err(_) => true,
    }
  }
}

/// A held generation lock. Dropping the guard releases the lock on every
/// exit path, including panics. Release is token-checked: if the lock went
/// stale and another flight reclaimed it, a late drop leaves the reclaimer's
/// lock in place. Releasing an already-released lock is a no-op.
#[derive(Debug)]
pub struct LockGuard {
  path: PathBuf,
  token: Uuid,
}

impl LockGuard {
  fn release(&self) {
    let still_ours = match fs::read_to_string(&self.path) {
      Ok(raw) => serde_json::from_str::<LockRecord>(&raw)
        .map(|record| record.token == self.token)
        .unwrap_or(false),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
      // Unreadable: leave it; it will age out and be reclaimed.
      Err(_) => false,
    };
    if !still_ours {
      return;
    }
    match fs::remove_file(&self.path) {
      Ok(()) => {}
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => warn!(target: "quiz", error = %e, "Lock release failed; lock will age out"),
    }
  }
}

impl Drop for LockGuard {
  fn drop(&mut self) {
    self.release();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;
  use tempfile::tempdir;

  const TIMEOUT: Duration = Duration::from_secs(120);

  fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_757_500_000 + secs, 0).unwrap()
  }

  #[test]
  fn acquires_when_no_lock_exists() {
    let dir = tempdir().unwrap();
    let lock = LockCoordinator::new(dir.path(), TIMEOUT);
    assert!(lock.try_acquire(at(0)).is_some());
  }

  #[test]
  fn second_acquire_fails_while_held() {
    let dir = tempdir().unwrap();
    let lock = LockCoordinator::new(dir.path(), TIMEOUT);
    let _guard = lock.try_acquire(at(0)).unwrap();
    assert!(lock.try_acquire(at(1)).is_none());
  }

  #[test]
  fn drop_releases_for_immediate_reacquire() {
    let dir = tempdir().unwrap();
    let lock = LockCoordinator::new(dir.path(), TIMEOUT);
    let guard = lock.try_acquire(at(0)).unwrap();
    drop(guard);
    assert!(lock.try_acquire(at(1)).is_some());
  }

  #[test]
  fn stale_lock_is_reclaimed() {
    let dir = tempdir().unwrap();
    let lock = LockCoordinator::new(dir.path(), TIMEOUT);
    let abandoned = lock.try_acquire(at(0)).unwrap();
    // Forget instead of drop: simulate a crashed holder that never released.
    std::mem::forget(abandoned);
    assert!(lock.try_acquire(at(119)).is_none());
    assert!(lock.try_acquire(at(120)).is_some());
  }

  #[test]
  fn late_release_from_a_stale_holder_spares_the_reclaimer() {
    let dir = tempdir().unwrap();
    let lock = LockCoordinator::new(dir.path(), TIMEOUT);
    let stale = lock.try_acquire(at(0)).unwrap();
    let reclaimed = lock.try_acquire(at(120)).unwrap();
    // The original holder finally exits; its token no longer matches.
    drop(stale);
    assert!(lock.try_acquire(at(121)).is_none());
    drop(reclaimed);
    assert!(lock.try_acquire(at(122)).is_some());
  }

  #[test]
  fn corrupt_lock_file_is_reclaimable() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join(LOCK_FILE), "not a record").unwrap();
    let lock = LockCoordinator::new(dir.path(), TIMEOUT);
    assert!(lock.try_acquire(at(0)).is_some());
  }

  #[test]
  fn racing_acquirers_yield_exactly_one_winner() {
    let dir = tempdir().unwrap();
    let lock = LockCoordinator::new(dir.path(), TIMEOUT);
    let now = at(0);

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let lock = lock.clone();
        std::thread::spawn(move || lock.try_acquire(now))
      })
      .collect();
    let guards: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(guards.iter().filter(|g| g.is_some()).count(), 1);
  }

  #[test]
  fn racing_reclaimers_yield_exactly_one_winner() {
    let dir = tempdir().unwrap();
    let lock = LockCoordinator::new(dir.path(), TIMEOUT);
    let abandoned = lock.try_acquire(at(0)).unwrap();
    std::mem::forget(abandoned);

    let now = at(3600);
    let handles: Vec<_> = (0..8)
      .map(|_| {
        let lock = lock.clone();
        std::thread::spawn(move || lock.try_acquire(now))
      })
      .collect();
    let guards: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(guards.iter().filter(|g| g.is_some()).count(), 1);
  }
}
