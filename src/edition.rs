//! Edition windows: mapping wall-clock time to the half-day cache key.

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};

/// Partitions time into non-overlapping half-day windows, computed in a
/// configured fixed offset from UTC. Keys are stable within a window and
/// change exactly once at each boundary.
#[derive(Clone, Copy, Debug)]
pub struct EditionPolicy {
  offset: FixedOffset,
}

impl EditionPolicy {
  /// Offsets outside the valid range fall back to UTC.
  pub fn new(utc_offset_minutes: i32) -> Self {
    let offset = FixedOffset::east_opt(utc_offset_minutes.saturating_mul(60))
      .unwrap_or_else(|| Utc.fix());
    Self { offset }
  }

  /// Cache key for the window containing `now`, e.g. "2025-09-10-AM".
  /// Noon belongs to the afternoon window.
  pub fn key_for(&self, now: DateTime<Utc>) -> String {
    let local = now.with_timezone(&self.offset);
    let half = if local.hour() < 12 { "AM" } else { "PM" };
    format!("{}-{}", local.format("%Y-%m-%d"), half)
  }

  /// Human label for response metadata.
  pub fn edition_label(&self, now: DateTime<Utc>) -> &'static str {
    if now.with_timezone(&self.offset).hour() < 12 {
      "Morning Edition"
    } else {
      "Afternoon Edition"
    }
  }
}
