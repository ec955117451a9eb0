//! Cache entries and the clock they are stamped with.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_millis(&self) -> i64 {
    Utc::now().timestamp_millis()
  }
}

/// Clock that only moves when told to.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualClock {
  now: std::sync::atomic::AtomicI64,
}

#[cfg(test)]
impl ManualClock {
  pub fn new(start: i64) -> Self {
    Self {
      now: std::sync::atomic::AtomicI64::new(start),
    }
  }

  pub fn advance(&self, by: Duration) {
    self
      .now
      .fetch_add(by.as_millis() as i64, std::sync::atomic::Ordering::SeqCst);
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now_millis(&self) -> i64 {
    self.now.load(std::sync::atomic::Ordering::SeqCst)
  }
}

/// A cached value with its lifetime. `expires_at` is always after
/// `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  pub key: String,
  pub data: Value,
  pub created_at: i64,
  pub expires_at: i64,
}

impl CacheEntry {
  pub fn new(key: &str, data: Value, now: i64, ttl: Duration) -> Self {
    // Zero TTLs still produce a (1ms) window
    let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);
    Self {
      key: key.to_string(),
      data,
      created_at: now,
      expires_at: now.saturating_add(ttl),
    }
  }

  pub fn is_expired(&self, now: i64) -> bool {
    now >= self.expires_at
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_expiry_boundary() {
    let entry = CacheEntry::new("k", json!(1), 1_000, Duration::from_millis(500));
    assert_eq!(entry.expires_at, 1_500);
    assert!(!entry.is_expired(1_499));
    assert!(entry.is_expired(1_500));
  }

  #[test]
  fn test_zero_ttl_keeps_invariant() {
    let entry = CacheEntry::new("k", json!(null), 10, Duration::ZERO);
    assert!(entry.expires_at > entry.created_at);
  }

  #[test]
  fn test_serialized_shape() {
    let entry = CacheEntry::new("k", json!({"a": 1}), 0, Duration::from_secs(1));
    let value = serde_json::to_value(&entry).unwrap();
    assert_eq!(value["createdAt"], 0);
    assert_eq!(value["expiresAt"], 1000);
  }
}
