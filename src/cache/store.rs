//! The cache store: memory tier in front of a persisted tier.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::entry::{CacheEntry, Clock, SystemClock};
use crate::storage::Storage;

/// Namespace prepended to cache keys in the storage service.
pub const CACHE_PREFIX: &str = "cache:";

/// Cache with explicit per-entry expiry.
///
/// Reads check memory first, then the persisted tier (promoting valid hits).
/// Expired entries are dropped from both tiers as soon as they are seen.
pub struct CacheStore {
  storage: Storage,
  memory: Arc<DashMap<String, CacheEntry>>,
  clock: Arc<dyn Clock>,
}

impl CacheStore {
  /// Create a cache over `storage` and warm it from persisted entries.
  pub async fn load(storage: Storage) -> Self {
    Self::load_with_clock(storage, Arc::new(SystemClock)).await
  }

  pub async fn load_with_clock(storage: Storage, clock: Arc<dyn Clock>) -> Self {
    let cache = Self {
      storage,
      memory: Arc::new(DashMap::new()),
      clock,
    };
    cache.warm().await;
    cache
  }

  fn storage_key(key: &str) -> String {
    format!("{}{}", CACHE_PREFIX, key)
  }

  /// Load every persisted entry, discarding the expired ones.
  async fn warm(&self) {
    let all = match self.storage.get_all().await {
      Ok(all) => all,
      Err(e) => {
        warn!("Could not warm cache from storage: {}", e);
        return;
      }
    };

    let now = self.clock.now_millis();
    let mut loaded = 0;
    for (storage_key, value) in all {
      let Some(key) = storage_key.strip_prefix(CACHE_PREFIX) else {
        continue;
      };

      match serde_json::from_value::<CacheEntry>(value) {
        Ok(entry) if !entry.is_expired(now) => {
          self.memory.insert(key.to_string(), entry);
          loaded += 1;
        }
        Ok(_) => self.remove_persisted(&storage_key).await,
        Err(e) => {
          warn!("Dropping undecodable cache entry {}: {}", key, e);
          self.remove_persisted(&storage_key).await;
        }
      }
    }

    debug!("Cache warmed with {} entries", loaded);
  }

  /// Look up a value. Expired or undecodable entries read as a miss.
  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let entry = self.get_entry(key).await?;
    match serde_json::from_value(entry.data) {
      Ok(data) => Some(data),
      Err(e) => {
        warn!("Cached value for {} has unexpected shape: {}", key, e);
        self.remove(key).await;
        None
      }
    }
  }

  async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
    let now = self.clock.now_millis();

    // Memory tier
    let cached = self.memory.get(key).map(|entry| entry.value().clone());
    if let Some(entry) = cached {
      if entry.is_expired(now) {
        self.remove(key).await;
        return None;
      }
      return Some(entry);
    }

    // Persisted tier
    let storage_key = Self::storage_key(key);
    let entry = match self.storage.get::<CacheEntry>(&storage_key).await {
      Ok(Some(entry)) => entry,
      Ok(None) => return None,
      Err(e) => {
        warn!("Persisted cache lookup for {} failed: {}", key, e);
        return None;
      }
    };

    if entry.is_expired(now) {
      self.remove_persisted(&storage_key).await;
      return None;
    }

    self.memory.insert(key.to_string(), entry.clone());
    Some(entry)
  }

  /// Store a value for `ttl`. Only encoding errors are returned; a failed
  /// persist leaves the memory tier populated and is logged.
  pub async fn set<T: Serialize + ?Sized>(&self, key: &str, data: &T, ttl: Duration) -> Result<()> {
    let data =
      serde_json::to_value(data).map_err(|e| eyre!("Failed to encode cache value {}: {}", key, e))?;
    let entry = CacheEntry::new(key, data, self.clock.now_millis(), ttl);

    self.memory.insert(key.to_string(), entry.clone());

    if let Err(e) = self.storage.set(&Self::storage_key(key), &entry).await {
      warn!("Failed to persist cache entry {}: {}", key, e);
    }

    Ok(())
  }

  /// Cache-first fetch: serve a live entry, otherwise run `fetcher` and
  /// cache its result.
  pub async fn fetch<T, F, Fut>(&self, key: &str, ttl: Duration, fetcher: F) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if let Some(cached) = self.get(key).await {
      debug!("Cache hit for {}", key);
      return Ok(cached);
    }

    let data = fetcher().await?;
    self.set(key, &data, ttl).await?;
    Ok(data)
  }

  /// Drop every entry whose key contains `pattern`, in both tiers.
  /// Returns how many distinct keys were removed.
  pub async fn invalidate(&self, pattern: &str) -> usize {
    let mut removed: Vec<String> = self
      .memory
      .iter()
      .filter(|entry| entry.key().contains(pattern))
      .map(|entry| entry.key().clone())
      .collect();
    for key in &removed {
      self.memory.remove(key);
    }

    for storage_key in self.persisted_keys().await {
      let key = &storage_key[CACHE_PREFIX.len()..];
      if key.contains(pattern) {
        self.remove_persisted(&storage_key).await;
        if !removed.iter().any(|k| k == key) {
          removed.push(key.to_string());
        }
      }
    }

    debug!("Invalidated {} cache entries matching '{}'", removed.len(), pattern);
    removed.len()
  }

  /// Empty both tiers.
  pub async fn clear(&self) {
    self.memory.clear();
    for storage_key in self.persisted_keys().await {
      self.remove_persisted(&storage_key).await;
    }
  }

  /// Keys with live entries, sorted. Expired entries are pruned on the way.
  pub async fn keys(&self) -> Vec<String> {
    let now = self.clock.now_millis();

    let expired: Vec<String> = self
      .memory
      .iter()
      .filter(|entry| entry.value().is_expired(now))
      .map(|entry| entry.key().clone())
      .collect();
    for key in &expired {
      self.remove(key).await;
    }

    let mut keys: Vec<String> = self.memory.iter().map(|entry| entry.key().clone()).collect();
    keys.sort();
    keys
  }

  async fn remove(&self, key: &str) {
    self.memory.remove(key);
    self.remove_persisted(&Self::storage_key(key)).await;
  }

  async fn remove_persisted(&self, storage_key: &str) {
    if let Err(e) = self.storage.delete(storage_key).await {
      warn!("Failed to delete persisted cache entry {}: {}", storage_key, e);
    }
  }

  async fn persisted_keys(&self) -> Vec<String> {
    match self.storage.get_all().await {
      Ok(all) => all
        .into_iter()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with(CACHE_PREFIX))
        .collect(),
      Err(e) => {
        warn!("Could not list persisted cache entries: {}", e);
        Vec::new()
      }
    }
  }
}

impl Clone for CacheStore {
  fn clone(&self) -> Self {
    Self {
      storage: self.storage.clone(),
      memory: Arc::clone(&self.memory),
      clock: Arc::clone(&self.clock),
    }
  }
}
