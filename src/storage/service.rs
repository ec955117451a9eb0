//! The storage service every higher store talks to.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use tracing::{error, warn};

use super::backend::StorageBackend;
use super::flat::FlatFileStore;
use super::{SETTINGS_KEY, TEMPLATES_KEY};

/// Keys that get a redundant copy in the legacy flat store.
const MIRRORED_KEYS: &[&str] = &[SETTINGS_KEY, TEMPLATES_KEY];

/// Typed facade over the selected backend.
///
/// This is also the one place the redundant-write policy lives: writes to
/// [`MIRRORED_KEYS`] are copied into the legacy flat store on a best-effort
/// basis. The primary backend's outcome is what the caller sees; mirror
/// failures are only logged. Reads never consult the mirror, so when the two
/// diverge the primary wins.
#[derive(Clone)]
pub struct Storage {
  backend: Arc<dyn StorageBackend>,
  legacy: Option<Arc<FlatFileStore>>,
}

impl Storage {
  pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
    Self {
      backend,
      legacy: None,
    }
  }

  /// Attach the legacy flat store (mirror target and migration source).
  pub fn with_legacy(mut self, legacy: Arc<FlatFileStore>) -> Self {
    self.legacy = Some(legacy);
    self
  }

  /// Name of the backend actually in use.
  pub fn backend_name(&self) -> &'static str {
    self.backend.name()
  }

  /// Read and deserialize a value. Missing keys are `Ok(None)`.
  pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    match self.get_value(key).await? {
      Some(value) => serde_json::from_value(value)
        .map(Some)
        .map_err(|e| eyre!("Failed to decode stored value for {}: {}", key, e)),
      None => Ok(None),
    }
  }

  /// Read a value, falling back to `default` when absent.
  pub async fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T> {
    Ok(self.get(key).await?.unwrap_or(default))
  }

  pub async fn get_value(&self, key: &str) -> Result<Option<Value>> {
    self
      .backend
      .get(key)
      .await
      .inspect_err(|e| self.log_failure("get", key, e))
  }

  pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
    let value =
      serde_json::to_value(value).map_err(|e| eyre!("Failed to encode value for {}: {}", key, e))?;
    self.set_value(key, value).await
  }

  pub async fn set_value(&self, key: &str, value: Value) -> Result<()> {
    let mirror_copy = self.mirrors(key).then(|| value.clone());

    let result = self
      .backend
      .set(key, value)
      .await
      .inspect_err(|e| self.log_failure("set", key, e));

    if let (Some(legacy), Some(copy)) = (&self.legacy, mirror_copy) {
      if let Err(e) = legacy.set(key, copy).await {
        warn!("Redundant write of {} to legacy store failed: {}", key, e);
      }
    }

    result
  }

  pub async fn has(&self, key: &str) -> Result<bool> {
    self
      .backend
      .has(key)
      .await
      .inspect_err(|e| self.log_failure("has", key, e))
  }

  pub async fn delete(&self, key: &str) -> Result<()> {
    let result = self
      .backend
      .delete(key)
      .await
      .inspect_err(|e| self.log_failure("delete", key, e));

    if self.mirrors(key) {
      if let Some(legacy) = &self.legacy {
        if let Err(e) = legacy.delete(key).await {
          warn!("Redundant delete of {} from legacy store failed: {}", key, e);
        }
      }
    }

    result
  }

  /// Remove everything from the primary backend, along with the mirrored
  /// copies so a later migration cannot resurrect them.
  pub async fn clear(&self) -> Result<()> {
    let result = self
      .backend
      .clear()
      .await
      .inspect_err(|e| self.log_failure("clear", "*", e));

    if let Some(legacy) = &self.legacy {
      for key in MIRRORED_KEYS {
        if let Err(e) = legacy.delete(key).await {
          warn!("Clearing legacy copy of {} failed: {}", key, e);
        }
      }
    }

    result
  }

  pub async fn get_all(&self) -> Result<Map<String, Value>> {
    self
      .backend
      .get_all()
      .await
      .inspect_err(|e| self.log_failure("get_all", "*", e))
  }

  /// Read a value from the legacy flat store, if one is attached.
  pub async fn get_legacy<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
    let Some(legacy) = &self.legacy else {
      return Ok(None);
    };

    match legacy.get(key).await? {
      Some(value) => serde_json::from_value(value)
        .map(Some)
        .map_err(|e| eyre!("Failed to decode legacy value for {}: {}", key, e)),
      None => Ok(None),
    }
  }

  fn mirrors(&self, key: &str) -> bool {
    self.legacy.is_some() && MIRRORED_KEYS.contains(&key)
  }

  fn log_failure(&self, op: &str, key: &str, err: &color_eyre::Report) {
    error!(
      backend = self.backend.name(),
      "Storage {} failed for {}: {}",
      op,
      key,
      err
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryStorage;
  use async_trait::async_trait;
  use serde::Deserialize;
  use serde_json::json;

  /// Backend whose every operation fails.
  struct BrokenBackend;

  #[async_trait]
  impl StorageBackend for BrokenBackend {
    fn name(&self) -> &'static str {
      "broken"
    }

    async fn get(&self, _key: &str) -> Result<Option<Value>> {
      Err(eyre!("disk on fire"))
    }

    async fn set(&self, _key: &str, _value: Value) -> Result<()> {
      Err(eyre!("disk on fire"))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
      Err(eyre!("disk on fire"))
    }

    async fn clear(&self) -> Result<()> {
      Err(eyre!("disk on fire"))
    }

    async fn get_all(&self) -> Result<Map<String, Value>> {
      Err(eyre!("disk on fire"))
    }
  }

  #[derive(Debug, PartialEq, Serialize, Deserialize)]
  struct Sample {
    name: String,
    tags: Vec<String>,
  }

  #[tokio::test]
  async fn test_typed_round_trip() {
    let storage = Storage::new(Arc::new(MemoryStorage::new()));
    let sample = Sample {
      name: "x".to_string(),
      tags: vec!["a".to_string()],
    };

    storage.set("sample", &sample).await.unwrap();
    assert_eq!(storage.get::<Sample>("sample").await.unwrap(), Some(sample));
    assert_eq!(storage.get_or("missing", 7u32).await.unwrap(), 7);
  }

  /// Every persistent backend behind the facade.
  fn persistent_backends(dir: &std::path::Path) -> Vec<Storage> {
    use crate::storage::{FileBridge, NativeBridgeStorage, SqliteStorage};

    vec![
      Storage::new(Arc::new(SqliteStorage::open_in_memory().unwrap())),
      Storage::new(Arc::new(NativeBridgeStorage::new(Arc::new(
        FileBridge::connect(dir).unwrap(),
      )))),
      Storage::new(Arc::new(MemoryStorage::new())),
    ]
  }

  #[tokio::test]
  async fn test_template_collections_round_trip_on_every_backend() {
    let dir = tempfile::tempdir().unwrap();

    for storage in persistent_backends(dir.path()) {
      let name = storage.backend_name();
      for value in [json!([]), json!([{"id": "t1", "name": "Release"}]), json!([])] {
        storage.set_value(TEMPLATES_KEY, value.clone()).await.unwrap();
        assert_eq!(
          storage.get_value(TEMPLATES_KEY).await.unwrap(),
          Some(value),
          "{}",
          name
        );
        assert!(storage.has(TEMPLATES_KEY).await.unwrap(), "{}", name);
      }

      storage.delete(TEMPLATES_KEY).await.unwrap();
      assert_eq!(storage.get_value(TEMPLATES_KEY).await.unwrap(), None, "{}", name);
    }
  }

  #[tokio::test]
  async fn test_critical_keys_are_mirrored() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = Arc::new(FlatFileStore::new(dir.path().join("legacy.json")));
    let storage = Storage::new(Arc::new(MemoryStorage::new())).with_legacy(legacy.clone());

    storage.set(SETTINGS_KEY, &json!({"theme": "dark"})).await.unwrap();
    storage.set("cache:foo", &json!(1)).await.unwrap();

    assert_eq!(
      legacy.get(SETTINGS_KEY).await.unwrap(),
      Some(json!({"theme": "dark"}))
    );
    assert_eq!(legacy.get("cache:foo").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_primary_failure_propagates_after_mirror_write() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = Arc::new(FlatFileStore::new(dir.path().join("legacy.json")));
    let storage = Storage::new(Arc::new(BrokenBackend)).with_legacy(legacy.clone());

    let result = storage.set(TEMPLATES_KEY, &json!([{"id": "t"}])).await;
    assert!(result.is_err());
    assert_eq!(
      legacy.get(TEMPLATES_KEY).await.unwrap(),
      Some(json!([{"id": "t"}]))
    );

    assert!(storage.get_value("anything").await.is_err());
  }

  #[tokio::test]
  async fn test_mirror_failure_is_not_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    // Parent of the legacy path is a regular file, so every write fails
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "x").unwrap();
    let legacy = Arc::new(FlatFileStore::new(blocker.join("legacy.json")));

    let storage = Storage::new(Arc::new(MemoryStorage::new())).with_legacy(legacy);
    storage.set(SETTINGS_KEY, &json!({})).await.unwrap();
    assert!(storage.has(SETTINGS_KEY).await.unwrap());
  }

  #[tokio::test]
  async fn test_clear_drops_mirrored_copies() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = Arc::new(FlatFileStore::new(dir.path().join("legacy.json")));
    let storage = Storage::new(Arc::new(MemoryStorage::new())).with_legacy(legacy.clone());

    storage.set(TEMPLATES_KEY, &json!([{"id": "t"}])).await.unwrap();
    storage.clear().await.unwrap();

    assert!(storage.get_all().await.unwrap().is_empty());
    assert_eq!(storage.get_legacy::<Value>(TEMPLATES_KEY).await.unwrap(), None);
  }
}
