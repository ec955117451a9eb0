//! The contract every backing store implements.

use async_trait::async_trait;
use color_eyre::Result;
use serde_json::{Map, Value};

/// A concrete persistence engine.
///
/// Values are JSON documents; typed access lives on [`super::Storage`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
  /// Short name for logs (e.g. "sqlite")
  fn name(&self) -> &'static str;

  /// Read a value. Missing keys are `Ok(None)`.
  async fn get(&self, key: &str) -> Result<Option<Value>>;

  /// Write a value, replacing whatever was stored under `key`.
  async fn set(&self, key: &str, value: Value) -> Result<()>;

  async fn has(&self, key: &str) -> Result<bool> {
    Ok(self.get(key).await?.is_some())
  }

  async fn delete(&self, key: &str) -> Result<()>;

  /// Remove every stored value.
  async fn clear(&self) -> Result<()>;

  /// Snapshot of all stored values keyed by logical key.
  async fn get_all(&self) -> Result<Map<String, Value>>;
}
