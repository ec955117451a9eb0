//! Non-persistent last-resort backend.

use async_trait::async_trait;
use color_eyre::Result;
use dashmap::DashMap;
use serde_json::{Map, Value};

use super::backend::StorageBackend;

/// Process-local map. Every operation succeeds.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  data: DashMap<String, Value>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
  fn name(&self) -> &'static str {
    "memory"
  }

  async fn get(&self, key: &str) -> Result<Option<Value>> {
    Ok(self.data.get(key).map(|entry| entry.value().clone()))
  }

  async fn set(&self, key: &str, value: Value) -> Result<()> {
    self.data.insert(key.to_string(), value);
    Ok(())
  }

  async fn has(&self, key: &str) -> Result<bool> {
    Ok(self.data.contains_key(key))
  }

  async fn delete(&self, key: &str) -> Result<()> {
    self.data.remove(key);
    Ok(())
  }

  async fn clear(&self) -> Result<()> {
    self.data.clear();
    Ok(())
  }

  async fn get_all(&self) -> Result<Map<String, Value>> {
    Ok(
      self
        .data
        .iter()
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect(),
    )
  }
}
