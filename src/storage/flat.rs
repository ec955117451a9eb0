//! Legacy flat key/value file.
//!
//! Before the structured stores existed everything lived in one JSON object:
//! templates as a flat array under `templates`, settings as loose keys. The
//! file is still read for one-time migrations and receives redundant copies
//! of critical keys.

use std::path::PathBuf;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::backend::StorageBackend;

/// JSON-object file store. Writes go through a temp file and a rename.
#[derive(Debug)]
pub struct FlatFileStore {
  path: PathBuf,
  /// Serializes read-modify-write cycles
  lock: Mutex<()>,
}

impl FlatFileStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      lock: Mutex::new(()),
    }
  }

  async fn read_map(&self) -> Result<Map<String, Value>> {
    let bytes = match tokio::fs::read(&self.path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
      Err(e) => return Err(eyre!("Failed to read {}: {}", self.path.display(), e)),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
      return Ok(Map::new());
    }

    match serde_json::from_slice::<Value>(&bytes)
      .map_err(|e| eyre!("Failed to parse {}: {}", self.path.display(), e))?
    {
      Value::Object(map) => Ok(map),
      _ => Err(eyre!("{} is not a JSON object", self.path.display())),
    }
  }

  async fn write_map(&self, map: &Map<String, Value>) -> Result<()> {
    if let Some(parent) = self.path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| eyre!("Failed to create {}: {}", parent.display(), e))?;
    }

    let data = serde_json::to_vec_pretty(map)
      .map_err(|e| eyre!("Failed to serialize {}: {}", self.path.display(), e))?;
    let tmp = self.path.with_extension("json.tmp");

    tokio::fs::write(&tmp, data)
      .await
      .map_err(|e| eyre!("Failed to write {}: {}", tmp.display(), e))?;
    tokio::fs::rename(&tmp, &self.path)
      .await
      .map_err(|e| eyre!("Failed to replace {}: {}", self.path.display(), e))?;

    Ok(())
  }
}

#[async_trait]
impl StorageBackend for FlatFileStore {
  fn name(&self) -> &'static str {
    "legacy-flat"
  }

  async fn get(&self, key: &str) -> Result<Option<Value>> {
    let _guard = self.lock.lock().await;
    Ok(self.read_map().await?.remove(key))
  }

  async fn set(&self, key: &str, value: Value) -> Result<()> {
    let _guard = self.lock.lock().await;
    let mut map = self.read_map().await?;
    map.insert(key.to_string(), value);
    self.write_map(&map).await
  }

  async fn delete(&self, key: &str) -> Result<()> {
    let _guard = self.lock.lock().await;
    let mut map = self.read_map().await?;
    if map.remove(key).is_some() {
      self.write_map(&map).await?;
    }
    Ok(())
  }

  async fn clear(&self) -> Result<()> {
    let _guard = self.lock.lock().await;
    self.write_map(&Map::new()).await
  }

  async fn get_all(&self) -> Result<Map<String, Value>> {
    let _guard = self.lock.lock().await;
    self.read_map().await
  }
}
