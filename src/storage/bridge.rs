//! Native shell backend.
//!
//! The desktop shell exposes a handful of operations over its bridge:
//! load/save the template list and load/save a settings blob. There is no
//! arbitrary-key access yet, so only [`TEMPLATES_KEY`] and [`SETTINGS_KEY`]
//! are supported here; other keys read as absent and refuse writes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use tracing::debug;

use super::backend::StorageBackend;
use super::{SETTINGS_KEY, TEMPLATES_KEY};

/// Operations the native shell provides.
#[async_trait]
pub trait HostBridge: Send + Sync {
  /// The template list, or `None` if it was never saved.
  async fn load_templates(&self) -> Result<Option<Vec<Value>>>;

  /// Replace the whole template list. `None` removes it.
  async fn save_templates(&self, templates: Option<&[Value]>) -> Result<()>;

  async fn load_settings(&self) -> Result<Option<Value>>;

  /// Replace the settings blob. `None` removes it.
  async fn save_settings(&self, settings: Option<&Value>) -> Result<()>;
}

/// Bridge implemented over the shell's data directory.
#[derive(Debug, Clone)]
pub struct FileBridge {
  dir: PathBuf,
}

impl FileBridge {
  const TEMPLATES_FILE: &'static str = "templates.json";
  const SETTINGS_FILE: &'static str = "settings.json";

  /// Attach to the bridge directory. Fails when the shell did not provide one.
  pub fn connect(dir: &Path) -> Result<Self> {
    if !dir.is_dir() {
      return Err(eyre!("Bridge directory {} is not available", dir.display()));
    }
    Ok(Self {
      dir: dir.to_path_buf(),
    })
  }

  async fn read_json(&self, file: &str) -> Result<Option<Value>> {
    let path = self.dir.join(file);
    match tokio::fs::read(&path).await {
      Ok(bytes) => serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e)),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(eyre!("Failed to read {}: {}", path.display(), e)),
    }
  }

  async fn remove(&self, file: &str) -> Result<()> {
    let path = self.dir.join(file);
    match tokio::fs::remove_file(&path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(eyre!("Failed to remove {}: {}", path.display(), e)),
    }
  }

  async fn write_json(&self, file: &str, value: &Value) -> Result<()> {
    let path = self.dir.join(file);
    let data = serde_json::to_vec_pretty(value)
      .map_err(|e| eyre!("Failed to serialize {}: {}", path.display(), e))?;
    tokio::fs::write(&path, data)
      .await
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))
  }
}

#[async_trait]
impl HostBridge for FileBridge {
  async fn load_templates(&self) -> Result<Option<Vec<Value>>> {
    match self.read_json(Self::TEMPLATES_FILE).await? {
      Some(Value::Array(templates)) => Ok(Some(templates)),
      Some(_) => Err(eyre!("Bridge template file is not a JSON array")),
      None => Ok(None),
    }
  }

  async fn save_templates(&self, templates: Option<&[Value]>) -> Result<()> {
    match templates {
      Some(templates) => {
        self
          .write_json(Self::TEMPLATES_FILE, &Value::Array(templates.to_vec()))
          .await
      }
      None => self.remove(Self::TEMPLATES_FILE).await,
    }
  }

  async fn load_settings(&self) -> Result<Option<Value>> {
    Ok(
      self
        .read_json(Self::SETTINGS_FILE)
        .await?
        .filter(|v| !v.is_null()),
    )
  }

  async fn save_settings(&self, settings: Option<&Value>) -> Result<()> {
    match settings {
      Some(value) => self.write_json(Self::SETTINGS_FILE, value).await,
      None => self.remove(Self::SETTINGS_FILE).await,
    }
  }
}

/// Storage backend delegating to a [`HostBridge`].
pub struct NativeBridgeStorage {
  bridge: Arc<dyn HostBridge>,
}

impl NativeBridgeStorage {
  pub fn new(bridge: Arc<dyn HostBridge>) -> Self {
    Self { bridge }
  }

  fn unsupported(key: &str) -> color_eyre::Report {
    eyre!("Key '{}' is not supported by the native bridge", key)
  }
}

#[async_trait]
impl StorageBackend for NativeBridgeStorage {
  fn name(&self) -> &'static str {
    "native-bridge"
  }

  async fn get(&self, key: &str) -> Result<Option<Value>> {
    match key {
      TEMPLATES_KEY => Ok(self.bridge.load_templates().await?.map(Value::Array)),
      SETTINGS_KEY => self.bridge.load_settings().await,
      _ => {
        debug!("Native bridge has no storage for key {}", key);
        Ok(None)
      }
    }
  }

  async fn set(&self, key: &str, value: Value) -> Result<()> {
    match key {
      TEMPLATES_KEY => {
        // The shell only stores template lists
        let templates = value
          .as_array()
          .ok_or_else(|| eyre!("Template collection must be a JSON array"))?;
        self.bridge.save_templates(Some(templates)).await
      }
      SETTINGS_KEY => self.bridge.save_settings(Some(&value)).await,
      _ => Err(Self::unsupported(key)),
    }
  }

  async fn delete(&self, key: &str) -> Result<()> {
    match key {
      TEMPLATES_KEY => self.bridge.save_templates(None).await,
      SETTINGS_KEY => self.bridge.save_settings(None).await,
      _ => Err(Self::unsupported(key)),
    }
  }

  async fn clear(&self) -> Result<()> {
    self.bridge.save_templates(None).await?;
    self.bridge.save_settings(None).await
  }

  async fn get_all(&self) -> Result<Map<String, Value>> {
    let mut all = Map::new();
    for key in [TEMPLATES_KEY, SETTINGS_KEY] {
      if let Some(value) = self.get(key).await? {
        all.insert(key.to_string(), value);
      }
    }
    Ok(all)
  }
}
