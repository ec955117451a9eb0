//! Backend selection.

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{info, warn};

use super::backend::StorageBackend;
use super::bridge::{FileBridge, NativeBridgeStorage};
use super::flat::FlatFileStore;
use super::memory::MemoryStorage;
use super::service::Storage;
use super::sqlite::SqliteStorage;
use super::TEMPLATES_KEY;
use crate::host::{self, HostEnvironment, HostSignals};

/// Deferred construction of a backend.
pub type BackendBuilder =
  Box<dyn FnOnce() -> BoxFuture<'static, Result<Arc<dyn StorageBackend>>> + Send>;

/// Inputs for [`open_storage`].
#[derive(Debug, Clone)]
pub struct StorageOptions {
  pub signals: HostSignals,
  /// Where the embedded database and legacy file live
  pub data_dir: PathBuf,
  /// Skip persistence entirely
  pub ephemeral: bool,
}

impl StorageOptions {
  pub fn in_memory() -> Self {
    Self {
      signals: HostSignals::default(),
      data_dir: PathBuf::new(),
      ephemeral: true,
    }
  }

  pub fn legacy_path(&self) -> PathBuf {
    self.data_dir.join("legacy.json")
  }
}

/// Open the storage service for the current host. Never fails.
///
/// Tries the primary backend for the detected environment, then the other
/// environment's backend, then process memory.
pub async fn open_storage(options: &StorageOptions) -> Storage {
  if options.ephemeral {
    info!("Using ephemeral in-memory storage");
    return Storage::new(Arc::new(MemoryStorage::new()));
  }

  let environment = host::detect(&options.signals);
  let legacy = Arc::new(FlatFileStore::new(options.legacy_path()));

  let candidates = [environment, environment.alternate()]
    .into_iter()
    .map(|env| (env.label(), builder_for(env, options, legacy.clone())))
    .collect();

  Storage::new(select_backend(candidates).await).with_legacy(legacy)
}

/// Run builders in order and keep the first that succeeds. When all of them
/// fail the in-memory backend is returned.
pub async fn select_backend(
  candidates: Vec<(&'static str, BackendBuilder)>,
) -> Arc<dyn StorageBackend> {
  for (label, build) in candidates {
    match build().await {
      Ok(backend) => {
        info!("Storage backend: {} ({})", backend.name(), label);
        return backend;
      }
      Err(e) => warn!("Storage backend for {} unavailable: {}", label, e),
    }
  }

  warn!("No persistent storage available, falling back to memory; changes will be lost on exit");
  Arc::new(MemoryStorage::new())
}

fn builder_for(
  environment: HostEnvironment,
  options: &StorageOptions,
  legacy: Arc<FlatFileStore>,
) -> BackendBuilder {
  match environment {
    HostEnvironment::Native => {
      let bridge_dir = options.signals.bridge_dir.clone();
      Box::new(move || {
        async move {
          let dir = bridge_dir.ok_or_else(|| eyre!("No bridge directory provided"))?;
          let bridge = FileBridge::connect(&dir)?;
          Ok::<Arc<dyn StorageBackend>, color_eyre::Report>(Arc::new(NativeBridgeStorage::new(
            Arc::new(bridge),
          )))
        }
        .boxed()
      })
    }
    HostEnvironment::Browser => {
      let data_dir = options.data_dir.clone();
      Box::new(move || {
        async move {
          let legacy_templates = match legacy.get(TEMPLATES_KEY).await {
            Ok(Some(Value::Array(records))) => records,
            Ok(_) => Vec::new(),
            Err(e) => {
              warn!("Could not read legacy templates: {}", e);
              Vec::new()
            }
          };

          let storage = SqliteStorage::open(&data_dir)?;
          if let Err(e) = storage.migrate_legacy_templates(&legacy_templates) {
            warn!("Legacy template migration failed, will retry next start: {}", e);
          }

          Ok::<Arc<dyn StorageBackend>, color_eyre::Report>(Arc::new(storage))
        }
        .boxed()
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn failing(msg: &'static str) -> BackendBuilder {
    Box::new(move || async move { Err::<Arc<dyn StorageBackend>, _>(eyre!(msg)) }.boxed())
  }

  fn memory() -> BackendBuilder {
    Box::new(|| {
      async { Ok::<Arc<dyn StorageBackend>, color_eyre::Report>(Arc::new(MemoryStorage::new())) }
        .boxed()
    })
  }

  #[tokio::test]
  async fn test_primary_failure_uses_alternate() {
    let backend = select_backend(vec![("primary", failing("boom")), ("alternate", memory())]).await;
    let storage = Storage::new(backend);

    storage.set("k", &json!({"v": [1, 2]})).await.unwrap();
    assert_eq!(
      storage.get_value("k").await.unwrap(),
      Some(json!({"v": [1, 2]}))
    );
  }

  #[tokio::test]
  async fn test_everything_failing_falls_back_to_memory() {
    let backend = select_backend(vec![("a", failing("no")), ("b", failing("nope"))]).await;
    assert_eq!(backend.name(), "memory");

    backend.set("k", json!(1)).await.unwrap();
    assert_eq!(backend.get("k").await.unwrap(), Some(json!(1)));
  }

  #[tokio::test]
  async fn test_browser_host_opens_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let options = StorageOptions {
      signals: HostSignals {
        bridge_dir: None,
        runtime_id: "jtmpl/test".to_string(),
      },
      data_dir: dir.path().to_path_buf(),
      ephemeral: false,
    };

    let storage = open_storage(&options).await;
    assert_eq!(storage.backend_name(), "sqlite");
  }

  #[tokio::test]
  async fn test_native_without_bridge_falls_back_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let options = StorageOptions {
      signals: HostSignals {
        bridge_dir: Some(dir.path().join("missing-bridge")),
        runtime_id: "jtmpl-shell/1.0".to_string(),
      },
      data_dir: dir.path().to_path_buf(),
      ephemeral: false,
    };

    let storage = open_storage(&options).await;
    assert_eq!(storage.backend_name(), "sqlite");
  }

  #[tokio::test]
  async fn test_native_with_bridge() {
    let dir = tempfile::tempdir().unwrap();
    let options = StorageOptions {
      signals: HostSignals {
        bridge_dir: Some(dir.path().to_path_buf()),
        runtime_id: "jtmpl-shell/1.0".to_string(),
      },
      data_dir: dir.path().join("data"),
      ephemeral: false,
    };

    let storage = open_storage(&options).await;
    assert_eq!(storage.backend_name(), "native-bridge");
  }

  #[tokio::test]
  async fn test_legacy_templates_migrated_once() {
    let dir = tempfile::tempdir().unwrap();
    let options = StorageOptions {
      signals: HostSignals::default(),
      data_dir: dir.path().to_path_buf(),
      ephemeral: false,
    };
    std::fs::write(
      options.legacy_path(),
      r#"{"templates": [{"id": "t1", "name": "Legacy"}, {"name": "No id"}]}"#,
    )
    .unwrap();

    let storage = open_storage(&options).await;
    let first: Vec<Value> = storage.get(TEMPLATES_KEY).await.unwrap().unwrap();
    assert_eq!(first.len(), 2);
    drop(storage);

    let storage = open_storage(&options).await;
    let second: Vec<Value> = storage.get(TEMPLATES_KEY).await.unwrap().unwrap();
    assert_eq!(second.len(), 2);
  }

  #[tokio::test]
  async fn test_ephemeral_is_memory() {
    let storage = open_storage(&StorageOptions::in_memory()).await;
    assert_eq!(storage.backend_name(), "memory");
  }
}
