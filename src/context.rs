//! Application context: the stores every command works against.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::host::{self, HostEnvironment, HostSignals};
use crate::jira::{CachedJiraClient, JiraClient};
use crate::settings::SettingsStore;
use crate::storage::{open_storage, Storage, StorageOptions};
use crate::templates::TemplateStore;
use crate::validation::CredentialCoordinator;

pub struct AppContext {
  pub config: Config,
  pub environment: HostEnvironment,
  pub storage: Storage,
  pub cache: CacheStore,
  pub settings: SettingsStore,
  pub templates: TemplateStore,
}

impl AppContext {
  /// Detect the host, open storage and warm the cache.
  pub async fn open(config: Config, ephemeral: bool) -> Result<Self> {
    let signals = HostSignals::from_env(
      config.host.runtime_id.as_deref(),
      config.host.bridge_dir.clone(),
    );
    let environment = host::detect(&signals);

    let options = if ephemeral {
      StorageOptions::in_memory()
    } else {
      let data_dir = config.data_dir()?;
      std::fs::create_dir_all(&data_dir).map_err(|e| {
        eyre!(
          "Failed to create data directory {}: {}",
          data_dir.display(),
          e
        )
      })?;
      StorageOptions {
        signals,
        data_dir,
        ephemeral: false,
      }
    };

    let storage = open_storage(&options).await;
    info!(
      "Host: {}, storage backend: {}",
      environment.label(),
      storage.backend_name()
    );

    Ok(Self::with_storage(config, environment, storage).await)
  }

  pub async fn with_storage(config: Config, environment: HostEnvironment, storage: Storage) -> Self {
    let cache = CacheStore::load(storage.clone()).await;
    Self {
      config,
      environment,
      settings: SettingsStore::new(storage.clone()),
      templates: TemplateStore::new(storage.clone()),
      cache,
      storage,
    }
  }

  /// Jira client using the effective credential.
  pub async fn jira(&self) -> Result<CachedJiraClient> {
    let jira_config = self.config.jira()?;
    let token = self.settings.credential().await?.ok_or_else(|| {
      eyre!(
        "No API token found. Run `jtmpl settings set-token` or set JTMPL_JIRA_TOKEN / JIRA_API_TOKEN"
      )
    })?;
    let features = self.settings.get_settings().await?.features;

    Ok(CachedJiraClient::new(
      JiraClient::new(jira_config, token)?,
      self.cache.clone(),
      self.config.cache.clone(),
      features.cache_enabled,
    ))
  }

  /// Coordinator validating credentials against the configured Jira.
  pub fn coordinator(&self) -> Result<CredentialCoordinator> {
    // The validator authenticates with whatever credential it is handed
    let validator = JiraClient::new(self.config.jira()?, String::new())?;
    Ok(CredentialCoordinator::new(
      Arc::new(validator),
      self.config.validation.debounce(),
    ))
  }
}
