//! User settings document.
//!
//! One structured document per application, stored under
//! [`SETTINGS_KEY`]. Updates are deep-merged JSON patches so callers only
//! send what changed.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::storage::{Storage, SETTINGS_KEY};

/// Flat legacy key that held the API token.
const LEGACY_TOKEN_KEY: &str = "apiToken";
/// Flat legacy key that held the theme name.
const LEGACY_THEME_KEY: &str = "theme";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
  #[default]
  System,
  Light,
  Dark,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Density {
  #[default]
  Comfortable,
  Compact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Appearance {
  pub font_size: u8,
  pub density: Density,
}

impl Default for Appearance {
  fn default() -> Self {
    Self {
      font_size: 14,
      density: Density::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureFlags {
  /// Cache remote lookups (projects, issue types)
  pub cache_enabled: bool,
  /// Validate the credential whenever it changes
  pub auto_validate: bool,
  /// Ask before deleting a template
  pub confirm_delete: bool,
}

impl Default for FeatureFlags {
  fn default() -> Self {
    Self {
      cache_enabled: true,
      auto_validate: true,
      confirm_delete: true,
    }
  }
}

/// The settings document. Missing fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsDocument {
  /// Jira API token
  pub credential: String,
  pub theme: Theme,
  pub appearance: Appearance,
  pub features: FeatureFlags,
}

/// Recursively merge `patch` into `target`.
///
/// Objects merge key by key; anything else (arrays included) replaces the
/// target value outright.
pub fn deep_merge(target: &mut Value, patch: &Value) {
  match (target, patch) {
    (Value::Object(target), Value::Object(patch)) => {
      for (key, value) in patch {
        let recurse = value.is_object() && target.get(key).is_some_and(Value::is_object);
        match target.get_mut(key) {
          Some(existing) if recurse => deep_merge(existing, value),
          _ => {
            target.insert(key.clone(), value.clone());
          }
        }
      }
    }
    (target, patch) => *target = patch.clone(),
  }
}

/// Owner of the settings document.
pub struct SettingsStore {
  storage: Storage,
  current: Mutex<Option<SettingsDocument>>,
}

impl SettingsStore {
  pub fn new(storage: Storage) -> Self {
    Self {
      storage,
      current: Mutex::new(None),
    }
  }

  /// Current settings, loading (and migrating) on first access.
  pub async fn get_settings(&self) -> Result<SettingsDocument> {
    let mut current = self.current.lock().await;
    if let Some(doc) = current.as_ref() {
      return Ok(doc.clone());
    }

    let doc = match self.storage.get::<SettingsDocument>(SETTINGS_KEY).await? {
      Some(doc) => doc,
      None => self.migrate_legacy().await.unwrap_or_default(),
    };

    *current = Some(doc.clone());
    Ok(doc)
  }

  /// Build the structured document from legacy data, if there is any.
  ///
  /// The mirrored structured copy is preferred; otherwise the loose flat
  /// keys are assembled into a document.
  async fn migrate_legacy(&self) -> Option<SettingsDocument> {
    let doc = match self.read_legacy().await {
      Ok(Some(doc)) => doc,
      Ok(None) => return None,
      Err(e) => {
        warn!("Ignoring unreadable legacy settings: {}", e);
        return None;
      }
    };

    if let Err(e) = self.storage.set(SETTINGS_KEY, &doc).await {
      warn!("Could not persist migrated settings: {}", e);
    } else {
      info!("Migrated legacy settings into the structured document");
    }

    Some(doc)
  }

  async fn read_legacy(&self) -> Result<Option<SettingsDocument>> {
    if let Some(doc) = self.storage.get_legacy::<SettingsDocument>(SETTINGS_KEY).await? {
      return Ok(Some(doc));
    }

    let token = self.storage.get_legacy::<String>(LEGACY_TOKEN_KEY).await?;
    let theme = self.storage.get_legacy::<Value>(LEGACY_THEME_KEY).await?;
    if token.is_none() && theme.is_none() {
      return Ok(None);
    }

    let mut doc = SettingsDocument::default();
    if let Some(token) = token {
      doc.credential = token;
    }
    if let Some(theme) = theme {
      match serde_json::from_value(theme) {
        Ok(theme) => doc.theme = theme,
        Err(e) => warn!("Ignoring unknown legacy theme: {}", e),
      }
    }
    Ok(Some(doc))
  }

  /// Apply `partial` to the document. With `merge` the patch is deep-merged
  /// into the current document; without it `partial` replaces it.
  pub async fn update_settings(&self, partial: Value, merge: bool) -> Result<SettingsDocument> {
    let base = self.get_settings().await?;

    let merged = if merge {
      let mut value = serde_json::to_value(&base)
        .map_err(|e| eyre!("Failed to encode settings: {}", e))?;
      deep_merge(&mut value, &partial);
      value
    } else {
      partial
    };

    let doc: SettingsDocument =
      serde_json::from_value(merged).map_err(|e| eyre!("Invalid settings: {}", e))?;
    self.write(doc).await
  }

  pub async fn update_api_token(&self, token: &str) -> Result<SettingsDocument> {
    self
      .update_settings(serde_json::json!({ "credential": token }), true)
      .await
  }

  pub async fn reset_settings(&self) -> Result<SettingsDocument> {
    self.write(SettingsDocument::default()).await
  }

  async fn write(&self, doc: SettingsDocument) -> Result<SettingsDocument> {
    let mut current = self.current.lock().await;
    self.storage.set(SETTINGS_KEY, &doc).await?;
    *current = Some(doc.clone());
    Ok(doc)
  }

  /// The credential to use against Jira.
  ///
  /// Priority: the settings document, then the environment
  /// (`JTMPL_JIRA_TOKEN`, `JIRA_API_TOKEN`). Legacy flat values reach the
  /// document through migration, so they are covered by the first step.
  pub async fn credential(&self) -> Result<Option<String>> {
    let settings = self.get_settings().await?;
    if !settings.credential.is_empty() {
      return Ok(Some(settings.credential));
    }
    Ok(Config::env_api_token())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::{FlatFileStore, MemoryStorage};
  use serde_json::json;
  use std::sync::Arc;

  fn store() -> SettingsStore {
    SettingsStore::new(Storage::new(Arc::new(MemoryStorage::new())))
  }

  #[test]
  fn test_deep_merge_replaces_arrays() {
    let mut target = json!({"a": {"list": [1, 2], "keep": true}, "b": 1});
    deep_merge(&mut target, &json!({"a": {"list": [3]}, "c": {"x": 1}}));
    assert_eq!(
      target,
      json!({"a": {"list": [3], "keep": true}, "b": 1, "c": {"x": 1}})
    );
  }

  #[test]
  fn test_deep_merge_object_over_scalar() {
    let mut target = json!({"a": 1});
    deep_merge(&mut target, &json!({"a": {"nested": true}}));
    assert_eq!(target, json!({"a": {"nested": true}}));
  }

  #[tokio::test]
  async fn test_defaults_when_absent() {
    let settings = store().get_settings().await.unwrap();
    assert_eq!(settings, SettingsDocument::default());
    assert_eq!(settings.appearance.font_size, 14);
  }

  #[tokio::test]
  async fn test_nested_merge_keeps_siblings() {
    let store = store();
    store.update_api_token("tok").await.unwrap();

    let updated = store
      .update_settings(json!({"appearance": {"density": "compact"}}), true)
      .await
      .unwrap();

    assert_eq!(updated.appearance.density, Density::Compact);
    assert_eq!(updated.appearance.font_size, 14);
    assert_eq!(updated.credential, "tok");
  }

  #[tokio::test]
  async fn test_replace_without_merge() {
    let store = store();
    store.update_api_token("tok").await.unwrap();

    let replaced = store
      .update_settings(json!({"theme": "dark"}), false)
      .await
      .unwrap();
    assert_eq!(replaced.theme, Theme::Dark);
    assert_eq!(replaced.credential, "");
  }

  #[tokio::test]
  async fn test_invalid_patch_is_rejected() {
    let store = store();
    let result = store
      .update_settings(json!({"theme": "neon"}), true)
      .await;
    assert!(result.is_err());
    assert_eq!(store.get_settings().await.unwrap().theme, Theme::System);
  }

  #[tokio::test]
  async fn test_reset_restores_defaults() {
    let store = store();
    store.update_api_token("tok").await.unwrap();
    let reset = store.reset_settings().await.unwrap();
    assert_eq!(reset, SettingsDocument::default());
  }

  #[tokio::test]
  async fn test_settings_persist_across_instances() {
    let storage = Storage::new(Arc::new(MemoryStorage::new()));
    SettingsStore::new(storage.clone())
      .update_api_token("persisted")
      .await
      .unwrap();

    let fresh = SettingsStore::new(storage);
    assert_eq!(fresh.get_settings().await.unwrap().credential, "persisted");
  }

  #[tokio::test]
  async fn test_legacy_flat_keys_are_migrated() {
    let dir = tempfile::tempdir().unwrap();
    let legacy_path = dir.path().join("legacy.json");
    std::fs::write(&legacy_path, r#"{"apiToken": "old-token", "theme": "dark"}"#).unwrap();

    let storage = Storage::new(Arc::new(MemoryStorage::new()))
      .with_legacy(Arc::new(FlatFileStore::new(&legacy_path)));
    let store = SettingsStore::new(storage.clone());

    let settings = store.get_settings().await.unwrap();
    assert_eq!(settings.credential, "old-token");
    assert_eq!(settings.theme, Theme::Dark);
    assert!(storage.has(SETTINGS_KEY).await.unwrap());
  }

  #[tokio::test]
  async fn test_structured_document_wins_over_legacy() {
    let dir = tempfile::tempdir().unwrap();
    let legacy_path = dir.path().join("legacy.json");
    std::fs::write(&legacy_path, r#"{"apiToken": "old-token"}"#).unwrap();

    let storage = Storage::new(Arc::new(MemoryStorage::new()));
    storage
      .set(SETTINGS_KEY, &json!({"credential": "new-token"}))
      .await
      .unwrap();
    let storage = storage.with_legacy(Arc::new(FlatFileStore::new(&legacy_path)));

    let settings = SettingsStore::new(storage).get_settings().await.unwrap();
    assert_eq!(settings.credential, "new-token");
  }

  #[tokio::test]
  async fn test_credential_prefers_settings() {
    let store = store();
    store.update_api_token("from-settings").await.unwrap();
    assert_eq!(
      store.credential().await.unwrap(),
      Some("from-settings".to_string())
    );
  }
}
