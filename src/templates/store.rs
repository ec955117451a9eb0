//! Template collection store.
//!
//! The whole collection is written back on every mutation. That is only safe
//! with a single writer; the write lock below covers this process.

use chrono::Utc;
use color_eyre::Result;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::types::Template;
use crate::storage::{Storage, TEMPLATES_KEY};

pub struct TemplateStore {
  storage: Storage,
  write_lock: Mutex<()>,
}

impl TemplateStore {
  pub fn new(storage: Storage) -> Self {
    Self {
      storage,
      write_lock: Mutex::new(()),
    }
  }

  /// All templates in stored order.
  pub async fn list_all(&self) -> Result<Vec<Template>> {
    self.storage.get_or(TEMPLATES_KEY, Vec::new()).await
  }

  pub async fn get_by_id(&self, id: &str) -> Result<Option<Template>> {
    Ok(
      self
        .list_all()
        .await?
        .into_iter()
        .find(|t| t.id() == Some(id)),
    )
  }

  /// Insert or replace a template. A template whose id matches an existing
  /// record replaces it in place; otherwise it is appended, with an id
  /// generated if it had none.
  pub async fn save(&self, mut template: Template) -> Result<Template> {
    let _guard = self.write_lock.lock().await;
    let mut templates = self.list_all().await?;
    let now = Utc::now();

    let existing = template
      .id()
      .and_then(|id| templates.iter().position(|t| t.id() == Some(id)));

    template.updated_at = Some(now);
    match existing {
      Some(index) => {
        if template.created_at.is_none() {
          template.created_at = templates[index].created_at;
        }
        templates[index] = template.clone();
        debug!("Updated template {}", template.id().unwrap_or_default());
      }
      None => {
        let id = template.ensure_id();
        template.created_at.get_or_insert(now);
        templates.push(template.clone());
        debug!("Created template {}", id);
      }
    }

    self.storage.set(TEMPLATES_KEY, &templates).await?;
    Ok(template)
  }

  /// Remove a template. Returns whether anything was removed; nothing is
  /// written when the id is unknown.
  pub async fn delete(&self, id: &str) -> Result<bool> {
    let _guard = self.write_lock.lock().await;
    let mut templates = self.list_all().await?;
    let before = templates.len();
    templates.retain(|t| t.id() != Some(id));

    if templates.len() == before {
      return Ok(false);
    }

    self.storage.set(TEMPLATES_KEY, &templates).await?;
    debug!("Deleted template {}", id);
    Ok(true)
  }

  /// Merge external records into the collection by id.
  ///
  /// With `overwrite` an incoming record replaces the stored one with the
  /// same id; without it the stored one is kept. Records without an id get
  /// one. Returns the imported records (ids filled in), not the merged
  /// collection.
  pub async fn import_many(&self, records: Vec<Template>, overwrite: bool) -> Result<Vec<Template>> {
    let _guard = self.write_lock.lock().await;
    let mut templates = self.list_all().await?;
    let mut imported = Vec::with_capacity(records.len());

    for mut record in records {
      let id = record.ensure_id();
      match templates.iter().position(|t| t.id() == Some(id.as_str())) {
        Some(index) if overwrite => templates[index] = record.clone(),
        Some(_) => debug!("Keeping existing template {} on import", id),
        None => templates.push(record.clone()),
      }
      imported.push(record);
    }

    self.storage.set(TEMPLATES_KEY, &templates).await?;
    info!("Imported {} templates", imported.len());
    Ok(imported)
  }

  /// The full collection, for writing out in the interchange format.
  pub async fn export_all(&self) -> Result<Vec<Template>> {
    self.list_all().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::{MemoryStorage, StorageBackend};
  use async_trait::async_trait;
  use serde_json::{Map, Value};
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  /// Memory backend that counts writes.
  #[derive(Default)]
  struct CountingBackend {
    inner: MemoryStorage,
    writes: AtomicUsize,
  }

  #[async_trait]
  impl StorageBackend for CountingBackend {
    fn name(&self) -> &'static str {
      "counting"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
      self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
      self.writes.fetch_add(1, Ordering::SeqCst);
      self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
      self.writes.fetch_add(1, Ordering::SeqCst);
      self.inner.delete(key).await
    }

    async fn clear(&self) -> Result<()> {
      self.inner.clear().await
    }

    async fn get_all(&self) -> Result<Map<String, Value>> {
      self.inner.get_all().await
    }
  }

  fn counting_store() -> (TemplateStore, Arc<CountingBackend>) {
    let backend = Arc::new(CountingBackend::default());
    let store = TemplateStore::new(Storage::new(backend.clone()));
    (store, backend)
  }

  #[tokio::test]
  async fn test_empty_collection() {
    let (store, _) = counting_store();
    assert!(store.list_all().await.unwrap().is_empty());
    assert_eq!(store.get_by_id("nope").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_save_without_id_appends() {
    let (store, _) = counting_store();
    store.save(Template::new("First")).await.unwrap();
    let saved = store.save(Template::new("Second")).await.unwrap();

    let id = saved.id().unwrap().to_string();
    assert!(saved.created_at.is_some());
    assert_eq!(store.list_all().await.unwrap().len(), 2);
    assert_eq!(
      store.get_by_id(&id).await.unwrap().map(|t| t.name),
      Some("Second".to_string())
    );
  }

  #[tokio::test]
  async fn test_save_with_existing_id_replaces_in_place() {
    let (store, _) = counting_store();
    let first = store.save(Template::new("First")).await.unwrap();
    store.save(Template::new("Second")).await.unwrap();

    let mut edited = first.clone();
    edited.name = "First (edited)".to_string();
    edited.created_at = None;
    let saved = store.save(edited).await.unwrap();

    let all = store.list_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].name, "First (edited)");
    assert_eq!(all[0].id(), first.id());
    assert_eq!(saved.created_at, first.created_at);
  }

  #[tokio::test]
  async fn test_save_with_unknown_id_keeps_it() {
    let (store, _) = counting_store();
    let template = Template {
      id: Some("chosen-id".to_string()),
      ..Template::new("Mine")
    };
    store.save(template).await.unwrap();
    assert!(store.get_by_id("chosen-id").await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_delete_missing_does_not_write() {
    let (store, backend) = counting_store();
    store.save(Template::new("Keep")).await.unwrap();
    let writes = backend.writes.load(Ordering::SeqCst);

    assert!(!store.delete("missing-id").await.unwrap());
    assert_eq!(backend.writes.load(Ordering::SeqCst), writes);
  }

  #[tokio::test]
  async fn test_delete_existing() {
    let (store, _) = counting_store();
    let saved = store.save(Template::new("Gone")).await.unwrap();

    assert!(store.delete(saved.id().unwrap()).await.unwrap());
    assert!(store.list_all().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_import_respects_overwrite_flag() {
    let (store, _) = counting_store();
    let existing = store
      .save(Template {
        id: Some("shared".to_string()),
        ..Template::new("Local")
      })
      .await
      .unwrap();

    let incoming = vec![
      Template {
        id: Some("shared".to_string()),
        ..Template::new("Remote")
      },
      Template::new("Brand new"),
    ];

    let imported = store.import_many(incoming.clone(), false).await.unwrap();
    assert_eq!(imported.len(), 2);
    assert!(imported.iter().all(|t| t.id().is_some()));

    let all = store.list_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].name, existing.name);

    store.import_many(incoming, true).await.unwrap();
    let all = store.list_all().await.unwrap();
    assert_eq!(all[0].name, "Remote");
    // The id-less record got a new id again, so it was appended
    assert_eq!(all.len(), 3);
  }

  #[tokio::test]
  async fn test_export_matches_list() {
    let (store, _) = counting_store();
    store.save(Template::new("A")).await.unwrap();
    assert_eq!(
      store.export_all().await.unwrap(),
      store.list_all().await.unwrap()
    );
  }
}
