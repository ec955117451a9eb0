//! Embedded database backend (SQLite).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::backend::StorageBackend;
use super::TEMPLATES_KEY;

/// Current schema version, tracked through `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 2;

/// Schema for version 1.
const SCHEMA_V1: &str = r#"
-- Templates keyed by id, position preserves collection order
CREATE TABLE IF NOT EXISTS templates (
    id TEXT PRIMARY KEY,
    position INTEGER NOT NULL,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_templates_position ON templates(position);

-- Everything else
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Schema for version 2: a row here means the collection has been written,
/// so an empty table reads as an empty collection rather than absent.
const SCHEMA_V2: &str = r#"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

INSERT OR IGNORE INTO collections (name)
    SELECT 'templates' WHERE EXISTS (SELECT 1 FROM templates);
"#;

/// SQLite-backed storage with two logical tables.
///
/// The `templates` key is mapped onto its own table, one row per template,
/// whenever the value is a list of records with distinct ids. Any other value
/// under that key, and every other key, lands in `kv`.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database under `data_dir`.
  pub fn open(data_dir: &Path) -> Result<Self> {
    Self::open_at(&Self::path_in(data_dir))
  }

  /// Database file location inside a data directory.
  pub fn path_in(data_dir: &Path) -> PathBuf {
    data_dir.join("jtmpl.db")
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Bring the schema up to [`SCHEMA_VERSION`].
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    let version: i32 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))?;

    if version > SCHEMA_VERSION {
      return Err(eyre!(
        "Database schema version {} is newer than supported version {}",
        version,
        SCHEMA_VERSION
      ));
    }

    if version < 1 {
      conn
        .execute_batch(SCHEMA_V1)
        .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    }
    if version < 2 {
      conn
        .execute_batch(SCHEMA_V2)
        .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    }
    if version < SCHEMA_VERSION {
      conn
        .execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .map_err(|e| eyre!("Failed to record schema version: {}", e))?;
    }

    Ok(())
  }

  /// One-time import of the legacy flat template array.
  ///
  /// Only runs while the template collection has never been written and
  /// `legacy` has records, so calling it again after a successful run (or
  /// after the user emptied the collection) is a no-op. Records without an
  /// id get a fresh one. Returns the number of rows written.
  pub fn migrate_legacy_templates(&self, legacy: &[Value]) -> Result<usize> {
    if legacy.is_empty() {
      return Ok(0);
    }

    let mut conn = self.lock()?;

    if Self::templates_written(&conn)? {
      return Ok(0);
    }

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut migrated = 0;
    for record in legacy {
      let Value::Object(fields) = record else {
        warn!("Skipping non-object legacy template record");
        continue;
      };

      let mut fields = fields.clone();
      let id = match fields.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
          let id = uuid::Uuid::new_v4().to_string();
          fields.insert("id".to_string(), Value::String(id.clone()));
          id
        }
      };

      let data = serde_json::to_string(&Value::Object(fields))
        .map_err(|e| eyre!("Failed to serialize template {}: {}", id, e))?;
      tx.execute(
        "INSERT OR IGNORE INTO templates (id, position, data) VALUES (?, ?, ?)",
        params![id, migrated as i64, data],
      )
      .map_err(|e| eyre!("Failed to migrate template {}: {}", id, e))?;
      migrated += 1;
    }

    Self::mark_templates_written(&tx)?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit migration: {}", e))?;

    info!("Migrated {} legacy templates into the database", migrated);
    Ok(migrated)
  }

  fn templates_written(conn: &Connection) -> Result<bool> {
    conn
      .query_row(
        "SELECT EXISTS(SELECT 1 FROM collections WHERE name = ?)",
        params![TEMPLATES_KEY],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to check template collection: {}", e))
  }

  fn mark_templates_written(conn: &Connection) -> Result<()> {
    conn
      .execute(
        "INSERT OR REPLACE INTO collections (name, updated_at) VALUES (?, datetime('now'))",
        params![TEMPLATES_KEY],
      )
      .map_err(|e| eyre!("Failed to mark template collection: {}", e))?;
    Ok(())
  }

  /// Template rows in order, or `None` when the collection was never
  /// written in table form.
  fn read_templates(conn: &Connection) -> Result<Option<Value>> {
    if !Self::templates_written(conn)? {
      return Ok(None);
    }

    let mut stmt = conn
      .prepare("SELECT data FROM templates ORDER BY position")
      .map_err(|e| eyre!("Failed to prepare template query: {}", e))?;

    let rows: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query templates: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read template row: {}", e))?;

    let templates = rows
      .iter()
      .map(|data| serde_json::from_str(data))
      .collect::<serde_json::Result<Vec<Value>>>()
      .map_err(|e| eyre!("Failed to deserialize template: {}", e))?;

    Ok(Some(Value::Array(templates)))
  }

  /// Ids of `value` when it fits the templates table: an array of records
  /// with distinct, non-empty string ids.
  fn table_ids(value: &Value) -> Option<Vec<&str>> {
    let mut seen = HashSet::new();
    value
      .as_array()?
      .iter()
      .map(|record| {
        record
          .get("id")
          .and_then(Value::as_str)
          .filter(|id| !id.is_empty() && seen.insert(*id))
      })
      .collect()
  }

  fn write_templates(conn: &mut Connection, value: &Value) -> Result<()> {
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM templates", [])
      .map_err(|e| eyre!("Failed to delete old templates: {}", e))?;

    match (Self::table_ids(value), value.as_array()) {
      (Some(ids), Some(records)) => {
        tx.execute("DELETE FROM kv WHERE key = ?", params![TEMPLATES_KEY])
          .map_err(|e| eyre!("Failed to delete old templates: {}", e))?;

        for (position, (id, record)) in ids.iter().zip(records).enumerate() {
          let data = serde_json::to_string(record)
            .map_err(|e| eyre!("Failed to serialize template {}: {}", id, e))?;
          tx.execute(
            "INSERT INTO templates (id, position, data) VALUES (?, ?, ?)",
            params![id, position as i64, data],
          )
          .map_err(|e| eyre!("Failed to store template {}: {}", id, e))?;
        }
        Self::mark_templates_written(&tx)?;
      }
      _ => {
        debug!("Storing template value outside the templates table");
        tx.execute("DELETE FROM collections WHERE name = ?", params![TEMPLATES_KEY])
          .map_err(|e| eyre!("Failed to reset template collection: {}", e))?;
        Self::write_kv(&tx, TEMPLATES_KEY, value)?;
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn read_kv(conn: &Connection, key: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read key {}: {}", key, e))?;

    raw
      .map(|data| serde_json::from_str(&data))
      .transpose()
      .map_err(|e| eyre!("Failed to deserialize key {}: {}", key, e))
  }

  fn write_kv(conn: &Connection, key: &str, value: &Value) -> Result<()> {
    let data =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize key {}: {}", key, e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))",
        params![key, data],
      )
      .map_err(|e| eyre!("Failed to store key {}: {}", key, e))?;
    Ok(())
  }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
  fn name(&self) -> &'static str {
    "sqlite"
  }

  async fn get(&self, key: &str) -> Result<Option<Value>> {
    let conn = self.lock()?;

    if key == TEMPLATES_KEY {
      if let Some(templates) = Self::read_templates(&conn)? {
        return Ok(Some(templates));
      }
    }

    Self::read_kv(&conn, key)
  }

  async fn set(&self, key: &str, value: Value) -> Result<()> {
    let mut conn = self.lock()?;

    if key == TEMPLATES_KEY {
      return Self::write_templates(&mut conn, &value);
    }

    Self::write_kv(&conn, key, &value)
  }

  async fn has(&self, key: &str) -> Result<bool> {
    let conn = self.lock()?;

    if key == TEMPLATES_KEY && Self::templates_written(&conn)? {
      return Ok(true);
    }

    conn
      .query_row(
        "SELECT EXISTS(SELECT 1 FROM kv WHERE key = ?)",
        params![key],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to check key {}: {}", key, e))
  }

  async fn delete(&self, key: &str) -> Result<()> {
    let conn = self.lock()?;

    if key == TEMPLATES_KEY {
      conn
        .execute_batch("DELETE FROM templates; DELETE FROM collections WHERE name = 'templates';")
        .map_err(|e| eyre!("Failed to delete templates: {}", e))?;
    }
    conn
      .execute("DELETE FROM kv WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete key {}: {}", key, e))?;

    Ok(())
  }

  async fn clear(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch("DELETE FROM templates; DELETE FROM collections; DELETE FROM kv;")
      .map_err(|e| eyre!("Failed to clear database: {}", e))?;
    Ok(())
  }

  async fn get_all(&self) -> Result<Map<String, Value>> {
    let conn = self.lock()?;

    let mut all = Map::new();
    {
      let mut stmt = conn
        .prepare("SELECT key, value FROM kv")
        .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

      let rows: Vec<(String, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| eyre!("Failed to query keys: {}", e))?
        .collect::<rusqlite::Result<_>>()
        .map_err(|e| eyre!("Failed to read row: {}", e))?;

      for (key, data) in rows {
        match serde_json::from_str(&data) {
          Ok(value) => {
            all.insert(key, value);
          }
          Err(e) => warn!("Skipping undecodable value for key {}: {}", key, e),
        }
      }
    }

    if let Some(templates) = Self::read_templates(&conn)? {
      all.insert(TEMPLATES_KEY.to_string(), templates);
    }

    Ok(all)
  }
}
