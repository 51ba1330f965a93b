//! SQLite implementation of the blob store.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::BlobStore;
use crate::net::Response;

/// SQLite-based blob store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  /// Get the default store path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-cache").join("store.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for store tables.
const STORE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named partitions, id order is creation order
CREATE TABLE IF NOT EXISTS partitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response blobs keyed by request identity
CREATE TABLE IF NOT EXISTS entries (
    partition_id INTEGER NOT NULL,
    entry_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition_id, entry_key),
    FOREIGN KEY (partition_id) REFERENCES partitions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(entry_key);
"#;

/// Look up a partition id, creating the partition when `create` is set.
fn partition_id(conn: &Connection, name: &str, create: bool) -> Result<Option<i64>> {
  if create {
    conn
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create partition {}: {}", name, e))?;
  }

  conn
    .query_row(
      "SELECT id FROM partitions WHERE name = ?",
      params![name],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| eyre!("Failed to look up partition {}: {}", name, e))
}

fn insert_entry(conn: &Connection, id: i64, key: &str, blob: &Response) -> Result<()> {
  let headers = serde_json::to_string(&blob.headers)
    .map_err(|e| eyre!("Failed to serialize headers for {}: {}", key, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (partition_id, entry_key, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, datetime('now'))",
      params![id, key, blob.status, headers, blob.body],
    )
    .map_err(|e| eyre!("Failed to store entry {}: {}", key, e))?;

  Ok(())
}

fn decode_entry(key: &str, status: u16, headers: &str, body: Vec<u8>) -> Result<Response> {
  let headers: Vec<(String, String)> = serde_json::from_str(headers)
    .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;
  Ok(Response::new(status, headers, body))
}

type EntryRow = (u16, String, Vec<u8>);

#[async_trait]
impl BlobStore for SqliteStore {
  async fn open_partition(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    partition_id(&conn, name, true)?;
    Ok(())
  }

  async fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read partition name: {}", e))?;

    Ok(names)
  }

  async fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let Some(id) = partition_id(&tx, name, false)? else {
      return Ok(false);
    };

    tx.execute("DELETE FROM entries WHERE partition_id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    tx.execute("DELETE FROM partitions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(true)
  }

  async fn get(&self, partition: &str, key: &str) -> Result<Option<Response>> {
    let conn = self.lock()?;
    let Some(id) = partition_id(&conn, partition, false)? else {
      return Ok(None);
    };

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT status, headers, body FROM entries WHERE partition_id = ? AND entry_key = ?",
        params![id, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read entry {}: {}", key, e))?;

    row
      .map(|(status, headers, body)| decode_entry(key, status, &headers, body))
      .transpose()
  }

  async fn put(&self, partition: &str, key: &str, blob: &Response) -> Result<()> {
    let conn = self.lock()?;
    let id = partition_id(&conn, partition, true)?
      .ok_or_else(|| eyre!("Partition {} vanished during write", partition))?;
    insert_entry(&conn, id, key, blob)
  }

  async fn put_all(&self, partition: &str, entries: &[(String, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let id = partition_id(&tx, partition, true)?
      .ok_or_else(|| eyre!("Partition {} vanished during write", partition))?;
    for (key, blob) in entries {
      insert_entry(&tx, id, key, blob)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  async fn delete(&self, partition: &str, key: &str) -> Result<bool> {
    let conn = self.lock()?;
    let Some(id) = partition_id(&conn, partition, false)? else {
      return Ok(false);
    };

    let removed = conn
      .execute(
        "DELETE FROM entries WHERE partition_id = ? AND entry_key = ?",
        params![id, key],
      )
      .map_err(|e| eyre!("Failed to delete entry {}: {}", key, e))?;

    Ok(removed > 0)
  }

  async fn keys(&self, partition: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let Some(id) = partition_id(&conn, partition, false)? else {
      return Ok(Vec::new());
    };

    let mut stmt = conn
      .prepare("SELECT entry_key FROM entries WHERE partition_id = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![id], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys of {}: {}", partition, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  async fn match_any(&self, key: &str) -> Result<Option<Response>> {
    let conn = self.lock()?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT e.status, e.headers, e.body FROM entries e
         INNER JOIN partitions p ON p.id = e.partition_id
         WHERE e.entry_key = ?
         ORDER BY p.id
         LIMIT 1",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to match entry {}: {}", key, e))?;

    row
      .map(|(status, headers, body)| decode_entry(key, status, &headers, body))
      .transpose()
  }
}
