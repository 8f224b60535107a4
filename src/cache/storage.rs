//! Cache storage medium trait and its implementations.
//!
//! A medium is a flat string key/value store with no cross-key
//! transactionality, the same contract browser local storage offers.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::MediumError;

/// Trait for cache storage backends.
pub trait CacheMedium: Send + Sync {
  /// Read the raw value stored under `key`.
  fn read(&self, key: &str) -> Result<Option<String>, MediumError>;

  /// Write `value` under `key`, replacing any previous value.
  fn write(&self, key: &str, value: &str) -> Result<(), MediumError>;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<(), MediumError>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopMedium;

impl CacheMedium for NoopMedium {
  fn read(&self, _key: &str) -> Result<Option<String>, MediumError> {
    Ok(None) // Always miss
  }

  fn write(&self, _key: &str, _value: &str) -> Result<(), MediumError> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<(), MediumError> {
    Ok(())
  }
}

/// In-process medium with an optional total size quota.
#[derive(Default)]
pub struct MemoryMedium {
  entries: Mutex<HashMap<String, String>>,
  quota_bytes: Option<usize>,
}

impl MemoryMedium {
  pub fn new() -> Self {
    Self::default()
  }

  /// Limit the summed size of keys and values, like a browser storage quota.
  pub fn with_quota(mut self, bytes: usize) -> Self {
    self.quota_bytes = Some(bytes);
    self
  }

  /// Number of stored keys, flags included.
  pub fn len(&self) -> usize {
    self.entries.lock().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl CacheMedium for MemoryMedium {
  fn read(&self, key: &str) -> Result<Option<String>, MediumError> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| MediumError::Unavailable(format!("lock poisoned: {}", e)))?;
    Ok(entries.get(key).cloned())
  }

  fn write(&self, key: &str, value: &str) -> Result<(), MediumError> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| MediumError::Unavailable(format!("lock poisoned: {}", e)))?;

    if let Some(limit) = self.quota_bytes {
      let others: usize = entries
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| k.len() + v.len())
        .sum();
      let used = others + key.len() + value.len();
      if used > limit {
        return Err(MediumError::QuotaExceeded { used, limit });
      }
    }

    entries.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), MediumError> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| MediumError::Unavailable(format!("lock poisoned: {}", e)))?;
    entries.remove(key);
    Ok(())
  }
}

/// SQLite-based cache medium, shared by every process that opens the same file.
pub struct SqliteMedium {
  conn: Mutex<Connection>,
}

impl SqliteMedium {
  /// Open the medium at `path`, or at the default data-dir location.
  pub fn open(path: Option<&Path>) -> Result<Self, MediumError> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        MediumError::Unavailable(format!(
          "failed to create cache directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(&path)?;
    Self::with_connection(conn)
  }

  /// Private in-memory database.
  pub fn open_in_memory() -> Result<Self, MediumError> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self, MediumError> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf, MediumError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| MediumError::Unavailable("could not determine data directory".into()))?;

    Ok(data_dir.join("elective-sync").join("cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, MediumError> {
    self
      .conn
      .lock()
      .map_err(|e| MediumError::Unavailable(format!("lock poisoned: {}", e)))
  }
}

/// Schema for the key/value cache table.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_cache (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl CacheMedium for SqliteMedium {
  fn read(&self, key: &str) -> Result<Option<String>, MediumError> {
    let conn = self.lock()?;
    let value = conn
      .query_row(
        "SELECT value FROM kv_cache WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn write(&self, key: &str, value: &str) -> Result<(), MediumError> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO kv_cache (key, value, written_at) VALUES (?, ?, datetime('now'))",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), MediumError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM kv_cache WHERE key = ?", params![key])?;
    Ok(())
  }
}
