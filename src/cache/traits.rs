//! Core traits and types for the caching system.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Typed cache key.
///
/// Implementors build the storage key from every dimension that affects the
/// result set, so two different logical queries never share a slot.
pub trait QueryKey {
  /// Namespaced storage key (e.g. `selections:group=g1:pack=p7:kind=course`)
  fn cache_key(&self) -> String;

  /// Human-readable description for logs
  fn description(&self) -> String;

  /// Name of the one-shot force-refresh flag governing this key, if any.
  fn refresh_flag(&self) -> Option<&'static str> {
    None
  }
}

/// Persisted shape of a cache entry: `{"data": T, "timestamp": <epoch-ms>}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry<T> {
  pub data: T,
  pub timestamp: i64,
}

impl<T> StoredEntry<T> {
  pub fn new(data: T, stored_at: DateTime<Utc>) -> Self {
    Self {
      data,
      timestamp: stored_at.timestamp_millis(),
    }
  }

  /// Timestamp as a `DateTime`; `None` for out-of-range values.
  pub fn stored_at(&self) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(self.timestamp).single()
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the data was cached (if served from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where loaded data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the Record Store
  Network,
  /// Served from a fresh cache entry
  Cache,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_stored_entry_wire_format() {
    let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
    let entry = StoredEntry::new(vec![1, 2], at);
    let json = serde_json::to_string(&entry).unwrap();
    assert_eq!(json, r#"{"data":[1,2],"timestamp":1700000000123}"#);

    let back: StoredEntry<Vec<i32>> = serde_json::from_str(&json).unwrap();
    assert_eq!(back.stored_at(), Some(at));
  }
}
