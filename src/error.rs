//! Error types shared by the store, cache and view layers.
//!
//! Record Store failures always reach the view as a [`SyncError`]. Cache medium
//! failures ([`MediumError`]) are logged and swallowed inside the cache layer.

use std::fmt;

/// Error reported by a Record Store call, mirroring the provider's `{code, message}` shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StoreError {
  pub code: String,
  pub message: String,
}

impl StoreError {
  pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      code: code.into(),
      message: message.into(),
    }
  }

  /// A row came back that does not decode into the requested record type.
  pub fn decode(err: impl fmt::Display) -> Self {
    Self::new("decode", err.to_string())
  }

  /// Transport-level failure (connection refused, timeout, TLS).
  pub fn transport(err: impl fmt::Display) -> Self {
    Self::new("transport", err.to_string())
  }
}

/// User-displayable error surfaced to a view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
  /// A query against the Record Store was rejected or never completed.
  #[error("failed to load: {0}")]
  FetchFailed(StoreError),

  /// A write against the Record Store was rejected. Nothing changed server-side.
  #[error("update rejected: {0}")]
  MutationFailed(StoreError),
}

impl SyncError {
  pub fn store_error(&self) -> &StoreError {
    match self {
      SyncError::FetchFailed(e) | SyncError::MutationFailed(e) => e,
    }
  }
}

/// Failure of the local cache storage medium.
#[derive(Debug, thiserror::Error)]
pub enum MediumError {
  #[error("cache quota exceeded ({used} of {limit} bytes)")]
  QuotaExceeded { used: usize, limit: usize },

  #[error("cache storage unavailable: {0}")]
  Unavailable(String),

  #[error("cache entry could not be serialized: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("cache backend error: {0}")]
  Backend(#[from] rusqlite::Error),
}
