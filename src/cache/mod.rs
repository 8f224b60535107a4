//! Generic caching layer for Record Store snapshots.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Stores one JSON snapshot per namespaced key, stamped with its write time
//! - Expires entries lazily when they are read past their TTL
//! - Treats every storage-medium failure as a miss, never as an error
//! - Supports one-shot force-refresh flags consumed by the next load

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, Generation, SharedCache, Ticket};
pub use storage::{CacheMedium, MemoryMedium, NoopMedium, SqliteMedium};
pub use traits::{CacheResult, CacheSource, QueryKey, StoredEntry};
