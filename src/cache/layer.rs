//! Cache layer that orchestrates caching logic with Record Store fetching.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::storage::CacheMedium;
use super::traits::{CacheResult, QueryKey, StoredEntry};
use crate::clock::{Clock, SystemClock};
use crate::error::{MediumError, StoreError, SyncError};

/// Prefix of the one-shot force-refresh flag keys.
const REFRESH_FLAG_PREFIX: &str = "force_refresh:";

/// Cache layer that manages TTL-bounded snapshots of Record Store queries.
///
/// Entries expire lazily: staleness is checked when an entry is read, and a
/// stale entry is evicted as part of that read. Failures of the underlying
/// medium never leave this type; they are logged and treated as misses.
pub struct CacheLayer<M: CacheMedium + ?Sized> {
  medium: Arc<M>,
  clock: Arc<dyn Clock>,
  /// Default time-to-live used by [`CacheLayer::get`]
  ttl: Duration,
}

/// Cache layer over a type-erased medium chosen at runtime.
pub type SharedCache = CacheLayer<dyn CacheMedium>;

/// Write-back ordering for fetches that may overlap.
///
/// Each fetch takes a [`Ticket`]; issuing a new one supersedes every earlier
/// ticket. A superseded fetch still returns its data but no longer writes it
/// to the cache, so a slow fetch cannot overwrite a newer snapshot.
#[derive(Debug, Clone, Default)]
pub struct Generation {
  current: Arc<Mutex<u64>>,
}

impl Generation {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start a new generation, superseding every outstanding ticket.
  pub fn issue(&self) -> Ticket {
    let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
    *current += 1;
    Ticket {
      generation: self.clone(),
      id: *current,
    }
  }
}

/// Permission to write back the result of one fetch.
#[derive(Debug, Clone)]
pub struct Ticket {
  generation: Generation,
  id: u64,
}

impl Ticket {
  pub fn is_current(&self) -> bool {
    *self
      .generation
      .current
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      == self.id
  }

  /// Run `write` if no newer ticket has been issued. The generation stays
  /// locked while `write` runs, so a newer fetch cannot start in between.
  fn commit(&self, write: impl FnOnce()) -> bool {
    let current = self
      .generation
      .current
      .lock()
      .unwrap_or_else(|e| e.into_inner());
    if *current != self.id {
      return false;
    }
    write();
    true
  }
}

impl<M: CacheMedium> CacheLayer<M> {
  /// Create a new cache layer with the given storage medium.
  pub fn new(medium: M) -> Self {
    Self::from_shared(Arc::new(medium))
  }
}

impl<M: CacheMedium + ?Sized> CacheLayer<M> {
  /// Create a cache layer over a medium that other layers may also hold.
  pub fn from_shared(medium: Arc<M>) -> Self {
    Self {
      medium,
      clock: Arc::new(SystemClock),
      ttl: Duration::minutes(60),
    }
  }

  /// Set the default time-to-live.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  /// Replace the time source.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  pub fn medium(&self) -> &M {
    &self.medium
  }

  /// Cached payload for `key` if present and within the default TTL.
  pub fn get<T, K>(&self, key: &K) -> Option<T>
  where
    T: DeserializeOwned,
    K: QueryKey + ?Sized,
  {
    self.get_within(key, self.ttl)
  }

  /// Cached payload for `key` if present and no older than `ttl`.
  pub fn get_within<T, K>(&self, key: &K, ttl: Duration) -> Option<T>
  where
    T: DeserializeOwned,
    K: QueryKey + ?Sized,
  {
    self
      .read_fresh(&key.cache_key(), ttl)
      .map(|(data, _)| data)
  }

  /// Store `payload` under `key`, stamped with the current time.
  pub fn put<T, K>(&self, key: &K, payload: &T)
  where
    T: Serialize,
    K: QueryKey + ?Sized,
  {
    self.write_entry(&key.cache_key(), payload);
  }

  /// Remove the entry for `key` unconditionally.
  pub fn invalidate<K>(&self, key: &K)
  where
    K: QueryKey + ?Sized,
  {
    let storage_key = key.cache_key();
    debug!(key = %storage_key, "invalidating cache entry");
    self.remove_quietly(&storage_key);
  }

  /// Ask the next load of any key governed by `flag` to bypass the cache once.
  pub fn request_refresh(&self, flag: &str) {
    let flag_key = format!("{}{}", REFRESH_FLAG_PREFIX, flag);
    debug!(flag, "force refresh requested");
    if let Err(e) = self.medium.write(&flag_key, "1") {
      warn!(flag, error = %e, "failed to set force-refresh flag");
    }
  }

  /// Whether a force-refresh for `flag` is pending.
  pub fn refresh_requested(&self, flag: &str) -> bool {
    let flag_key = format!("{}{}", REFRESH_FLAG_PREFIX, flag);
    match self.medium.read(&flag_key) {
      Ok(value) => value.is_some(),
      Err(e) => {
        warn!(flag, error = %e, "failed to read force-refresh flag");
        false
      }
    }
  }

  fn clear_refresh(&self, flag: &str) {
    self.remove_quietly(&format!("{}{}", REFRESH_FLAG_PREFIX, flag));
  }

  /// Return the cached value if fresh, otherwise fetch, store and return it.
  ///
  /// A pending force-refresh flag for the key skips the freshness check. The
  /// flag is cleared once a fetch it triggered succeeds. Concurrent loads of
  /// the same key are not coalesced; each may call its fetcher.
  ///
  /// A failed forced load leaves the flag set rather than consuming it, so
  /// the next load bypasses the cache again until one succeeds.
  pub async fn load<T, K, F, Fut>(&self, key: &K, ttl: Duration, fetcher: F) -> Result<T, SyncError>
  where
    T: Serialize + DeserializeOwned,
    K: QueryKey + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
  {
    self
      .load_result(key, ttl, fetcher)
      .await
      .map(|result| result.data)
  }

  /// Like [`CacheLayer::load`], reporting where the data came from.
  pub async fn load_result<T, K, F, Fut>(
    &self,
    key: &K,
    ttl: Duration,
    fetcher: F,
  ) -> Result<CacheResult<T>, SyncError>
  where
    T: Serialize + DeserializeOwned,
    K: QueryKey + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
  {
    self.load_inner(key, ttl, None, fetcher).await
  }

  /// Like [`CacheLayer::load`], but the fetched result is only written back
  /// (and a force-refresh flag only consumed) while `ticket` is current.
  pub async fn load_if_current<T, K, F, Fut>(
    &self,
    key: &K,
    ttl: Duration,
    ticket: &Ticket,
    fetcher: F,
  ) -> Result<T, SyncError>
  where
    T: Serialize + DeserializeOwned,
    K: QueryKey + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
  {
    self
      .load_inner(key, ttl, Some(ticket), fetcher)
      .await
      .map(|result| result.data)
  }

  async fn load_inner<T, K, F, Fut>(
    &self,
    key: &K,
    ttl: Duration,
    ticket: Option<&Ticket>,
    fetcher: F,
  ) -> Result<CacheResult<T>, SyncError>
  where
    T: Serialize + DeserializeOwned,
    K: QueryKey + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
  {
    let storage_key = key.cache_key();
    let forced = key
      .refresh_flag()
      .filter(|flag| self.refresh_requested(flag));

    match forced {
      Some(flag) => debug!(key = %storage_key, flag, "force refresh, bypassing cache"),
      None => {
        if let Some((data, cached_at)) = self.read_fresh(&storage_key, ttl) {
          debug!(key = %storage_key, "cache hit");
          return Ok(CacheResult::from_cache(data, cached_at));
        }
      }
    }

    debug!(query = %key.description(), "fetching from record store");
    let data = fetcher().await.map_err(|e| {
      warn!(query = %key.description(), error = %e, "fetch failed");
      SyncError::FetchFailed(e)
    })?;

    self.write_back(&storage_key, &data, ticket, || {
      if let Some(flag) = forced {
        self.clear_refresh(flag);
      }
    });

    Ok(CacheResult::from_network(data))
  }

  /// Fetch unconditionally and overwrite the entry with the result.
  pub async fn refresh<T, K, F, Fut>(&self, key: &K, fetcher: F) -> Result<T, SyncError>
  where
    T: Serialize,
    K: QueryKey + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
  {
    self.refresh_inner(key, None, fetcher).await
  }

  /// Like [`CacheLayer::refresh`], writing back only while `ticket` is current.
  pub async fn refresh_if_current<T, K, F, Fut>(
    &self,
    key: &K,
    ticket: &Ticket,
    fetcher: F,
  ) -> Result<T, SyncError>
  where
    T: Serialize,
    K: QueryKey + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
  {
    self.refresh_inner(key, Some(ticket), fetcher).await
  }

  async fn refresh_inner<T, K, F, Fut>(
    &self,
    key: &K,
    ticket: Option<&Ticket>,
    fetcher: F,
  ) -> Result<T, SyncError>
  where
    T: Serialize,
    K: QueryKey + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
  {
    let data = fetcher().await.map_err(|e| {
      warn!(query = %key.description(), error = %e, "refresh failed");
      SyncError::FetchFailed(e)
    })?;
    self.write_back(&key.cache_key(), &data, ticket, || {});
    Ok(data)
  }

  /// Store a fetched result, unless a newer fetch has superseded `ticket`.
  fn write_back<T: Serialize>(
    &self,
    storage_key: &str,
    data: &T,
    ticket: Option<&Ticket>,
    then: impl FnOnce(),
  ) {
    let write = || {
      self.write_entry(storage_key, data);
      then();
    };
    match ticket {
      None => write(),
      Some(ticket) => {
        if !ticket.commit(write) {
          debug!(key = %storage_key, "fetch superseded, result not cached");
        }
      }
    }
  }

  /// Read and decode an entry, evicting it if stale or unreadable.
  fn read_fresh<T: DeserializeOwned>(
    &self,
    storage_key: &str,
    ttl: Duration,
  ) -> Option<(T, DateTime<Utc>)> {
    let raw = match self.medium.read(storage_key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key = %storage_key, error = %e, "cache read failed, treating as miss");
        return None;
      }
    };

    let entry: StoredEntry<T> = match serde_json::from_str(&raw) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(key = %storage_key, error = %e, "discarding undecodable cache entry");
        self.remove_quietly(storage_key);
        return None;
      }
    };

    let Some(stored_at) = entry.stored_at() else {
      warn!(key = %storage_key, timestamp = entry.timestamp, "discarding entry with invalid timestamp");
      self.remove_quietly(storage_key);
      return None;
    };

    if self.clock.now() - stored_at > ttl {
      debug!(key = %storage_key, "cache entry expired");
      self.remove_quietly(storage_key);
      return None;
    }

    Some((entry.data, stored_at))
  }

  fn write_entry<T: Serialize>(&self, storage_key: &str, payload: &T) {
    let entry = StoredEntry::new(payload, self.clock.now());
    let result = serde_json::to_string(&entry)
      .map_err(MediumError::from)
      .and_then(|raw| self.medium.write(storage_key, &raw));

    if let Err(e) = result {
      warn!(key = %storage_key, error = %e, "cache write failed, continuing without cache");
    }
  }

  fn remove_quietly(&self, storage_key: &str) {
    if let Err(e) = self.medium.remove(storage_key) {
      warn!(key = %storage_key, error = %e, "failed to remove cache entry");
    }
  }
}

impl<M: CacheMedium + ?Sized> Clone for CacheLayer<M> {
  fn clone(&self) -> Self {
    Self {
      medium: Arc::clone(&self.medium),
      clock: Arc::clone(&self.clock),
      ttl: self.ttl,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryMedium;
  use crate::cache::traits::CacheSource;
  use crate::clock::ManualClock;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct TestKey {
    key: &'static str,
    flag: Option<&'static str>,
  }

  impl TestKey {
    const fn plain(key: &'static str) -> Self {
      Self { key, flag: None }
    }

    const fn flagged(key: &'static str, flag: &'static str) -> Self {
      Self {
        key,
        flag: Some(flag),
      }
    }
  }

  impl QueryKey for TestKey {
    fn cache_key(&self) -> String {
      self.key.to_string()
    }

    fn description(&self) -> String {
      format!("test {}", self.key)
    }

    fn refresh_flag(&self) -> Option<&'static str> {
      self.flag
    }
  }

  /// Medium whose every operation fails.
  struct BrokenMedium;

  impl CacheMedium for BrokenMedium {
    fn read(&self, _key: &str) -> Result<Option<String>, MediumError> {
      Err(MediumError::Unavailable("storage disabled".into()))
    }

    fn write(&self, _key: &str, _value: &str) -> Result<(), MediumError> {
      Err(MediumError::Unavailable("storage disabled".into()))
    }

    fn remove(&self, _key: &str) -> Result<(), MediumError> {
      Err(MediumError::Unavailable("storage disabled".into()))
    }
  }

  fn layer_with_clock() -> (CacheLayer<MemoryMedium>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let layer = CacheLayer::new(MemoryMedium::new())
      .with_ttl(Duration::minutes(60))
      .with_clock(clock.clone());
    (layer, clock)
  }

  #[test]
  fn test_get_respects_ttl() {
    let (layer, clock) = layer_with_clock();
    let key = TestKey::plain("g1");
    layer.put(&key, &vec!["course-a".to_string()]);

    clock.advance(Duration::minutes(59));
    assert_eq!(
      layer.get::<Vec<String>, _>(&key),
      Some(vec!["course-a".to_string()])
    );

    clock.advance(Duration::minutes(2));
    assert_eq!(layer.get::<Vec<String>, _>(&key), None);
  }

  #[test]
  fn test_expired_read_evicts_entry() {
    let (layer, clock) = layer_with_clock();
    let key = TestKey::plain("g1");
    layer.put(&key, &1u32);

    clock.advance(Duration::minutes(61));
    assert_eq!(layer.get::<u32, _>(&key), None);
    assert_eq!(layer.medium().read("g1").unwrap(), None);
  }

  #[test]
  fn test_entry_at_exact_ttl_is_fresh() {
    let (layer, clock) = layer_with_clock();
    let key = TestKey::plain("edge");
    layer.put(&key, &7u8);

    clock.advance(Duration::minutes(60));
    assert_eq!(layer.get::<u8, _>(&key), Some(7));
  }

  #[test]
  fn test_put_resets_timestamp() {
    let (layer, clock) = layer_with_clock();
    let key = TestKey::plain("k");
    layer.put(&key, &1u32);
    clock.advance(Duration::minutes(50));
    layer.put(&key, &2u32);
    clock.advance(Duration::minutes(50));

    assert_eq!(layer.get::<u32, _>(&key), Some(2));
  }

  #[test]
  fn test_key_isolation() {
    let (layer, _) = layer_with_clock();
    layer.put(&TestKey::plain("a"), &"x".to_string());
    layer.put(&TestKey::plain("b"), &"y".to_string());

    assert_eq!(
      layer.get::<String, _>(&TestKey::plain("a")).as_deref(),
      Some("x")
    );
    assert_eq!(
      layer.get::<String, _>(&TestKey::plain("b")).as_deref(),
      Some("y")
    );
  }

  #[test]
  fn test_write_failure_is_swallowed() {
    let layer = CacheLayer::new(MemoryMedium::new().with_quota(8));
    let key = TestKey::plain("big");
    layer.put(&key, &"this payload does not fit".to_string());

    assert_eq!(layer.get::<String, _>(&key), None);
  }

  #[test]
  fn test_broken_medium_never_errors() {
    let layer = CacheLayer::new(BrokenMedium);
    let key = TestKey::flagged("k", "list");
    layer.put(&key, &1u32);
    layer.invalidate(&key);
    layer.request_refresh("list");
    assert!(!layer.refresh_requested("list"));
    assert_eq!(layer.get::<u32, _>(&key), None);
  }

  #[test]
  fn test_corrupt_entry_reads_as_miss() {
    let (layer, _) = layer_with_clock();
    layer.medium().write("g1", "{not json").unwrap();

    assert_eq!(layer.get::<Vec<u32>, _>(&TestKey::plain("g1")), None);
    // Corrupt value is evicted as well
    assert_eq!(layer.medium().read("g1").unwrap(), None);
  }

  #[test]
  fn test_wrong_shape_reads_as_miss() {
    let (layer, _) = layer_with_clock();
    layer.put(&TestKey::plain("g1"), &"a string");

    assert_eq!(layer.get::<Vec<u32>, _>(&TestKey::plain("g1")), None);
  }

  #[tokio::test]
  async fn test_invalidate_then_load_refetches() {
    let (layer, _) = layer_with_clock();
    let key = TestKey::plain("k");
    layer.put(&key, &"A".to_string());
    layer.invalidate(&key);

    let loaded = layer
      .load(&key, Duration::minutes(60), || async {
        Ok::<_, StoreError>("B".to_string())
      })
      .await
      .unwrap();

    assert_eq!(loaded, "B");
    assert_eq!(layer.get::<String, _>(&key).as_deref(), Some("B"));
  }

  #[tokio::test]
  async fn test_load_serves_fresh_cache_without_fetch() {
    let (layer, _) = layer_with_clock();
    let key = TestKey::plain("k");
    layer.put(&key, &5u32);

    let result = layer
      .load_result(&key, Duration::minutes(60), || async {
        Err::<u32, _>(StoreError::new("unreachable", "should not fetch"))
      })
      .await
      .unwrap();

    assert_eq!(result.data, 5);
    assert_eq!(result.source, CacheSource::Cache);
    assert!(result.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_fetch_failure_leaves_cache_untouched() {
    let (layer, clock) = layer_with_clock();
    let key = TestKey::plain("k");
    layer.put(&key, &1u32);
    clock.advance(Duration::minutes(10));

    let err = layer
      .load(&key, Duration::minutes(5), || async {
        Err::<u32, _>(StoreError::new("503", "unavailable"))
      })
      .await
      .unwrap_err();

    assert!(matches!(err, SyncError::FetchFailed(_)));
    // The stale read evicted the entry; the failed fetch wrote nothing
    assert_eq!(layer.get::<u32, _>(&key), None);
  }

  #[tokio::test]
  async fn test_force_refresh_flag_is_one_shot() {
    let (layer, _) = layer_with_clock();
    let key = TestKey::flagged("packs:g1", "course_packs");
    let counter = AtomicUsize::new(0);
    let fetches = &counter;
    let fetch = move || async move {
      let n = fetches.fetch_add(1, Ordering::SeqCst) as u32;
      Ok::<_, StoreError>(n + 10)
    };

    layer.put(&key, &1u32);
    layer.request_refresh("course_packs");

    let first = layer.load(&key, Duration::minutes(60), fetch).await.unwrap();
    assert_eq!(first, 10);
    assert!(!layer.refresh_requested("course_packs"));

    let second = layer.load(&key, Duration::minutes(60), fetch).await.unwrap();
    assert_eq!(second, 10);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_failed_forced_load_keeps_flag() {
    let (layer, _) = layer_with_clock();
    let key = TestKey::flagged("packs:g1", "course_packs");
    layer.put(&key, &1u32);
    layer.request_refresh("course_packs");

    let result = layer
      .load(&key, Duration::minutes(60), || async {
        Err::<u32, _>(StoreError::transport("connection reset"))
      })
      .await;

    assert!(result.is_err());
    assert!(layer.refresh_requested("course_packs"));
  }

  #[tokio::test]
  async fn test_flag_only_affects_its_keys() {
    let (layer, _) = layer_with_clock();
    let other = TestKey::flagged("users", "users");
    layer.put(&other, &3u32);
    layer.request_refresh("course_packs");

    let value = layer
      .load(&other, Duration::minutes(60), || async {
        Err::<u32, _>(StoreError::new("unreachable", "should not fetch"))
      })
      .await
      .unwrap();

    assert_eq!(value, 3);
    assert!(layer.refresh_requested("course_packs"));
  }

  #[tokio::test]
  async fn test_refresh_always_fetches_and_stores() {
    let (layer, _) = layer_with_clock();
    let key = TestKey::plain("k");
    layer.put(&key, &1u32);

    let value = layer
      .refresh(&key, || async { Ok::<_, StoreError>(2u32) })
      .await
      .unwrap();

    assert_eq!(value, 2);
    assert_eq!(layer.get::<u32, _>(&key), Some(2));
  }

  #[tokio::test]
  async fn test_concurrent_loads_may_both_fetch() {
    let (layer, _) = layer_with_clock();
    let key = TestKey::plain("k");
    let counter = AtomicUsize::new(0);
    let fetches = &counter;
    let fetch = move || async move {
      fetches.fetch_add(1, Ordering::SeqCst);
      tokio::task::yield_now().await;
      Ok::<_, StoreError>(1u32)
    };

    let (a, b) = tokio::join!(
      layer.load(&key, Duration::minutes(60), fetch),
      layer.load(&key, Duration::minutes(60), fetch),
    );

    assert_eq!(a.unwrap(), 1);
    assert_eq!(b.unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_superseded_ticket_keeps_cache_and_flag() {
    let (layer, _) = layer_with_clock();
    let key = TestKey::flagged("packs:g1", "course_packs");
    let generation = Generation::new();
    let stale = generation.issue();
    let fresh = generation.issue();
    layer.request_refresh("course_packs");

    let value = layer
      .load_if_current(&key, Duration::minutes(60), &stale, || async {
        Ok::<_, StoreError>(1u32)
      })
      .await
      .unwrap();

    assert_eq!(value, 1);
    assert!(!stale.is_current());
    assert_eq!(layer.get::<u32, _>(&key), None);
    assert!(layer.refresh_requested("course_packs"));

    layer
      .load_if_current(&key, Duration::minutes(60), &fresh, || async {
        Ok::<_, StoreError>(2u32)
      })
      .await
      .unwrap();

    assert_eq!(layer.get::<u32, _>(&key), Some(2));
    assert!(!layer.refresh_requested("course_packs"));
  }

  #[tokio::test]
  async fn test_superseded_refresh_is_not_written() {
    let (layer, _) = layer_with_clock();
    let key = TestKey::plain("k");
    let generation = Generation::new();
    let stale = generation.issue();
    layer.put(&key, &1u32);
    generation.issue();

    layer
      .refresh_if_current(&key, &stale, || async { Ok::<_, StoreError>(0u32) })
      .await
      .unwrap();

    assert_eq!(layer.get::<u32, _>(&key), Some(1));
  }
}
