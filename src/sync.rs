//! Per-view synchronisation of a cached query with the Record Store.
//!
//! A [`ViewSync`] is created when a view mounts and dropped when it goes away.
//! It owns the view's load state and its change subscriptions, and reconciles
//! three sources of change:
//! - reads: the initial load goes through the cache layer
//! - this client's writes: confirm-then-apply, then invalidate
//! - other clients' writes: a change notification triggers a full refetch

use chrono::Duration;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::cache::{Generation, QueryKey, SharedCache};
use crate::error::{StoreError, SyncError};
use crate::query::{Query, QueryState};
use crate::store::{Filter, RecordStore, Subscription};

/// A `(table, filter)` pair a view listens to.
#[derive(Debug, Clone, PartialEq)]
pub struct Watch {
  pub table: String,
  pub filter: Filter,
}

impl Watch {
  pub fn new(table: impl Into<String>, filter: Filter) -> Self {
    Self {
      table: table.into(),
      filter,
    }
  }
}

/// Load state plus live subscriptions for one mounted view.
pub struct ViewSync<D, K> {
  cache: SharedCache,
  key: K,
  query: Query<D>,
  /// Set before a refetch that must skip the cache; read once by the fetcher
  bypass: Arc<AtomicBool>,
  /// Only the most recently started fetch may write back to the cache
  generation: Generation,
  subscriptions: Vec<Subscription>,
}

impl<D, K> ViewSync<D, K>
where
  D: Serialize + DeserializeOwned + Send + 'static,
  K: QueryKey + Clone + Send + Sync + 'static,
{
  /// Mount a view: subscribe to every watch and start the initial load.
  pub fn mount<F, Fut>(
    cache: SharedCache,
    store: &dyn RecordStore,
    key: K,
    ttl: Duration,
    watches: &[Watch],
    fetcher: F,
  ) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<D, StoreError>> + Send + 'static,
  {
    let bypass = Arc::new(AtomicBool::new(false));
    let generation = Generation::new();
    let fetcher = Arc::new(fetcher);

    let mut query = {
      let cache = cache.clone();
      let key = key.clone();
      let bypass = bypass.clone();
      let generation = generation.clone();
      Query::new(move || {
        let cache = cache.clone();
        let key = key.clone();
        let fetcher = fetcher.clone();
        let forced = bypass.swap(false, Ordering::SeqCst);
        // Called when the fetch starts, so every start supersedes the last
        let ticket = generation.issue();
        async move {
          if forced {
            cache.refresh_if_current(&key, &ticket, || (*fetcher)()).await
          } else {
            cache.load_if_current(&key, ttl, &ticket, || (*fetcher)()).await
          }
        }
      })
    };

    let subscriptions = watches
      .iter()
      .filter_map(|watch| match store.subscribe(&watch.table, watch.filter.clone()) {
        Ok(sub) => Some(sub),
        Err(e) => {
          warn!(table = %watch.table, error = %e, "subscription failed, view will not live-update");
          None
        }
      })
      .collect();

    debug!(query = %key.description(), "view mounted");
    query.fetch();

    Self {
      cache,
      key,
      query,
      bypass,
      generation,
      subscriptions,
    }
  }

  pub fn key(&self) -> &K {
    &self.key
  }

  pub fn state(&self) -> &QueryState<D> {
    self.query.state()
  }

  pub fn data(&self) -> Option<&D> {
    self.query.data()
  }

  pub fn is_loading(&self) -> bool {
    self.query.is_loading()
  }

  pub fn error(&self) -> Option<&SyncError> {
    self.query.error()
  }

  /// Number of live subscriptions held by this view.
  pub fn subscription_count(&self) -> usize {
    self.subscriptions.len()
  }

  /// Drain change notifications and fetch results.
  ///
  /// Returns `true` if the view state changed. Call on every tick.
  pub fn poll(&mut self) -> bool {
    let mut notified = false;
    for sub in &mut self.subscriptions {
      while let Some(event) = sub.try_recv() {
        debug!(table = %event.table, kind = ?event.kind, "change notification");
        notified = true;
      }
    }
    if notified {
      self.reconcile();
    }
    self.query.poll()
  }

  /// Wait for the outstanding fetch, if any, and apply it.
  pub async fn settle(&mut self) -> bool {
    self.query.settle().await
  }

  /// Re-run the query through the cache, e.g. after an error.
  pub fn retry(&mut self) {
    self.query.refetch();
  }

  /// Reload through the cache, keeping current data visible. Picks up a
  /// pending force-refresh flag for the key.
  pub fn reload(&mut self) {
    self.query.refetch_in_background();
  }

  /// User-requested refresh: skip the cache and show the loading state.
  pub fn force_refresh(&mut self) {
    self.bypass.store(true, Ordering::SeqCst);
    self.query.refetch();
  }

  /// Full refetch after a change notification. The fresh result is written to
  /// the cache before it reaches the view; current data stays on screen meanwhile.
  fn reconcile(&mut self) {
    debug!(query = %self.key.description(), "reconciling after remote change");
    self.bypass.store(true, Ordering::SeqCst);
    self.query.refetch_in_background();
  }

  /// Run a confirmed mutation and apply it to the in-memory data.
  ///
  /// The mutation is awaited first. On success `apply` updates the loaded
  /// data in place (no refetch) and the view's key plus `also_invalidate`
  /// are each invalidated once. On failure nothing local changes.
  pub async fn mutate<R, Fut, A>(
    &mut self,
    mutation: Fut,
    also_invalidate: &[&dyn QueryKey],
    apply: A,
  ) -> Result<R, SyncError>
  where
    Fut: Future<Output = Result<R, StoreError>>,
    A: FnOnce(&mut D, &R),
  {
    let outcome = mutation.await;
    self.confirm(outcome, also_invalidate, apply)
  }

  /// Second half of [`ViewSync::mutate`], for mutations that were awaited
  /// elsewhere (see [`PendingMutation`]).
  pub fn confirm<R, A>(
    &mut self,
    outcome: Result<R, StoreError>,
    also_invalidate: &[&dyn QueryKey],
    apply: A,
  ) -> Result<R, SyncError>
  where
    A: FnOnce(&mut D, &R),
  {
    let outcome = outcome.map_err(|e| {
      warn!(query = %self.key.description(), error = %e, "mutation rejected");
      SyncError::MutationFailed(e)
    })?;

    if let Some(data) = self.query.data_mut() {
      apply(data, &outcome);
    }

    // A fetch still in flight read the store before this write
    self.generation.issue();
    let mut seen = HashSet::new();
    let own: &dyn QueryKey = &self.key;
    for key in std::iter::once(own).chain(also_invalidate.iter().copied()) {
      if seen.insert(key.cache_key()) {
        self.cache.invalidate(key);
      }
    }

    Ok(outcome)
  }

  /// Release every subscription and drop the load state.
  pub fn teardown(self) {
    drop(self);
  }
}

impl<D, K> Drop for ViewSync<D, K> {
  fn drop(&mut self) {
    if !self.subscriptions.is_empty() {
      debug!(count = self.subscriptions.len(), "view unmounted, releasing subscriptions");
    }
    self.subscriptions.clear();
  }
}

/// A Record Store write running on its own task.
///
/// Views handle keys synchronously, so they spawn the write and hand the
/// outcome to [`ViewSync::confirm`] once [`PendingMutation::poll`] yields it.
/// Dropping the handle discards the outcome; the write itself still completes.
pub struct PendingMutation<R> {
  receiver: oneshot::Receiver<Result<R, StoreError>>,
}

impl<R: Send + 'static> PendingMutation<R> {
  pub fn spawn<Fut>(mutation: Fut) -> Self
  where
    Fut: Future<Output = Result<R, StoreError>> + Send + 'static,
  {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
      let _ = tx.send(mutation.await);
    });
    Self { receiver: rx }
  }

  /// The outcome, once the write has finished.
  pub fn poll(&mut self) -> Option<Result<R, StoreError>> {
    match self.receiver.try_recv() {
      Ok(outcome) => Some(outcome),
      Err(oneshot::error::TryRecvError::Empty) => None,
      Err(oneshot::error::TryRecvError::Closed) => Some(Err(StoreError::new(
        "cancelled",
        "mutation task ended without a result",
      ))),
    }
  }

  /// Wait for the outcome.
  pub async fn outcome(self) -> Result<R, StoreError> {
    self
      .receiver
      .await
      .unwrap_or_else(|_| Err(StoreError::new("cancelled", "mutation task ended without a result")))
  }
}
