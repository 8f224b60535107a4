//! Scoped change-subscription handle.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use super::ChangeEvent;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
  pub(crate) fn next() -> Self {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    Self(COUNTER.fetch_add(1, Ordering::Relaxed))
  }

  #[inline]
  pub fn as_u64(&self) -> u64 {
    self.0
  }
}

impl std::fmt::Display for SubscriptionId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "sub-{}", self.0)
  }
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// One live change channel bound to a table and filter.
///
/// The channel is released exactly once, either by [`Subscription::unsubscribe`]
/// or when the handle is dropped, so every exit path of the owner tears it down.
pub struct Subscription {
  id: SubscriptionId,
  table: String,
  receiver: mpsc::UnboundedReceiver<ChangeEvent>,
  release: Option<ReleaseFn>,
}

impl Subscription {
  /// Wrap a receiver and the store-specific release hook.
  pub fn new(
    id: SubscriptionId,
    table: impl Into<String>,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    release: impl FnOnce() + Send + 'static,
  ) -> Self {
    Self {
      id,
      table: table.into(),
      receiver,
      release: Some(Box::new(release)),
    }
  }

  pub fn id(&self) -> SubscriptionId {
    self.id
  }

  pub fn table(&self) -> &str {
    &self.table
  }

  /// Next pending notification, without waiting.
  pub fn try_recv(&mut self) -> Option<ChangeEvent> {
    self.receiver.try_recv().ok()
  }

  /// Wait for the next notification. `None` once the store side has closed.
  pub async fn recv(&mut self) -> Option<ChangeEvent> {
    self.receiver.recv().await
  }

  /// Release the channel now.
  pub fn unsubscribe(mut self) {
    self.release_now();
  }

  fn release_now(&mut self) {
    if let Some(release) = self.release.take() {
      debug!(subscription = %self.id, table = %self.table, "releasing subscription");
      self.receiver.close();
      release();
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.release_now();
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("id", &self.id)
      .field("table", &self.table)
      .field("released", &self.release.is_none())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::ChangeKind;
  use std::sync::atomic::AtomicUsize;
  use std::sync::Arc;

  #[test]
  fn test_release_runs_once_on_drop() {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    let (_tx, rx) = mpsc::unbounded_channel();

    let sub = Subscription::new(SubscriptionId::next(), "groups", rx, move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    drop(sub);

    assert_eq!(released.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_unsubscribe_does_not_release_twice() {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    let (_tx, rx) = mpsc::unbounded_channel();

    let sub = Subscription::new(SubscriptionId::next(), "groups", rx, move || {
      counter.fetch_add(1, Ordering::SeqCst);
    });
    sub.unsubscribe();

    assert_eq!(released.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_try_recv_delivers_pending_events() {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut sub = Subscription::new(SubscriptionId::next(), "groups", rx, || {});

    assert_eq!(sub.try_recv(), None);
    tx.send(ChangeEvent {
      table: "groups".into(),
      kind: ChangeKind::Insert,
    })
    .unwrap();
    assert_eq!(sub.try_recv().map(|e| e.kind), Some(ChangeKind::Insert));
  }

  #[test]
  fn test_ids_are_unique() {
    assert_ne!(SubscriptionId::next(), SubscriptionId::next());
  }
}
