//! Async query abstraction for view load state.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type that
//! encapsulates async data fetching, loading states, and error handling.
//!
//! # Example
//!
//! ```ignore
//! let portal = portal_client.clone();
//! let mut query = Query::new(move || {
//!     let portal = portal.clone();
//!     async move { portal.groups().await }
//! });
//!
//! // Start fetching
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Ready(data) => render_data(data),
//!     QueryState::Error(e) => render_error(e),
//!     QueryState::Idle => {}
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;

use crate::error::{StoreError, SyncError};

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is currently fetching data
  Loading,
  /// Query failed; the view shows a retry affordance
  Error(SyncError),
  /// Query completed successfully
  Ready(T),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_ready(&self) -> bool {
    matches!(self, QueryState::Ready(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Ready(data) => Some(data),
      _ => None,
    }
  }

  pub fn data_mut(&mut self) -> Option<&mut T> {
    match self {
      QueryState::Ready(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&SyncError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// A boxed future that returns a Result<T, SyncError>
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, SyncError>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Box<dyn Fn() -> BoxFuture<T> + Send + Sync>;

/// Async query for data fetching with state management.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure)
/// - Loading/ready/error states
/// - Async result handling via channels
///
/// The fetch runs on a spawned task. Dropping the query (or calling
/// `refetch`) drops the receiving end, so a result that arrives after its
/// owner went away is discarded instead of being applied.
pub struct Query<T> {
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, SyncError>>>,
}

impl<T: Send + 'static> Query<T> {
  /// Create a new query with the given fetcher function.
  ///
  /// The fetcher is a closure that returns a future. It will be called
  /// each time `fetch()` or `refetch()` is invoked.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      fetcher: Box::new(move || Box::pin(fetcher())),
      receiver: None,
    }
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Get the data if the query succeeded.
  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  /// Mutable access to loaded data, for applying confirmed local changes.
  pub fn data_mut(&mut self) -> Option<&mut T> {
    self.state.data_mut()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_ready(&self) -> bool {
    self.state.is_ready()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&SyncError> {
    self.state.error()
  }

  /// Whether a fetch result is still outstanding.
  pub fn is_pending(&self) -> bool {
    self.receiver.is_some()
  }

  /// Start fetching data if not already loading.
  ///
  /// This is a no-op if the query is already loading.
  pub fn fetch(&mut self) {
    if self.state.is_loading() {
      return;
    }
    self.start_fetch(true);
  }

  /// Force a refetch, even if already loading or data exists.
  pub fn refetch(&mut self) {
    // Cancel any pending fetch by dropping the receiver
    self.receiver = None;
    self.start_fetch(true);
  }

  /// Refetch without leaving the ready state, so the current data stays
  /// visible until the fresh result replaces it.
  pub fn refetch_in_background(&mut self) {
    self.receiver = None;
    let show_loading = !self.state.is_ready();
    self.start_fetch(show_loading);
  }

  /// Poll for results from a pending fetch.
  ///
  /// Returns `true` if the state changed (data arrived or error occurred).
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(result) => {
        self.apply(result);
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.apply_cancelled();
        true
      }
    }
  }

  /// Wait for the pending fetch, if any, and apply its result.
  ///
  /// Returns `true` if the state changed.
  pub async fn settle(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    let received = receiver.recv().await;
    match received {
      Some(result) => self.apply(result),
      None => self.apply_cancelled(),
    }
    true
  }

  fn apply(&mut self, result: Result<T, SyncError>) {
    self.state = match result {
      Ok(data) => QueryState::Ready(data),
      Err(error) => QueryState::Error(error),
    };
    self.receiver = None;
  }

  fn apply_cancelled(&mut self) {
    // Sender dropped without sending - the fetch task panicked or was aborted
    self.state = QueryState::Error(SyncError::FetchFailed(StoreError::new(
      "cancelled",
      "query was cancelled",
    )));
    self.receiver = None;
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self, show_loading: bool) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    if show_loading {
      self.state = QueryState::Loading;
    }

    let future = (self.fetcher)();
    tokio::spawn(async move {
      let result = future.await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

// Query is not Clone because the fetcher is boxed and receiver is owned.

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("state", &self.state)
      .field("pending", &self.receiver.is_some())
      .finish_non_exhaustive()
  }
}
