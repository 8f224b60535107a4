//! In-process Record Store.
//!
//! Used by the demo mode of the terminal client and by the test suite. Every
//! mutation notifies the subscribers whose filter matches the affected rows,
//! which makes it a stand-in for a second client writing to the same backend.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::subscription::{Subscription, SubscriptionId};
use super::{compare_values, ChangeEvent, ChangeKind, Filter, RecordStore, Row, Select};
use crate::error::StoreError;

struct Subscriber {
  id: SubscriptionId,
  table: String,
  filter: Filter,
  sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct Inner {
  tables: Mutex<HashMap<String, Vec<Row>>>,
  subscribers: Mutex<Vec<Subscriber>>,
  query_counts: Mutex<HashMap<String, usize>>,
  fail_next: Mutex<Option<StoreError>>,
  next_row_id: AtomicU64,
}

/// Record Store kept entirely in memory. Cloning shares the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Load rows into `table` without notifying subscribers.
  pub fn seed(&self, table: &str, rows: Vec<Row>) {
    lock(&self.inner.tables)
      .entry(table.to_string())
      .or_default()
      .extend(rows);
  }

  /// Make the next store call fail with `error`.
  pub fn fail_next(&self, error: StoreError) {
    *lock(&self.inner.fail_next) = Some(error);
  }

  /// Number of queries issued against `table` so far.
  pub fn query_count(&self, table: &str) -> usize {
    lock(&self.inner.query_counts)
      .get(table)
      .copied()
      .unwrap_or(0)
  }

  /// Number of subscriptions not yet released.
  pub fn active_subscriptions(&self) -> usize {
    lock(&self.inner.subscribers).len()
  }

  fn take_failure(&self) -> Result<(), StoreError> {
    match lock(&self.inner.fail_next).take() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  fn notify(&self, table: &str, kind: ChangeKind, rows: &[Row]) {
    let mut subscribers = lock(&self.inner.subscribers);
    subscribers.retain(|sub| {
      if sub.table != table || !rows.iter().any(|row| sub.filter.matches(row)) {
        return true;
      }
      trace!(subscription = %sub.id, table, ?kind, "delivering change");
      sub
        .sender
        .send(ChangeEvent {
          table: table.to_string(),
          kind,
        })
        .is_ok()
    });
  }

  fn run_query(&self, select: &Select) -> Vec<Row> {
    *lock(&self.inner.query_counts)
      .entry(select.table.clone())
      .or_insert(0) += 1;

    let tables = lock(&self.inner.tables);
    let mut rows: Vec<Row> = tables
      .get(&select.table)
      .map(|rows| {
        rows
          .iter()
          .filter(|row| select.filter.matches(row))
          .cloned()
          .collect()
      })
      .unwrap_or_default();

    if let Some(order) = &select.order {
      rows.sort_by(|a, b| {
        let ord = compare_values(
          a.get(&order.column).unwrap_or(&Value::Null),
          b.get(&order.column).unwrap_or(&Value::Null),
        );
        if order.ascending {
          ord
        } else {
          ord.reverse()
        }
      });
    }

    if let Some(columns) = &select.columns {
      for row in &mut rows {
        row.retain(|column, _| columns.contains(column));
      }
    }

    rows
  }

  fn run_insert(&self, table: &str, rows: Vec<Row>) -> Vec<Row> {
    let inserted: Vec<Row> = rows
      .into_iter()
      .map(|mut row| {
        if !row.contains_key("id") {
          let id = self.inner.next_row_id.fetch_add(1, Ordering::Relaxed) + 1;
          row.insert("id".into(), Value::String(format!("{}-{}", table, id)));
        }
        row
      })
      .collect();

    lock(&self.inner.tables)
      .entry(table.to_string())
      .or_default()
      .extend(inserted.iter().cloned());
    inserted
  }

  fn run_update(&self, table: &str, filter: &Filter, patch: &Row) -> (Vec<Row>, Vec<Row>) {
    let mut before = Vec::new();
    let mut after = Vec::new();
    let mut tables = lock(&self.inner.tables);
    if let Some(rows) = tables.get_mut(table) {
      for row in rows.iter_mut().filter(|row| filter.matches(row)) {
        before.push(row.clone());
        for (column, value) in patch {
          row.insert(column.clone(), value.clone());
        }
        after.push(row.clone());
      }
    }
    (before, after)
  }

  fn run_delete(&self, table: &str, filter: &Filter) -> Vec<Row> {
    let mut tables = lock(&self.inner.tables);
    let Some(rows) = tables.get_mut(table) else {
      return Vec::new();
    };
    let (deleted, kept): (Vec<Row>, Vec<Row>) =
      rows.drain(..).partition(|row| filter.matches(row));
    *rows = kept;
    deleted
  }
}

impl RecordStore for MemoryStore {
  fn query(&self, select: Select) -> BoxFuture<'_, Result<Vec<Row>, StoreError>> {
    async move { self.take_failure().map(|()| self.run_query(&select)) }.boxed()
  }

  fn insert(&self, table: &str, rows: Vec<Row>) -> BoxFuture<'_, Result<Vec<Row>, StoreError>> {
    let table = table.to_string();
    async move {
      if let Err(e) = self.take_failure() {
        return Err(e);
      }
      let inserted = self.run_insert(&table, rows);
      debug!(table = %table, count = inserted.len(), "inserted rows");
      self.notify(&table, ChangeKind::Insert, &inserted);
      Ok(inserted)
    }
    .boxed()
  }

  fn update(
    &self,
    table: &str,
    filter: Filter,
    patch: Row,
  ) -> BoxFuture<'_, Result<Vec<Row>, StoreError>> {
    let table = table.to_string();
    async move {
      if let Err(e) = self.take_failure() {
        return Err(e);
      }
      let (before, after) = self.run_update(&table, &filter, &patch);
      debug!(table = %table, count = after.len(), "updated rows");
      // Subscribers see the change if the row matched before or after
      let touched: Vec<Row> = before.into_iter().chain(after.iter().cloned()).collect();
      if !after.is_empty() {
        self.notify(&table, ChangeKind::Update, &touched);
      }
      Ok(after)
    }
    .boxed()
  }

  fn delete(&self, table: &str, filter: Filter) -> BoxFuture<'_, Result<Vec<Row>, StoreError>> {
    let table = table.to_string();
    async move {
      if let Err(e) = self.take_failure() {
        return Err(e);
      }
      let deleted = self.run_delete(&table, &filter);
      debug!(table = %table, count = deleted.len(), "deleted rows");
      if !deleted.is_empty() {
        self.notify(&table, ChangeKind::Delete, &deleted);
      }
      Ok(deleted)
    }
    .boxed()
  }

  fn subscribe(&self, table: &str, filter: Filter) -> Result<Subscription, StoreError> {
    let id = SubscriptionId::next();
    let (sender, receiver) = mpsc::unbounded_channel();
    lock(&self.inner.subscribers).push(Subscriber {
      id,
      table: table.to_string(),
      filter,
      sender,
    });
    debug!(subscription = %id, table, "subscribed");

    let registry: Weak<Inner> = Arc::downgrade(&self.inner);
    Ok(Subscription::new(id, table, receiver, move || {
      if let Some(inner) = registry.upgrade() {
        lock(&inner.subscribers).retain(|sub| sub.id != id);
      }
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn row(value: Value) -> Row {
    match value {
      Value::Object(map) => map,
      _ => panic!("not an object"),
    }
  }

  fn seeded() -> MemoryStore {
    let store = MemoryStore::new();
    store.seed(
      "course_selections",
      vec![
        row(json!({"id": "s1", "pack_id": "p1", "status": "pending", "student_id": "u2"})),
        row(json!({"id": "s2", "pack_id": "p1", "status": "approved", "student_id": "u1"})),
        row(json!({"id": "s3", "pack_id": "p2", "status": "pending", "student_id": "u3"})),
      ],
    );
    store
  }

  #[tokio::test]
  async fn test_query_filters_orders_and_projects() {
    let store = seeded();
    let rows = store
      .query(
        Select::from("course_selections")
          .filter(Filter::all().eq("pack_id", "p1"))
          .columns(&["id", "student_id"])
          .order_by("student_id", true),
      )
      .await
      .unwrap();

    let ids: Vec<_> = rows.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, vec![json!("s2"), json!("s1")]);
    assert!(rows.iter().all(|r| !r.contains_key("status")));
    assert_eq!(store.query_count("course_selections"), 1);
  }

  #[tokio::test]
  async fn test_update_notifies_matching_subscribers_only() {
    let store = seeded();
    let mut p1 = store
      .subscribe("course_selections", Filter::all().eq("pack_id", "p1"))
      .unwrap();
    let mut p2 = store
      .subscribe("course_selections", Filter::all().eq("pack_id", "p2"))
      .unwrap();

    let mut patch = Row::new();
    patch.insert("status".into(), json!("approved"));
    let updated = store
      .update("course_selections", Filter::all().eq("id", "s1"), patch)
      .await
      .unwrap();

    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0]["status"], json!("approved"));
    assert_eq!(p1.try_recv().map(|e| e.kind), Some(ChangeKind::Update));
    assert_eq!(p2.try_recv(), None);
  }

  #[tokio::test]
  async fn test_insert_assigns_ids_and_notifies() {
    let store = MemoryStore::new();
    let mut sub = store.subscribe("groups", Filter::all()).unwrap();

    let inserted = store
      .insert("groups", vec![row(json!({"name": "CS 2024"}))])
      .await
      .unwrap();

    assert!(inserted[0]["id"].as_str().unwrap().starts_with("groups-"));
    assert_eq!(sub.try_recv().map(|e| e.kind), Some(ChangeKind::Insert));
  }

  #[tokio::test]
  async fn test_delete_removes_rows() {
    let store = seeded();
    let deleted = store
      .delete("course_selections", Filter::all().eq("pack_id", "p1"))
      .await
      .unwrap();
    assert_eq!(deleted.len(), 2);

    let rest = store
      .query(Select::from("course_selections"))
      .await
      .unwrap();
    assert_eq!(rest.len(), 1);
  }

  #[tokio::test]
  async fn test_fail_next_is_one_shot() {
    let store = seeded();
    store.fail_next(StoreError::new("42501", "permission denied"));

    let err = store
      .query(Select::from("course_selections"))
      .await
      .unwrap_err();
    assert_eq!(err.code, "42501");
    assert!(store.query(Select::from("course_selections")).await.is_ok());
  }

  #[test]
  fn test_dropping_subscription_releases_it() {
    let store = MemoryStore::new();
    let sub = store.subscribe("groups", Filter::all()).unwrap();
    let other = store.subscribe("profiles", Filter::all()).unwrap();
    assert_eq!(store.active_subscriptions(), 2);

    drop(sub);
    assert_eq!(store.active_subscriptions(), 1);
    other.unsubscribe();
    assert_eq!(store.active_subscriptions(), 0);
  }
}
