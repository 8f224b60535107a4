//! Record Store contract: the hosted database the portal reads from and writes to.
//!
//! The cache layer only needs four things from a store: filtered queries,
//! mutations, change subscriptions and `{code, message}` errors. Rows are
//! passed around as untyped JSON objects and decoded by the consumer.

mod memory;
mod rest;
mod subscription;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use rest::{ChangeFeed, RestStore};
pub use subscription::{Subscription, SubscriptionId};

/// One record as returned by the store.
pub type Row = Map<String, Value>;

/// Conjunction of column equality conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
  conditions: Vec<(String, Value)>,
}

impl Filter {
  /// Filter matching every row.
  pub fn all() -> Self {
    Self::default()
  }

  /// Add a `column = value` condition.
  pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
    self.conditions.push((column.into(), value.into()));
    self
  }

  pub fn conditions(&self) -> &[(String, Value)] {
    &self.conditions
  }

  pub fn is_empty(&self) -> bool {
    self.conditions.is_empty()
  }

  /// Whether `row` satisfies every condition.
  pub fn matches(&self, row: &Row) -> bool {
    self
      .conditions
      .iter()
      .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
  }
}

/// Sort order for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
  pub column: String,
  pub ascending: bool,
}

/// A read query against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
  pub table: String,
  pub filter: Filter,
  /// Columns to return; `None` selects all
  pub columns: Option<Vec<String>>,
  pub order: Option<Order>,
}

impl Select {
  pub fn from(table: impl Into<String>) -> Self {
    Self {
      table: table.into(),
      filter: Filter::all(),
      columns: None,
      order: None,
    }
  }

  pub fn filter(mut self, filter: Filter) -> Self {
    self.filter = filter;
    self
  }

  pub fn columns(mut self, columns: &[&str]) -> Self {
    self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
    self
  }

  pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
    self.order = Some(Order {
      column: column.into(),
      ascending,
    });
    self
  }
}

/// Kind of row change reported by a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
  Insert,
  Update,
  Delete,
}

/// A change notification. It names the table and the kind of change only;
/// the new row content is not guaranteed to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
  pub table: String,
  pub kind: ChangeKind,
}

/// Queryable, mutable collection of records with row-level change notifications.
pub trait RecordStore: Send + Sync {
  /// Run a filtered read.
  fn query(&self, select: Select) -> BoxFuture<'_, Result<Vec<Row>, StoreError>>;

  /// Insert rows, returning them as stored.
  fn insert(&self, table: &str, rows: Vec<Row>) -> BoxFuture<'_, Result<Vec<Row>, StoreError>>;

  /// Merge `patch` into every row matching `filter`, returning the updated rows.
  fn update(
    &self,
    table: &str,
    filter: Filter,
    patch: Row,
  ) -> BoxFuture<'_, Result<Vec<Row>, StoreError>>;

  /// Delete every row matching `filter`, returning the deleted rows.
  fn delete(&self, table: &str, filter: Filter) -> BoxFuture<'_, Result<Vec<Row>, StoreError>>;

  /// Open a change subscription on `table` restricted to rows matching `filter`.
  ///
  /// The subscription stays live until the returned handle is released.
  fn subscribe(&self, table: &str, filter: Filter) -> Result<Subscription, StoreError>;
}

/// Decode store rows into typed records.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, StoreError> {
  rows
    .into_iter()
    .map(|row| serde_json::from_value(Value::Object(row)).map_err(StoreError::decode))
    .collect()
}

/// Encode a record as a store row.
pub fn encode_row<T: serde::Serialize>(record: &T) -> Result<Row, StoreError> {
  match serde_json::to_value(record).map_err(StoreError::decode)? {
    Value::Object(row) => Ok(row),
    other => Err(StoreError::decode(format!(
      "expected a JSON object, got {}",
      other
    ))),
  }
}

/// Ordering used for `order by` on JSON values: nulls first, then numbers,
/// then strings, then everything else as equal.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
  match (a, b) {
    (Value::Null, Value::Null) => Ordering::Equal,
    (Value::Null, _) => Ordering::Less,
    (_, Value::Null) => Ordering::Greater,
    (Value::Number(x), Value::Number(y)) => x
      .as_f64()
      .partial_cmp(&y.as_f64())
      .unwrap_or(Ordering::Equal),
    (Value::String(x), Value::String(y)) => x.cmp(y),
    (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
    _ => Ordering::Equal,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;
  use serde_json::json;

  fn row(value: Value) -> Row {
    match value {
      Value::Object(map) => map,
      _ => panic!("not an object"),
    }
  }

  #[test]
  fn test_filter_matches_all_conditions() {
    let filter = Filter::all().eq("group_id", "g1").eq("status", "pending");
    assert!(filter.matches(&row(json!({"group_id": "g1", "status": "pending", "id": 1}))));
    assert!(!filter.matches(&row(json!({"group_id": "g1", "status": "approved"}))));
    assert!(!filter.matches(&row(json!({"status": "pending"}))));
  }

  #[test]
  fn test_empty_filter_matches_everything() {
    assert!(Filter::all().matches(&row(json!({"id": 1}))));
  }

  #[test]
  fn test_decode_rows_reports_bad_rows() {
    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Named {
      name: String,
    }

    let ok: Vec<Named> = decode_rows(vec![row(json!({"name": "a"}))]).unwrap();
    assert_eq!(ok.len(), 1);

    let err = decode_rows::<Named>(vec![row(json!({"name": 5}))]).unwrap_err();
    assert_eq!(err.code, "decode");
  }

  #[test]
  fn test_compare_values_orders_nulls_first() {
    assert_eq!(compare_values(&Value::Null, &json!(1)), Ordering::Less);
    assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
    assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
  }
}
