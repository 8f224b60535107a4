//! Seed data and simulated activity for `--demo`.

use serde_json::{json, Value};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::{Filter, MemoryStore, RecordStore, Row, Select};

use super::types::{PackKind, GROUPS_TABLE, PROFILES_TABLE};

pub const GROUP_CS: &str = "cs-2024";
pub const GROUP_DS: &str = "ds-2025";

fn row(value: Value) -> Row {
  match value {
    Value::Object(map) => map,
    _ => Row::new(),
  }
}

fn rows(values: Vec<Value>) -> Vec<Row> {
  values.into_iter().map(row).collect()
}

/// Fill `store` with two groups, their packs, profiles, and selections.
pub fn seed(store: &MemoryStore) {
  store.seed(
    GROUPS_TABLE,
    rows(vec![
      json!({"id": GROUP_CS, "name": "Computer Science 2024", "description": "BSc, third year"}),
      json!({"id": GROUP_DS, "name": "Data Science 2025", "description": "MSc, first year"}),
    ]),
  );

  store.seed(
    PackKind::Course.packs_table(),
    rows(vec![
      json!({"id": "cp-1", "group_id": GROUP_CS, "title": "Autumn electives", "status": "published", "deadline": "2026-11-15"}),
      json!({"id": "cp-2", "group_id": GROUP_CS, "title": "Spring electives", "status": "draft"}),
      json!({"id": "cp-3", "group_id": GROUP_DS, "title": "Methods electives", "status": "published", "deadline": "2026-12-01"}),
    ]),
  );

  store.seed(
    PackKind::Exchange.packs_table(),
    rows(vec![
      json!({"id": "ep-1", "group_id": GROUP_CS, "title": "Exchange semester 2027", "status": "published", "deadline": "2027-01-20"}),
      json!({"id": "ep-2", "group_id": GROUP_DS, "title": "Summer schools", "status": "closed"}),
    ]),
  );

  store.seed(
    PROFILES_TABLE,
    rows(vec![
      json!({"id": "u-admin", "email": "admin@uni.edu", "full_name": "Portal Admin", "role": "admin"}),
      json!({"id": "u-mgr", "email": "k.ivanova@uni.edu", "full_name": "Katya Ivanova", "role": "manager"}),
      json!({"id": "u-1", "email": "a.lee@uni.edu", "full_name": "Ada Lee", "role": "student", "group_id": GROUP_CS}),
      json!({"id": "u-2", "email": "b.okafor@uni.edu", "full_name": "Ben Okafor", "role": "student", "group_id": GROUP_CS}),
      json!({"id": "u-3", "email": "c.silva@uni.edu", "full_name": "Carla Silva", "role": "student", "group_id": GROUP_CS}),
      json!({"id": "u-4", "email": "d.chen@uni.edu", "full_name": "Dan Chen", "role": "student", "group_id": GROUP_DS}),
    ]),
  );

  store.seed(
    PackKind::Course.selections_table(),
    rows(vec![
      json!({"id": "cs-1", "pack_id": "cp-1", "student_id": "u-1", "student_name": "Ada Lee",
             "choices": ["Compilers", "Distributed Systems"], "status": "pending"}),
      json!({"id": "cs-2", "pack_id": "cp-1", "student_id": "u-2", "student_name": "Ben Okafor",
             "choices": ["Machine Learning", "Compilers"], "status": "approved"}),
      json!({"id": "cs-3", "pack_id": "cp-1", "student_id": "u-3", "student_name": "Carla Silva",
             "choices": ["Cryptography"], "status": "pending"}),
      json!({"id": "cs-4", "pack_id": "cp-3", "student_id": "u-4", "student_name": "Dan Chen",
             "choices": ["Bayesian Methods", "Causal Inference"], "status": "pending"}),
    ]),
  );

  store.seed(
    PackKind::Exchange.selections_table(),
    rows(vec![
      json!({"id": "es-1", "pack_id": "ep-1", "student_id": "u-1", "student_name": "Ada Lee",
             "choices": ["TU Delft", "KTH"], "status": "pending"}),
      json!({"id": "es-2", "pack_id": "ep-1", "student_id": "u-3", "student_name": "Carla Silva",
             "choices": ["ETH Zurich"], "status": "rejected"}),
    ]),
  );

  debug!("demo store seeded");
}

/// Simulate a second client: every `every`, a new student submits a
/// selection to the first published course pack of the CS group.
pub fn spawn_activity(store: MemoryStore, every: Duration) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately
    ticker.tick().await;
    let mut n = 0u32;

    loop {
      ticker.tick().await;
      n += 1;

      let table = PackKind::Course.selections_table();
      let existing = match store
        .query(Select::from(table).filter(Filter::all().eq("pack_id", "cp-1")))
        .await
      {
        Ok(rows) => rows.len(),
        Err(e) => {
          warn!(error = %e, "demo activity could not read selections");
          continue;
        }
      };

      let choice = pick(n);
      let submitted = store
        .insert(
          table,
          vec![row(json!({
            "pack_id": "cp-1",
            "student_id": format!("u-guest-{}", n),
            "student_name": format!("Guest Student {}", n),
            "choices": [choice],
            "status": "pending"
          }))],
        )
        .await;

      match submitted {
        Ok(_) => info!(existing, "demo activity submitted a selection"),
        Err(e) => warn!(error = %e, "demo activity insert failed"),
      }
    }
  })
}

const ELECTIVES: [&str; 5] = [
  "Compilers",
  "Computer Graphics",
  "Cryptography",
  "Distributed Systems",
  "Machine Learning",
];

/// Deterministic rotation through the elective catalogue.
fn pick(n: u32) -> &'static str {
  ELECTIVES[n as usize % ELECTIVES.len()]
}
