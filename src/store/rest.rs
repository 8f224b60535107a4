//! PostgREST-backed Record Store (the REST surface of a hosted Supabase project).
//!
//! Change subscriptions are served by a polling change feed: the filtered query
//! is re-run at a fixed interval and per-row fingerprints are diffed against the
//! previous poll. This keeps the client on plain HTTPS.

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{header, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use super::subscription::{Subscription, SubscriptionId};
use super::{ChangeEvent, ChangeKind, Filter, RecordStore, Row, Select};
use crate::config::StoreConfig;
use crate::error::StoreError;

/// Record Store client speaking the PostgREST dialect.
#[derive(Clone)]
pub struct RestStore {
  http: reqwest::Client,
  /// `<project-url>/rest/v1/`
  base: Url,
  api_key: String,
  schema: Option<String>,
  poll_interval: Duration,
}

/// Error body returned by PostgREST.
#[derive(Debug, Deserialize)]
struct ApiError {
  code: Option<String>,
  message: Option<String>,
  details: Option<String>,
}

impl RestStore {
  pub fn new(config: &StoreConfig, api_key: String) -> Result<Self, StoreError> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = config.timeout_secs {
      builder = builder.timeout(Duration::from_secs(secs));
    }
    let http = builder.build().map_err(StoreError::transport)?;

    Ok(Self {
      http,
      base: rest_base(&config.url)?,
      api_key,
      schema: config.schema.clone(),
      poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
    })
  }

  /// Endpoint URL for `table` with filter, projection and ordering encoded.
  fn table_url(&self, table: &str, filter: &Filter) -> Result<Url, StoreError> {
    let mut url = self
      .base
      .join(table)
      .map_err(|e| StoreError::new("invalid_url", e.to_string()))?;
    {
      let mut pairs = url.query_pairs_mut();
      for (column, value) in encode_filter(filter) {
        pairs.append_pair(&column, &value);
      }
    }
    Ok(url)
  }

  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let mut request = self
      .http
      .request(method.clone(), url)
      .header("apikey", &self.api_key)
      .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key));

    if let Some(schema) = &self.schema {
      let profile = if method == Method::GET {
        "Accept-Profile"
      } else {
        "Content-Profile"
      };
      request = request.header(profile, schema);
    }
    if method != Method::GET {
      request = request.header("Prefer", "return=representation");
    }
    request
  }

  async fn send(&self, request: RequestBuilder) -> Result<Vec<Row>, StoreError> {
    let response = request.send().await.map_err(StoreError::transport)?;
    let status = response.status();
    let body = response.text().await.map_err(StoreError::transport)?;

    if !status.is_success() {
      return Err(api_error(status, &body));
    }
    if body.trim().is_empty() {
      return Ok(Vec::new());
    }
    serde_json::from_str(&body).map_err(StoreError::decode)
  }
}

impl RecordStore for RestStore {
  fn query(&self, select: Select) -> BoxFuture<'_, Result<Vec<Row>, StoreError>> {
    async move {
      let mut url = self.table_url(&select.table, &select.filter)?;
      {
        let mut pairs = url.query_pairs_mut();
        let columns = select
          .columns
          .as_ref()
          .map(|c| c.join(","))
          .unwrap_or_else(|| "*".to_string());
        pairs.append_pair("select", &columns);
        if let Some(order) = &select.order {
          let direction = if order.ascending { "asc" } else { "desc" };
          pairs.append_pair("order", &format!("{}.{}", order.column, direction));
        }
      }
      debug!(table = %select.table, %url, "querying");
      self.send(self.request(Method::GET, url)).await
    }
    .boxed()
  }

  fn insert(&self, table: &str, rows: Vec<Row>) -> BoxFuture<'_, Result<Vec<Row>, StoreError>> {
    let table = table.to_string();
    async move {
      let url = self.table_url(&table, &Filter::all())?;
      self.send(self.request(Method::POST, url).json(&rows)).await
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
      let url = self.table_url(&table, &filter)?;
      self.send(self.request(Method::PATCH, url).json(&patch)).await
    }
    .boxed()
  }

  fn delete(&self, table: &str, filter: Filter) -> BoxFuture<'_, Result<Vec<Row>, StoreError>> {
    let table = table.to_string();
    async move {
      if filter.is_empty() {
        return Err(StoreError::new(
          "unfiltered_delete",
          format!("refusing to delete every row of {}", table),
        ));
      }
      let url = self.table_url(&table, &filter)?;
      self.send(self.request(Method::DELETE, url)).await
    }
    .boxed()
  }

  fn subscribe(&self, table: &str, filter: Filter) -> Result<Subscription, StoreError> {
    let runtime = tokio::runtime::Handle::try_current()
      .map_err(|e| StoreError::new("no_runtime", e.to_string()))?;
    let id = SubscriptionId::next();
    let (sender, receiver) = mpsc::unbounded_channel();
    let store = self.clone();
    let select = Select::from(table).filter(filter);
    let interval = self.poll_interval;

    let task = runtime.spawn(async move {
      let mut feed = ChangeFeed::default();
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        match store.query(select.clone()).await {
          Ok(rows) => {
            for event in feed.diff(&select.table, &rows) {
              if sender.send(event).is_err() {
                return;
              }
            }
          }
          Err(e) => warn!(subscription = %id, table = %select.table, error = %e, "change feed poll failed"),
        }
      }
    });

    debug!(subscription = %id, table, "polling change feed started");
    Ok(Subscription::new(id, table, receiver, move || task.abort()))
  }
}

/// Normalise a project URL into the PostgREST base (`.../rest/v1/`).
fn rest_base(project_url: &str) -> Result<Url, StoreError> {
  let mut url =
    Url::parse(project_url).map_err(|e| StoreError::new("invalid_url", e.to_string()))?;
  let path = url.path().trim_end_matches('/').to_string();
  let path = if path.ends_with("/rest/v1") {
    format!("{}/", path)
  } else {
    format!("{}/rest/v1/", path)
  };
  url.set_path(&path);
  Ok(url)
}

/// Encode equality conditions as PostgREST query parameters.
fn encode_filter(filter: &Filter) -> Vec<(String, String)> {
  filter
    .conditions()
    .iter()
    .map(|(column, value)| {
      let encoded = match value {
        Value::Null => "is.null".to_string(),
        Value::String(s) => format!("eq.{}", s),
        other => format!("eq.{}", other),
      };
      (column.clone(), encoded)
    })
    .collect()
}

fn api_error(status: StatusCode, body: &str) -> StoreError {
  match serde_json::from_str::<ApiError>(body) {
    Ok(err) => StoreError::new(
      err.code.unwrap_or_else(|| status.as_u16().to_string()),
      match (err.message, err.details) {
        (Some(m), Some(d)) => format!("{} ({})", m, d),
        (Some(m), None) => m,
        (None, Some(d)) => d,
        (None, None) => status.to_string(),
      },
    ),
    Err(_) => StoreError::new(status.as_u16().to_string(), body.trim().to_string()),
  }
}

/// Poll-to-poll row diff used to synthesise change notifications.
#[derive(Debug, Default)]
pub struct ChangeFeed {
  /// Row identity -> content fingerprint from the previous poll
  previous: Option<HashMap<String, String>>,
}

impl ChangeFeed {
  /// Compare `rows` with the previous poll. The first call only records a baseline.
  pub fn diff(&mut self, table: &str, rows: &[Row]) -> Vec<ChangeEvent> {
    let current: HashMap<String, String> = rows
      .iter()
      .map(|row| {
        let fingerprint = fingerprint(row);
        let identity = match row.get("id") {
          Some(Value::String(id)) => id.clone(),
          Some(id) if !id.is_null() => id.to_string(),
          _ => fingerprint.clone(),
        };
        (identity, fingerprint)
      })
      .collect();

    let Some(previous) = self.previous.replace(current) else {
      return Vec::new();
    };
    let Some(current) = self.previous.as_ref() else {
      return Vec::new();
    };

    let event = |kind| ChangeEvent {
      table: table.to_string(),
      kind,
    };
    let mut events = Vec::new();
    for (identity, print) in current {
      match previous.get(identity) {
        None => events.push(event(ChangeKind::Insert)),
        Some(old) if old != print => events.push(event(ChangeKind::Update)),
        Some(_) => {}
      }
    }
    for identity in previous.keys() {
      if !current.contains_key(identity) {
        events.push(event(ChangeKind::Delete));
      }
    }
    events
  }
}

/// SHA-256 of the row's canonical JSON encoding.
fn fingerprint(row: &Row) -> String {
  let bytes = serde_json::to_vec(row).unwrap_or_default();
  hex::encode(Sha256::digest(&bytes))
}
