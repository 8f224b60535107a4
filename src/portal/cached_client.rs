//! Cached portal client: typed reads through the cache layer, typed writes
//! straight to the Record Store.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::cache::{CacheLayer, CacheMedium, MemoryMedium, NoopMedium, SharedCache, SqliteMedium};
use crate::config::{CacheBackend, CacheConfig};
use crate::error::{StoreError, SyncError};
use crate::store::{decode_rows, Filter, RecordStore, Row, Select};
use crate::sync::{ViewSync, Watch};

use super::keys::PortalKey;
use super::types::{
  Group, Pack, PackKind, PackStatus, Selection, SelectionStatus, User, GROUPS_TABLE,
  PROFILES_TABLE,
};

/// Portal client with transparent caching.
///
/// Reads go through [`CacheLayer::load`] under a [`PortalKey`]. Writes are
/// never cached; views pair them with [`ViewSync::confirm`] so the loaded
/// list is patched and the right keys are invalidated.
#[derive(Clone)]
pub struct CachedPortalClient {
  store: Arc<dyn RecordStore>,
  cache: SharedCache,
  ttl: Duration,
}

impl CachedPortalClient {
  pub fn new(store: Arc<dyn RecordStore>, cache: SharedCache) -> Self {
    let ttl = cache.ttl();
    Self { store, cache, ttl }
  }

  /// Build a client whose cache medium and TTL come from `config`.
  pub fn with_cache_config(store: Arc<dyn RecordStore>, config: &CacheConfig) -> Result<Self> {
    let medium = open_medium(config)?;
    let cache = CacheLayer::from_shared(medium).with_ttl(config.ttl());
    Ok(Self::new(store, cache))
  }

  pub fn cache(&self) -> &SharedCache {
    &self.cache
  }

  pub fn store(&self) -> &dyn RecordStore {
    self.store.as_ref()
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// Make the next load of every key governed by `flag` skip the cache.
  pub fn request_refresh(&self, flag: &str) {
    self.cache.request_refresh(flag);
  }

  // ==========================================================================
  // Cached reads
  // ==========================================================================

  pub async fn groups(&self) -> Result<Vec<Group>, SyncError> {
    self
      .cache
      .load(&PortalKey::Groups, self.ttl, || self.fetch_groups())
      .await
  }

  pub async fn packs(&self, group_id: &str, kind: PackKind) -> Result<Vec<Pack>, SyncError> {
    let key = PortalKey::packs(group_id, kind);
    self
      .cache
      .load(&key, self.ttl, || self.fetch_packs(group_id, kind))
      .await
  }

  pub async fn pack(&self, group_id: &str, pack_id: &str, kind: PackKind) -> Result<Pack, SyncError> {
    let key = PortalKey::pack_detail(group_id, pack_id, kind);
    self
      .cache
      .load(&key, self.ttl, || self.fetch_pack(group_id, pack_id, kind))
      .await
  }

  pub async fn selections(
    &self,
    group_id: &str,
    pack_id: &str,
    kind: PackKind,
  ) -> Result<Vec<Selection>, SyncError> {
    let key = PortalKey::selections(group_id, pack_id, kind);
    self
      .cache
      .load(&key, self.ttl, || self.fetch_selections(group_id, pack_id, kind))
      .await
  }

  pub async fn users(&self, group_id: Option<&str>) -> Result<Vec<User>, SyncError> {
    let key = PortalKey::users(group_id);
    self
      .cache
      .load(&key, self.ttl, || self.fetch_users(group_id))
      .await
  }

  // ==========================================================================
  // Uncached fetches
  // ==========================================================================

  pub async fn fetch_groups(&self) -> Result<Vec<Group>, StoreError> {
    let rows = self
      .store
      .query(Select::from(GROUPS_TABLE).order_by("name", true))
      .await?;
    decode_rows(rows)
  }

  pub async fn fetch_packs(&self, group_id: &str, kind: PackKind) -> Result<Vec<Pack>, StoreError> {
    let rows = self
      .store
      .query(
        Select::from(kind.packs_table())
          .filter(Filter::all().eq("group_id", group_id))
          .order_by("title", true),
      )
      .await?;
    decode_rows(tag_kind(rows, kind))
  }

  pub async fn fetch_pack(
    &self,
    group_id: &str,
    pack_id: &str,
    kind: PackKind,
  ) -> Result<Pack, StoreError> {
    let rows = self
      .store
      .query(
        Select::from(kind.packs_table())
          .filter(Filter::all().eq("id", pack_id).eq("group_id", group_id)),
      )
      .await?;
    first(decode_rows(tag_kind(rows, kind))?, || {
      format!("{} pack {} not found in group {}", kind.as_str(), pack_id, group_id)
    })
  }

  /// Selections of one pack. Selection rows carry no group column, so the
  /// pack is looked up in `group_id` first; a pack from another group is
  /// reported as not found.
  pub async fn fetch_selections(
    &self,
    group_id: &str,
    pack_id: &str,
    kind: PackKind,
  ) -> Result<Vec<Selection>, StoreError> {
    self.fetch_pack(group_id, pack_id, kind).await?;
    let rows = self
      .store
      .query(
        Select::from(kind.selections_table())
          .filter(Filter::all().eq("pack_id", pack_id))
          .order_by("student_id", true),
      )
      .await?;
    decode_rows(rows)
  }

  pub async fn fetch_users(&self, group_id: Option<&str>) -> Result<Vec<User>, StoreError> {
    let filter = match group_id {
      Some(g) => Filter::all().eq("group_id", g),
      None => Filter::all(),
    };
    let rows = self
      .store
      .query(
        Select::from(PROFILES_TABLE)
          .filter(filter)
          .order_by("email", true),
      )
      .await?;
    decode_rows(rows)
  }

  // ==========================================================================
  // Writes (not cached)
  // ==========================================================================

  /// Approve or reject a selection. Returns the updated record.
  pub async fn set_selection_status(
    &self,
    kind: PackKind,
    selection_id: &str,
    status: SelectionStatus,
  ) -> Result<Selection, StoreError> {
    let mut patch = Row::new();
    patch.insert("status".into(), json!(status.as_str()));
    patch.insert("updated_at".into(), json!(Utc::now().to_rfc3339()));

    let rows = self
      .store
      .update(
        kind.selections_table(),
        Filter::all().eq("id", selection_id),
        patch,
      )
      .await?;
    first(decode_rows(rows)?, || format!("selection {} not found", selection_id))
  }

  /// Move a draft pack to published. Returns the updated record.
  pub async fn publish_pack(&self, kind: PackKind, pack_id: &str) -> Result<Pack, StoreError> {
    let mut patch = Row::new();
    patch.insert("status".into(), json!(PackStatus::Published.as_str()));

    let rows = self
      .store
      .update(kind.packs_table(), Filter::all().eq("id", pack_id), patch)
      .await?;
    first(decode_rows(tag_kind(rows, kind))?, || {
      format!("{} pack {} not found", kind.as_str(), pack_id)
    })
  }

  // ==========================================================================
  // Change subscriptions
  // ==========================================================================

  pub fn watch_groups() -> Vec<Watch> {
    vec![Watch::new(GROUPS_TABLE, Filter::all())]
  }

  pub fn watch_packs(group_id: &str, kind: PackKind) -> Vec<Watch> {
    vec![Watch::new(
      kind.packs_table(),
      Filter::all().eq("group_id", group_id),
    )]
  }

  pub fn watch_pack(pack_id: &str, kind: PackKind) -> Vec<Watch> {
    vec![Watch::new(kind.packs_table(), Filter::all().eq("id", pack_id))]
  }

  /// Pack ids are unique across groups, so the pack filter alone scopes the feed.
  pub fn watch_selections(pack_id: &str, kind: PackKind) -> Vec<Watch> {
    vec![Watch::new(
      kind.selections_table(),
      Filter::all().eq("pack_id", pack_id),
    )]
  }

  pub fn watch_users(group_id: Option<&str>) -> Vec<Watch> {
    let filter = match group_id {
      Some(g) => Filter::all().eq("group_id", g),
      None => Filter::all(),
    };
    vec![Watch::new(PROFILES_TABLE, filter)]
  }

  // ==========================================================================
  // Mounted views
  // ==========================================================================

  pub fn mount_groups(&self) -> ViewSync<Vec<Group>, PortalKey> {
    let client = self.clone();
    ViewSync::mount(
      self.cache.clone(),
      self.store(),
      PortalKey::Groups,
      self.ttl,
      &Self::watch_groups(),
      move || {
        let client = client.clone();
        async move { client.fetch_groups().await }
      },
    )
  }

  pub fn mount_packs(&self, group_id: &str, kind: PackKind) -> ViewSync<Vec<Pack>, PortalKey> {
    let client = self.clone();
    let group = group_id.to_string();
    ViewSync::mount(
      self.cache.clone(),
      self.store(),
      PortalKey::packs(group_id, kind),
      self.ttl,
      &Self::watch_packs(group_id, kind),
      move || {
        let client = client.clone();
        let group = group.clone();
        async move { client.fetch_packs(&group, kind).await }
      },
    )
  }

  pub fn mount_pack(
    &self,
    group_id: &str,
    pack_id: &str,
    kind: PackKind,
  ) -> ViewSync<Pack, PortalKey> {
    let client = self.clone();
    let group = group_id.to_string();
    let pack = pack_id.to_string();
    ViewSync::mount(
      self.cache.clone(),
      self.store(),
      PortalKey::pack_detail(group_id, pack_id, kind),
      self.ttl,
      &Self::watch_pack(pack_id, kind),
      move || {
        let client = client.clone();
        let group = group.clone();
        let pack = pack.clone();
        async move { client.fetch_pack(&group, &pack, kind).await }
      },
    )
  }

  pub fn mount_selections(
    &self,
    group_id: &str,
    pack_id: &str,
    kind: PackKind,
  ) -> ViewSync<Vec<Selection>, PortalKey> {
    let client = self.clone();
    let group = group_id.to_string();
    let pack = pack_id.to_string();
    ViewSync::mount(
      self.cache.clone(),
      self.store(),
      PortalKey::selections(group_id, pack_id, kind),
      self.ttl,
      &Self::watch_selections(pack_id, kind),
      move || {
        let client = client.clone();
        let group = group.clone();
        let pack = pack.clone();
        async move { client.fetch_selections(&group, &pack, kind).await }
      },
    )
  }

  pub fn mount_users(&self, group_id: Option<&str>) -> ViewSync<Vec<User>, PortalKey> {
    let client = self.clone();
    let group = group_id.map(String::from);
    ViewSync::mount(
      self.cache.clone(),
      self.store(),
      PortalKey::users(group_id),
      self.ttl,
      &Self::watch_users(group_id),
      move || {
        let client = client.clone();
        let group = group.clone();
        async move { client.fetch_users(group.as_deref()).await }
      },
    )
  }
}

fn open_medium(config: &CacheConfig) -> Result<Arc<dyn CacheMedium>> {
  if !config.enabled {
    return Ok(Arc::new(NoopMedium));
  }
  match config.backend {
    CacheBackend::Memory => Ok(Arc::new(MemoryMedium::new())),
    CacheBackend::Sqlite => {
      let medium = SqliteMedium::open(config.path.as_deref())
        .map_err(|e| eyre!("Failed to open cache database: {}", e))?;
      Ok(Arc::new(medium))
    }
  }
}

/// Pack rows carry no kind column; record which table they came from.
fn tag_kind(mut rows: Vec<Row>, kind: PackKind) -> Vec<Row> {
  for row in &mut rows {
    row.insert("kind".into(), Value::String(kind.as_str().to_string()));
  }
  rows
}

fn first<T>(records: Vec<T>, missing: impl FnOnce() -> String) -> Result<T, StoreError> {
  records
    .into_iter()
    .next()
    .ok_or_else(|| StoreError::new("not_found", missing()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::portal::demo;
  use crate::store::MemoryStore;

  fn client() -> (CachedPortalClient, MemoryStore) {
    let store = MemoryStore::new();
    demo::seed(&store);
    let cache = CacheLayer::from_shared(Arc::new(MemoryMedium::new()) as Arc<dyn CacheMedium>);
    (CachedPortalClient::new(Arc::new(store.clone()), cache), store)
  }

  #[tokio::test]
  async fn test_groups_are_cached() {
    let (client, store) = client();

    let first = client.groups().await.unwrap();
    let second = client.groups().await.unwrap();

    assert!(!first.is_empty());
    assert_eq!(first, second);
    assert_eq!(store.query_count(GROUPS_TABLE), 1);
  }

  #[tokio::test]
  async fn test_refresh_flag_bypasses_cache_once() {
    let (client, store) = client();
    client.groups().await.unwrap();

    client.request_refresh(crate::portal::keys::GROUPS_FLAG);
    client.groups().await.unwrap();
    client.groups().await.unwrap();

    assert_eq!(store.query_count(GROUPS_TABLE), 2);
  }

  #[tokio::test]
  async fn test_packs_are_tagged_with_their_kind() {
    let (client, _) = client();

    let course = client.packs(demo::GROUP_CS, PackKind::Course).await.unwrap();
    let exchange = client
      .packs(demo::GROUP_CS, PackKind::Exchange)
      .await
      .unwrap();

    assert!(!course.is_empty());
    assert!(course.iter().all(|p| p.kind == PackKind::Course));
    assert!(exchange.iter().all(|p| p.kind == PackKind::Exchange));
    assert!(course.iter().all(|p| p.group_id == demo::GROUP_CS));
  }

  #[tokio::test]
  async fn test_pack_from_another_group_is_not_found() {
    let (client, _) = client();
    let packs = client.packs(demo::GROUP_CS, PackKind::Course).await.unwrap();

    let err = client
      .pack(demo::GROUP_DS, &packs[0].id, PackKind::Course)
      .await
      .unwrap_err();

    assert_eq!(err.store_error().code, "not_found");
  }

  #[tokio::test]
  async fn test_selections_of_pack_outside_group_are_not_found() {
    let (client, store) = client();
    let packs = client.packs(demo::GROUP_CS, PackKind::Course).await.unwrap();

    let err = client
      .selections(demo::GROUP_DS, &packs[0].id, PackKind::Course)
      .await
      .unwrap_err();

    assert_eq!(err.store_error().code, "not_found");
    assert_eq!(store.query_count(PackKind::Course.selections_table()), 0);
    assert!(client
      .cache()
      .get::<Vec<Selection>, _>(&PortalKey::selections(demo::GROUP_DS, &packs[0].id, PackKind::Course))
      .is_none());
  }

  #[tokio::test]
  async fn test_set_selection_status_returns_updated_record() {
    let (client, store) = client();
    let packs = client.packs(demo::GROUP_CS, PackKind::Course).await.unwrap();
    let selections = client
      .selections(demo::GROUP_CS, &packs[0].id, PackKind::Course)
      .await
      .unwrap();
    let target = &selections[0];

    let updated = client
      .set_selection_status(PackKind::Course, &target.id, SelectionStatus::Rejected)
      .await
      .unwrap();

    assert_eq!(updated.id, target.id);
    assert_eq!(updated.status, SelectionStatus::Rejected);
    assert!(updated.updated_at.is_some());

    // The write does not touch the cache; the stale list is still served
    let cached = client
      .selections(demo::GROUP_CS, &packs[0].id, PackKind::Course)
      .await
      .unwrap();
    assert_eq!(cached[0].status, target.status);
    assert_eq!(store.query_count(PackKind::Course.selections_table()), 1);
  }

  #[tokio::test]
  async fn test_publish_missing_pack_is_not_found() {
    let (client, _) = client();
    let err = client
      .publish_pack(PackKind::Exchange, "no-such-pack")
      .await
      .unwrap_err();
    assert_eq!(err.code, "not_found");
  }

  #[tokio::test]
  async fn test_users_filtered_by_group() {
    let (client, _) = client();
    let all = client.users(None).await.unwrap();
    let cs = client.users(Some(demo::GROUP_CS)).await.unwrap();

    assert!(cs.len() < all.len());
    assert!(cs
      .iter()
      .all(|u| u.group_id.as_deref() == Some(demo::GROUP_CS)));
  }

  #[tokio::test]
  async fn test_approve_through_mounted_view() {
    let (client, store) = client();
    let packs = client.packs(demo::GROUP_CS, PackKind::Course).await.unwrap();
    let pack_id = packs[0].id.clone();

    let mut view = client.mount_selections(demo::GROUP_CS, &pack_id, PackKind::Course);
    view.settle().await;
    let target = view.data().unwrap()[0].id.clone();
    let loads = store.query_count(PackKind::Course.selections_table());

    let list_key = PortalKey::packs(demo::GROUP_CS, PackKind::Course);
    view
      .mutate(
        client.set_selection_status(PackKind::Course, &target, SelectionStatus::Approved),
        &[&list_key],
        |selections: &mut Vec<Selection>, updated: &Selection| {
          for s in selections.iter_mut().filter(|s| s.id == updated.id) {
            *s = updated.clone();
          }
        },
      )
      .await
      .unwrap();

    let shown = view.data().unwrap();
    assert_eq!(
      shown.iter().find(|s| s.id == target).map(|s| s.status),
      Some(SelectionStatus::Approved)
    );
    assert_eq!(store.query_count(PackKind::Course.selections_table()), loads);
    assert!(client
      .cache()
      .get::<Vec<Selection>, _>(view.key())
      .is_none());
    assert!(client.cache().get::<Vec<Pack>, _>(&list_key).is_none());
  }
}
