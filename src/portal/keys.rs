//! Cache keys for portal queries.

use crate::cache::QueryKey;

use super::types::PackKind;

pub const GROUPS_FLAG: &str = "groups";
pub const SELECTIONS_FLAG: &str = "selections";
pub const USERS_FLAG: &str = "users";

/// Refresh flag for the pack list of a kind.
pub fn packs_flag(kind: PackKind) -> &'static str {
  match kind {
    PackKind::Course => "course_packs",
    PackKind::Exchange => "exchange_packs",
  }
}

/// Query key types for portal reads.
///
/// Every field of a variant goes into the storage key. Pack detail is scoped
/// by group as well as pack so identical pack ids in two groups never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PortalKey {
  /// All groups
  Groups,
  /// Packs of one kind within a group
  Packs { group_id: String, kind: PackKind },
  /// A single pack
  PackDetail {
    group_id: String,
    pack_id: String,
    kind: PackKind,
  },
  /// Student selections submitted to a pack
  Selections {
    group_id: String,
    pack_id: String,
    kind: PackKind,
  },
  /// User profiles, optionally limited to one group
  Users { group_id: Option<String> },
}

impl PortalKey {
  pub fn packs(group_id: &str, kind: PackKind) -> Self {
    Self::Packs {
      group_id: group_id.to_string(),
      kind,
    }
  }

  pub fn pack_detail(group_id: &str, pack_id: &str, kind: PackKind) -> Self {
    Self::PackDetail {
      group_id: group_id.to_string(),
      pack_id: pack_id.to_string(),
      kind,
    }
  }

  pub fn selections(group_id: &str, pack_id: &str, kind: PackKind) -> Self {
    Self::Selections {
      group_id: group_id.to_string(),
      pack_id: pack_id.to_string(),
      kind,
    }
  }

  pub fn users(group_id: Option<&str>) -> Self {
    Self::Users {
      group_id: group_id.map(String::from),
    }
  }
}

impl QueryKey for PortalKey {
  fn cache_key(&self) -> String {
    match self {
      Self::Groups => "groups".to_string(),
      Self::Packs { group_id, kind } => {
        format!("packs:group={}:kind={}", group_id, kind.as_str())
      }
      Self::PackDetail {
        group_id,
        pack_id,
        kind,
      } => format!(
        "pack:group={}:pack={}:kind={}",
        group_id,
        pack_id,
        kind.as_str()
      ),
      Self::Selections {
        group_id,
        pack_id,
        kind,
      } => format!(
        "selections:group={}:pack={}:kind={}",
        group_id,
        pack_id,
        kind.as_str()
      ),
      Self::Users { group_id } => match group_id {
        Some(g) => format!("users:group={}", g),
        None => "users:all".to_string(),
      },
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Groups => "all groups".to_string(),
      Self::Packs { group_id, kind } => {
        format!("{} packs of group {}", kind.as_str(), group_id)
      }
      Self::PackDetail { pack_id, kind, .. } => format!("{} pack {}", kind.as_str(), pack_id),
      Self::Selections { pack_id, kind, .. } => {
        format!("selections for {} pack {}", kind.as_str(), pack_id)
      }
      Self::Users { group_id } => {
        if let Some(g) = group_id {
          format!("users in group {}", g)
        } else {
          "all users".to_string()
        }
      }
    }
  }

  fn refresh_flag(&self) -> Option<&'static str> {
    match self {
      Self::Groups => Some(GROUPS_FLAG),
      Self::Packs { kind, .. } => Some(packs_flag(*kind)),
      // The flag is one-shot; letting detail consume it would starve the list
      Self::PackDetail { .. } => None,
      Self::Selections { .. } => Some(SELECTIONS_FLAG),
      Self::Users { .. } => Some(USERS_FLAG),
    }
  }
}
