use serde::{Deserialize, Serialize};

/// Which of the two parallel pack families a record belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackKind {
  #[default]
  Course,
  Exchange,
}

impl PackKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Course => "course",
      Self::Exchange => "exchange",
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      Self::Course => "Courses",
      Self::Exchange => "Exchange",
    }
  }

  pub fn packs_table(&self) -> &'static str {
    match self {
      Self::Course => "course_packs",
      Self::Exchange => "exchange_packs",
    }
  }

  pub fn selections_table(&self) -> &'static str {
    match self {
      Self::Course => "course_selections",
      Self::Exchange => "exchange_selections",
    }
  }

  pub fn toggle(&self) -> Self {
    match self {
      Self::Course => Self::Exchange,
      Self::Exchange => Self::Course,
    }
  }
}

/// Student group (a cohort or program year)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackStatus {
  #[default]
  Draft,
  Published,
  Closed,
}

impl PackStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Draft => "draft",
      Self::Published => "published",
      Self::Closed => "closed",
    }
  }
}

/// Selection pack: the set of electives students choose from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pack {
  pub id: String,
  pub group_id: String,
  /// Not a column; filled in from the table the row came from
  #[serde(default)]
  pub kind: PackKind,
  pub title: String,
  #[serde(default)]
  pub status: PackStatus,
  #[serde(default)]
  pub deadline: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStatus {
  #[default]
  Pending,
  Approved,
  Rejected,
}

impl SelectionStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Approved => "approved",
      Self::Rejected => "rejected",
    }
  }
}

/// One student's choices within a pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
  pub id: String,
  pub pack_id: String,
  pub student_id: String,
  #[serde(default)]
  pub student_name: Option<String>,
  #[serde(default)]
  pub choices: Vec<String>,
  #[serde(default)]
  pub status: SelectionStatus,
  #[serde(default)]
  pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  #[default]
  Student,
  Manager,
  Admin,
}

/// Portal user profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: String,
  pub email: String,
  #[serde(default)]
  pub full_name: Option<String>,
  #[serde(default)]
  pub role: Role,
  #[serde(default)]
  pub group_id: Option<String>,
}

impl User {
  pub fn display_name(&self) -> &str {
    self.full_name.as_deref().unwrap_or(&self.email)
  }
}

pub const GROUPS_TABLE: &str = "groups";
pub const PROFILES_TABLE: &str = "profiles";

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_selection_decodes_with_missing_optionals() {
    let selection: Selection = serde_json::from_value(json!({
      "id": "s1",
      "pack_id": "p1",
      "student_id": "u1",
      "status": "approved"
    }))
    .unwrap();

    assert_eq!(selection.status, SelectionStatus::Approved);
    assert!(selection.choices.is_empty());
    assert!(selection.student_name.is_none());
  }

  #[test]
  fn test_unknown_status_is_rejected() {
    let result: Result<Pack, _> = serde_json::from_value(json!({
      "id": "p1",
      "group_id": "g1",
      "title": "Electives",
      "status": "archived"
    }));
    assert!(result.is_err());
  }

  #[test]
  fn test_kind_tables() {
    assert_eq!(PackKind::Course.packs_table(), "course_packs");
    assert_eq!(PackKind::Exchange.selections_table(), "exchange_selections");
    assert_eq!(PackKind::Course.toggle(), PackKind::Exchange);
  }

  #[test]
  fn test_display_name_falls_back_to_email() {
    let user = User {
      id: "u1".into(),
      email: "ada@uni.edu".into(),
      full_name: None,
      role: Role::Student,
      group_id: None,
    };
    assert_eq!(user.display_name(), "ada@uni.edu");
  }
}
