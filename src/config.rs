use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub store: StoreConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
  /// Group opened on startup instead of the group list
  pub default_group: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
  /// Project URL, e.g. https://abc.supabase.co
  pub url: String,
  /// Postgres schema exposed through the REST surface (defaults to public)
  pub schema: Option<String>,
  /// Per-request timeout. No timeout if unset.
  pub timeout_secs: Option<u64>,
  /// How often a change subscription re-reads its rows
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,
}

fn default_poll_interval() -> u64 {
  5
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
  /// SQLite file shared by every running client
  #[default]
  Sqlite,
  /// Per-process map, lost on exit
  Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_ttl_minutes")]
  pub ttl_minutes: u32,
  #[serde(default)]
  pub backend: CacheBackend,
  /// Database path for the sqlite backend (defaults to the user data dir)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_minutes: default_ttl_minutes(),
      backend: CacheBackend::default(),
      path: None,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> chrono::Duration {
    chrono::Duration::minutes(i64::from(self.ttl_minutes))
  }
}

fn default_true() -> bool {
  true
}

fn default_ttl_minutes() -> u32 {
  60
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Filter directive, e.g. "info" or "elective_sync=debug"
  pub level: Option<String>,
  /// Log file path (defaults to the user data dir)
  pub file: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./elective-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/elective-sync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/elective-sync/config.yaml\n\
                 See config.example.yaml for the format, or run with --demo."
      )),
    }
  }

  /// Configuration for `--demo`: in-memory cache, no backend.
  pub fn demo() -> Self {
    Self {
      store: StoreConfig {
        url: "memory://demo".into(),
        schema: None,
        timeout_secs: None,
        poll_interval_secs: default_poll_interval(),
      },
      cache: CacheConfig {
        backend: CacheBackend::Memory,
        ..CacheConfig::default()
      },
      log: LogConfig::default(),
      default_group: None,
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("elective-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("elective-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the store API key from environment variables.
  ///
  /// Checks ELECTIVE_SYNC_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("ELECTIVE_SYNC_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!(
          "Store API key not found. Set ELECTIVE_SYNC_API_KEY or SUPABASE_ANON_KEY environment variable."
        )
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_gets_defaults() {
    let config = Config::parse("store:\n  url: https://abc.supabase.co\n").unwrap();

    assert_eq!(config.store.poll_interval_secs, 5);
    assert_eq!(config.store.timeout_secs, None);
    assert!(config.cache.enabled);
    assert_eq!(config.cache.ttl_minutes, 60);
    assert_eq!(config.cache.backend, CacheBackend::Sqlite);
    assert_eq!(config.cache.ttl(), chrono::Duration::minutes(60));
    assert!(config.default_group.is_none());
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
store:
  url: https://abc.supabase.co
  schema: electives
  timeout_secs: 15
  poll_interval_secs: 2
cache:
  enabled: false
  ttl_minutes: 10
  backend: memory
log:
  level: debug
  file: /tmp/elective-sync.log
default_group: cs-2024
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.store.schema.as_deref(), Some("electives"));
    assert_eq!(config.store.timeout_secs, Some(15));
    assert_eq!(config.store.poll_interval_secs, 2);
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.backend, CacheBackend::Memory);
    assert_eq!(config.log.level.as_deref(), Some("debug"));
    assert_eq!(config.default_group.as_deref(), Some("cs-2024"));
  }

  #[test]
  fn test_unknown_backend_is_rejected() {
    let yaml = "store:\n  url: https://abc.supabase.co\ncache:\n  backend: redis\n";
    assert!(Config::parse(yaml).is_err());
  }

  #[test]
  fn test_missing_explicit_path_errors() {
    let err = Config::load(Some(Path::new("/nonexistent/elective-sync.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
