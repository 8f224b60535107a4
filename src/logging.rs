//! Log setup. The terminal belongs to the UI, so events go to a daily rolling file.

use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "ELECTIVE_SYNC_LOG";

const DEFAULT_LEVEL: &str = "info";
const FILE_PREFIX: &str = "elective-sync.log";

/// Install the global subscriber. Keep the guard alive until exit or buffered
/// lines are lost.
pub fn init(config: &LogConfig) -> Result<WorkerGuard> {
  let (dir, prefix) = log_target(config.file.as_deref())
    .ok_or_else(|| eyre!("Could not determine a log directory; set log.file in the config"))?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, prefix);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter(config.level.as_deref()))
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}

fn filter(configured: Option<&str>) -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV)
    .or_else(|_| EnvFilter::try_new(configured.unwrap_or(DEFAULT_LEVEL)))
    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Directory and file-name prefix for the rolling appender.
fn log_target(file: Option<&Path>) -> Option<(PathBuf, String)> {
  match file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
      let prefix = path.file_name()?.to_string_lossy().into_owned();
      Some((dir, prefix))
    }
    None => {
      let dir = dirs::data_dir()?.join("elective-sync").join("logs");
      Some((dir, FILE_PREFIX.to_string()))
    }
  }
}
