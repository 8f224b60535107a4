use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use elective_sync::app::App;
use elective_sync::config::{CacheBackend, Config};
use elective_sync::logging;
use elective_sync::portal::{demo, CachedPortalClient};
use elective_sync::store::{MemoryStore, RecordStore, RestStore};

#[derive(Parser, Debug)]
#[command(name = "elective-sync")]
#[command(about = "Terminal client for the elective-selection portal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/elective-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Group to open on startup
  #[arg(short, long)]
  group: Option<String>,

  /// Run against seeded in-memory data instead of a backend
  #[arg(long)]
  demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = if args.demo && args.config.is_none() {
    Config::demo()
  } else {
    Config::load(args.config.as_deref())?
  };

  // Override group if specified on command line
  let mut config = if let Some(group) = args.group {
    Config {
      default_group: Some(group),
      ..config
    }
  } else {
    config
  };

  // Demo data must never land in a shared on-disk cache
  if args.demo {
    config.cache.backend = CacheBackend::Memory;
  }

  let _log_guard = logging::init(&config.log)?;

  let (store, label): (Arc<dyn RecordStore>, String) = if args.demo {
    let store = MemoryStore::new();
    demo::seed(&store);
    demo::spawn_activity(store.clone(), Duration::from_secs(20));
    (Arc::new(store), "demo".to_string())
  } else {
    let api_key = Config::get_api_key()?;
    let store = RestStore::new(&config.store, api_key)
      .map_err(|e| eyre!("Invalid store configuration: {}", e))?;
    (Arc::new(store), config.store.url.clone())
  };
  info!(store = %label, demo = args.demo, "starting");

  let client = CachedPortalClient::with_cache_config(store, &config.cache)?;

  // Initialize and run the app
  let mut app = App::new(client, &config, label);
  app.run().await?;

  Ok(())
}
