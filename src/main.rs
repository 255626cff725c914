mod api;
mod app;
mod auth;
mod cache;
mod config;
mod context;
mod event;
mod logging;
mod mutation;
mod refresh;
mod storage;
mod ui;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use storage::{LocalStorage, MemoryStorage, SqliteStorage};

#[derive(Parser, Debug)]
#[command(name = "b9s")]
#[command(about = "A terminal dashboard for batch task processing, inspired by k9s")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/b9s/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Backend base URL. Saved for later runs.
  #[arg(short, long)]
  url: Option<String>,

  /// Log file (default: $XDG_STATE_HOME/b9s/b9s.log)
  #[arg(long)]
  log_file: Option<PathBuf>,

  /// Keep the API key and refresh settings in memory only
  #[arg(long)]
  no_persist: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Keep the guard alive so buffered log lines are flushed on exit
  let _log_guard = logging::init(args.log_file.as_deref())?;

  let config = config::Config::load(args.config.as_deref())?;

  let storage: Arc<dyn LocalStorage> = if args.no_persist {
    Arc::new(MemoryStorage::new())
  } else {
    Arc::new(SqliteStorage::open(config.storage.path.as_deref())?)
  };

  let ctx = context::AppContext::bootstrap(config, storage, args.url.as_deref())?;

  // Initialize and run the app
  let mut app = app::App::new(ctx);
  app.run().await?;

  Ok(())
}
