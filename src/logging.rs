use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default log location: $XDG_STATE_HOME/b9s/b9s.log (falls back to the cache dir)
pub fn default_log_path() -> Result<PathBuf> {
  let base = dirs::state_dir()
    .or_else(dirs::cache_dir)
    .ok_or_else(|| eyre!("Could not determine log directory"))?;
  Ok(base.join("b9s").join("b9s.log"))
}

/// Send tracing output to a file; stdout belongs to the terminal UI.
///
/// `RUST_LOG` overrides the default `b9s=info` filter. The returned guard
/// flushes the writer when dropped, so keep it alive until exit.
pub fn init(log_file: Option<&Path>) -> Result<WorkerGuard> {
  let path = match log_file {
    Some(path) => path.to_path_buf(),
    None => default_log_path()?,
  };
  let dir = path
    .parent()
    .filter(|p| !p.as_os_str().is_empty())
    .unwrap_or(Path::new("."));
  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;

  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::never(dir, file_name);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("b9s=info"));

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true),
    )
    .with(filter)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
