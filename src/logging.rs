use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Keeps the log writer flushing until dropped.
pub struct LogGuard {
  _guard: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// Logs go to `<data dir>/fmcache/fmcache.log` so they don't mix with JSON
/// printed on stdout, or to stderr when `to_stderr` is set. The filter is read
/// from `FMCACHE_LOG` (default `info`).
pub fn init(to_stderr: bool) -> Result<LogGuard> {
  let filter = EnvFilter::try_from_env("FMCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  if to_stderr {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .with_target(false)
      .try_init()
      .map_err(|e| eyre!("Failed to install logger: {}", e))?;
    return Ok(LogGuard { _guard: None });
  }

  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("fmcache");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::never(&log_dir, "fmcache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .with_target(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;

  Ok(LogGuard {
    _guard: Some(guard),
  })
}
