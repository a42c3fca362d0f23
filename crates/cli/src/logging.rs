//! Logging setup for CLI commands and worker processes

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initialize logging for CLI commands (stderr only, stdout carries output)
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::builder().with_default_directive(tracing::Level::INFO.into()).from_env_lossy())
    .with_writer(std::io::stderr)
    .init();
}

/// Parse a `_log_level` value
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" | "critical" => tracing::Level::ERROR,
    "warn" | "warning" => tracing::Level::WARN,
    "info" => tracing::Level::INFO,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize logging for a worker process.
///
/// With a log file: appends to that file (no ANSI). Without one: stderr.
/// Never stdout, which carries the protocol for stdio workers.
///
/// Returns the guard that must be kept alive for the duration of the program
pub fn init_worker_logging(log_file: Option<&Path>, log_level: Option<&str>) -> Option<WorkerGuard> {
  let level = log_level.map(parse_log_level).unwrap_or(tracing::Level::INFO);

  // Build env filter (allows RUST_LOG override)
  let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

  let target = log_file.and_then(|path| Some((path.parent()?, path.file_name()?)));
  let Some((dir, name)) = target else {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_ansi(false)
      .with_writer(std::io::stderr)
      .init();
    return None;
  };

  if std::fs::create_dir_all(dir).is_err() {
    // Fall back to stderr logging
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_ansi(false)
      .with_writer(std::io::stderr)
      .init();
    return None;
  }

  let file_appender = tracing_appender::rolling::never(dir, name);
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(file_writer)
    .init();

  Some(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_log_level() {
    assert_eq!(parse_log_level("DEBUG"), tracing::Level::DEBUG);
    assert_eq!(parse_log_level("warning"), tracing::Level::WARN);
    assert_eq!(parse_log_level("critical"), tracing::Level::ERROR);
    assert_eq!(parse_log_level("chatty"), tracing::Level::INFO);
  }
}
