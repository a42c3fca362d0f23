//! Worker commands, started by the launcher rather than by hand

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use runtrace::worker::{ServerOptions, serve_stdio, serve_tcp};
use tracing::info;

/// Serve the worker protocol on stdin/stdout
pub async fn cmd_worker() -> Result<()> {
  info!(pid = std::process::id(), "stdio worker starting");
  serve_stdio().await.context("Worker failed")?;
  info!("stdio worker finished");
  Ok(())
}

/// Serve the worker protocol on a local port published through `port_filename`
pub async fn cmd_worker_server(port_filename: PathBuf, pid: Option<u32>, check_interval: u64) -> Result<()> {
  info!(pid = std::process::id(), parent = ?pid, "worker server starting");
  let options = ServerOptions {
    port_file: port_filename,
    parent_pid: pid,
    check_interval: Duration::from_secs(check_interval.max(1)),
  };
  serve_tcp(options).await.context("Worker server failed")?;
  info!("worker server finished");
  Ok(())
}
