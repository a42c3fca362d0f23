//! Port file discovery for networked workers.

use std::{path::Path, time::Duration};

use tokio::process::Child;
use tracing::{debug, trace, warn};

use super::LaunchError;

/// Removes a stale port file. Missing is fine; other failures are logged.
pub fn clear_port_file(path: &Path) {
  match std::fs::remove_file(path) {
    Ok(()) => debug!(path = %path.display(), "removed port file"),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => warn!(path = %path.display(), "failed to remove port file: {}", e),
  }
}

fn read_port(path: &Path) -> Option<u16> {
  let raw = match std::fs::read_to_string(path) {
    Ok(raw) => raw,
    Err(e) => {
      trace!(path = %path.display(), "port file not readable yet: {}", e);
      return None;
    }
  };
  match raw.trim().parse() {
    Ok(port) => Some(port),
    Err(e) => {
      trace!(path = %path.display(), "port file not parseable yet: {}", e);
      None
    }
  }
}

/// Polls `path` every `interval` until it holds a port, `child` exits, or
/// `timeout` elapses.
pub async fn wait_for_port(
  path: &Path,
  child: &mut Child,
  timeout: Duration,
  interval: Duration,
) -> Result<u16, LaunchError> {
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    if let Some(status) = child.try_wait()? {
      return Err(LaunchError::Timeout(format!(
        "worker server exited before publishing its port ({status})"
      )));
    }
    if let Some(port) = read_port(path) {
      debug!(port, "worker server port discovered");
      return Ok(port);
    }
    if tokio::time::Instant::now() >= deadline {
      return Err(LaunchError::Timeout(format!(
        "no port in {} after {:?}",
        path.display(),
        timeout
      )));
    }
    tokio::time::sleep(interval).await;
  }
}
