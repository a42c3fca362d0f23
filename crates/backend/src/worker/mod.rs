//! Worker entry points.
//!
//! The worker answers the handshake and acknowledges records; processing of
//! payloads happens elsewhere. Three hosts share the same reply logic:
//!
//! - [`run_blocking`] runs on a dedicated OS thread (thread mode)
//! - [`serve_stdio`] serves stdin/stdout (subprocess mode)
//! - [`serve_tcp`] serves one local TCP connection (networked mode)

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::{
  dirs,
  ipc::{
    IpcError, Record, RecordData, RecordResult, WorkerEndpoint,
    codec::{Bridge, bridge_worker},
  },
  settings::SettingsSnapshot,
};

/// Worker body for thread mode.
pub type WorkerFn = Arc<dyn Fn(SettingsSnapshot, WorkerEndpoint) + Send + Sync>;

/// The default thread-mode body.
pub fn default_worker() -> WorkerFn {
  Arc::new(run_blocking)
}

/// What to do after answering a record.
#[derive(Debug, PartialEq)]
enum Step {
  Continue,
  Stop,
}

fn reply(record: &Record) -> (Option<RecordResult>, Step) {
  match &record.data {
    RecordData::Settings(_) => (Some(RecordResult::ready(record.num)), Step::Continue),
    RecordData::Payload(_) => (Some(RecordResult::ack(record.num)), Step::Continue),
    RecordData::Exit => (Some(RecordResult::exit_ack(record.num)), Step::Stop),
  }
}

/// Acknowledging loop for a worker thread. Returns on `exit` or when the
/// record channel closes.
pub fn run_blocking(snapshot: SettingsSnapshot, mut endpoint: WorkerEndpoint) {
  debug!(fields = snapshot.len(), "thread worker started");
  while let Some(record) = endpoint.records.blocking_recv() {
    let (result, step) = reply(&record);
    if let Some(result) = result
      && endpoint.results.send(result).is_err()
    {
      break;
    }
    if step == Step::Stop {
      break;
    }
  }
  debug!("thread worker finished");
}

/// Handshake then acknowledging loop for byte transports.
///
/// The first record must carry the settings snapshot; anything else is
/// answered with an error result and the worker stops.
pub async fn serve(mut endpoint: WorkerEndpoint) -> Result<Option<SettingsSnapshot>, IpcError> {
  let Some(first) = endpoint.records.recv().await else {
    debug!("caller closed before the handshake");
    return Ok(None);
  };
  let snapshot = match first.data {
    RecordData::Settings(snapshot) => snapshot,
    other => {
      let message = format!("expected settings, got {}", other.kind());
      warn!("{message}");
      endpoint
        .results
        .send(RecordResult::error(first.num, message.clone()))
        .map_err(|_| IpcError::Closed)?;
      return Err(IpcError::Unexpected(message));
    }
  };
  endpoint
    .results
    .send(RecordResult::ready(first.num))
    .map_err(|_| IpcError::Closed)?;
  info!(fields = snapshot.len(), run_id = snapshot.str_value("run_id").unwrap_or(""), "worker ready");

  while let Some(record) = endpoint.records.recv().await {
    let (result, step) = reply(&record);
    if let Some(result) = result {
      endpoint.results.send(result).map_err(|_| IpcError::Closed)?;
    }
    if step == Step::Stop {
      break;
    }
  }
  Ok(Some(snapshot))
}

/// Waits for the writer pump to flush everything queued before returning.
async fn finish_bridge(bridge: Bridge) {
  bridge.reader.abort();
  match bridge.writer.await {
    Ok(Err(e)) => warn!("writer pump failed: {e}"),
    Err(e) if !e.is_cancelled() => warn!("writer pump panicked: {e}"),
    _ => {}
  }
}

/// Serves the worker protocol over this process's stdin/stdout.
pub async fn serve_stdio() -> Result<(), IpcError> {
  let (endpoint, bridge) = bridge_worker(tokio::io::stdin(), tokio::io::stdout());
  let served = serve(endpoint).await;
  finish_bridge(bridge).await;
  served.map(|_| ())
}

// ============================================================================
// Networked worker
// ============================================================================

/// Options for [`serve_tcp`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
  pub port_file: PathBuf,
  /// Caller process; the server exits once it disappears.
  pub parent_pid: Option<u32>,
  pub check_interval: Duration,
}

/// Writes `port` through a temp file and a rename so readers never observe a
/// partial write.
pub fn write_port_file(path: &Path, port: u16) -> std::io::Result<()> {
  let tmp = path.with_extension("tmp");
  std::fs::write(&tmp, port.to_string())?;
  std::fs::rename(&tmp, path)
}

async fn parent_gone(parent_pid: Option<u32>, interval: Duration) {
  let Some(pid) = parent_pid else {
    return std::future::pending().await;
  };
  loop {
    tokio::time::sleep(interval).await;
    if !dirs::process_alive(pid) {
      info!(pid, "parent process exited");
      return;
    }
  }
}

/// Binds an ephemeral local port, publishes it, and serves one connection.
pub async fn serve_tcp(options: ServerOptions) -> Result<(), IpcError> {
  let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
  let port = listener.local_addr()?.port();
  write_port_file(&options.port_file, port)?;
  info!(port, port_file = %options.port_file.display(), "worker server listening");

  let watchdog = parent_gone(options.parent_pid, options.check_interval);
  tokio::pin!(watchdog);

  let stream = tokio::select! {
    accepted = listener.accept() => accepted?.0,
    _ = &mut watchdog => return Ok(()),
  };
  drop(listener);
  debug!("caller connected");

  let (read_half, write_half) = stream.into_split();
  let (endpoint, bridge) = bridge_worker(read_half, write_half);
  let served = tokio::select! {
    served = serve(endpoint) => served.map(|_| ()),
    _ = &mut watchdog => Ok(()),
  };
  finish_bridge(bridge).await;
  served
}
