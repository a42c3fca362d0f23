//! Worker launch.
//!
//! [`WorkerLauncher::launch`] picks an execution mode from the settings,
//! starts the worker and returns a [`WorkerHandle`] once the worker is
//! confirmed started. Every mode hands back the same [`WorkerInterface`].
//!
//! | `start_method`        | mode       | transport                      |
//! |-----------------------|------------|--------------------------------|
//! | `thread`              | Thread     | in-process channels            |
//! | `grpc`                | Networked  | local TCP, port file discovery |
//! | anything else / unset | Subprocess | child stdin/stdout             |

use std::{
  net::SocketAddr,
  path::PathBuf,
  process::Stdio,
  thread::{JoinHandle, ThreadId},
  time::Duration,
};

use thiserror::Error;
use tokio::{net::TcpStream, process::Child};
use tracing::{debug, info, warn};

use crate::{
  dirs,
  ipc::{
    IpcError, RecordData, RecordResult, WorkerInterface, channel_pair,
    codec::{Bridge, bridge_caller},
  },
  settings::{SettingsSnapshot, SettingsStore},
  worker::{WorkerFn, default_worker},
};

pub mod entry;
pub mod port;

pub use entry::{EntryGuard, EntryPoint, register_entry_point, registered_entry_point};

/// Subcommand serving the worker protocol on stdin/stdout.
pub const WORKER_SUBCOMMAND: &str = "worker";
/// Subcommand serving the worker protocol on a local port.
pub const SERVER_SUBCOMMAND: &str = "worker-server";

#[derive(Debug, Error)]
pub enum LaunchError {
  /// The worker never confirmed its start.
  #[error("worker launch timed out: {0}")]
  Timeout(String),

  #[error("failed to spawn worker: {0}")]
  Spawn(#[source] std::io::Error),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),

  #[error("worker thread: {0}")]
  Thread(String),
}

/// How the worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
  Subprocess,
  Thread,
  Networked,
}

impl LaunchMode {
  /// `fork` and `forkserver` map to the subprocess re-exec start.
  pub fn from_start_method(method: Option<&str>) -> Self {
    match method {
      Some("thread") => LaunchMode::Thread,
      Some("grpc") => LaunchMode::Networked,
      _ => LaunchMode::Subprocess,
    }
  }
}

impl std::fmt::Display for LaunchMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      LaunchMode::Subprocess => write!(f, "subprocess"),
      LaunchMode::Thread => write!(f, "thread"),
      LaunchMode::Networked => write!(f, "networked"),
    }
  }
}

/// Timing and worker body.
#[derive(Clone)]
pub struct LaunchConfig {
  /// How long a networked worker may take to publish its port.
  pub port_timeout: Duration,
  pub poll_interval: Duration,
  /// How long a byte-transport worker may take to answer the settings record.
  pub handshake_timeout: Duration,
  /// Body run by thread-mode workers.
  pub worker_fn: WorkerFn,
}

impl Default for LaunchConfig {
  fn default() -> Self {
    Self {
      port_timeout: Duration::from_secs(30),
      poll_interval: Duration::from_millis(200),
      handshake_timeout: Duration::from_secs(30),
      worker_fn: default_worker(),
    }
  }
}

impl std::fmt::Debug for LaunchConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LaunchConfig")
      .field("port_timeout", &self.port_timeout)
      .field("poll_interval", &self.poll_interval)
      .field("handshake_timeout", &self.handshake_timeout)
      .finish_non_exhaustive()
  }
}

// ============================================================================
// Handle
// ============================================================================

/// Mode-specific resources of a running worker.
#[derive(Debug)]
pub enum Transport {
  Subprocess {
    child: Child,
    pid: u32,
    bridge: Bridge,
  },
  Thread {
    join: Option<JoinHandle<()>>,
    thread_id: ThreadId,
  },
  Networked {
    child: Child,
    pid: u32,
    endpoint: SocketAddr,
    bridge: Bridge,
  },
}

/// A started worker and the channel to it.
#[derive(Debug)]
pub struct WorkerHandle {
  interface: WorkerInterface,
  transport: Transport,
  closed: bool,
}

impl WorkerHandle {
  pub fn mode(&self) -> LaunchMode {
    match self.transport {
      Transport::Subprocess { .. } => LaunchMode::Subprocess,
      Transport::Thread { .. } => LaunchMode::Thread,
      Transport::Networked { .. } => LaunchMode::Networked,
    }
  }

  pub fn pid(&self) -> Option<u32> {
    match self.transport {
      Transport::Subprocess { pid, .. } | Transport::Networked { pid, .. } => Some(pid),
      Transport::Thread { .. } => None,
    }
  }

  pub fn thread_id(&self) -> Option<ThreadId> {
    match self.transport {
      Transport::Thread { thread_id, .. } => Some(thread_id),
      _ => None,
    }
  }

  /// Address of a networked worker.
  pub fn endpoint(&self) -> Option<SocketAddr> {
    match self.transport {
      Transport::Networked { endpoint, .. } => Some(endpoint),
      _ => None,
    }
  }

  pub fn interface(&self) -> &WorkerInterface {
    &self.interface
  }

  pub fn interface_mut(&mut self) -> &mut WorkerInterface {
    &mut self.interface
  }

  /// Whether the worker is still running and its channels are open. A
  /// crashed process or a returned thread body counts as dead.
  pub fn is_alive(&mut self) -> bool {
    if self.closed {
      return false;
    }
    match &mut self.transport {
      Transport::Subprocess { child, .. } | Transport::Networked { child, .. } => {
        matches!(child.try_wait(), Ok(None))
      }
      Transport::Thread { join, .. } => join.as_ref().is_some_and(|join| !join.is_finished()),
    }
  }

  /// Waits for the worker to end. No timeout.
  pub(crate) async fn join(&mut self) -> Result<(), LaunchError> {
    match &mut self.transport {
      Transport::Subprocess { child, pid, .. } | Transport::Networked { child, pid, .. } => {
        let status = child.wait().await?;
        debug!(pid = *pid, %status, "worker process exited");
      }
      Transport::Thread { join, thread_id } => {
        if let Some(join) = join.take() {
          let thread_id = *thread_id;
          tokio::task::spawn_blocking(move || join.join())
            .await
            .map_err(|e| LaunchError::Thread(e.to_string()))?
            .map_err(|_| LaunchError::Thread("worker thread panicked".into()))?;
          debug!(?thread_id, "worker thread joined");
        }
      }
    }
    Ok(())
  }

  /// Closes both channel directions and stops the transport pumps.
  pub(crate) fn close(&mut self) {
    self.interface.close();
    if let Transport::Subprocess { bridge, .. } | Transport::Networked { bridge, .. } = &self.transport {
      bridge.abort();
    }
    self.closed = true;
  }
}

// ============================================================================
// Launcher
// ============================================================================

#[derive(Debug, Default)]
pub struct WorkerLauncher {
  config: LaunchConfig,
}

impl WorkerLauncher {
  pub fn new(config: LaunchConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &LaunchConfig {
    &self.config
  }

  /// Starts a worker configured by `settings`.
  pub async fn launch(&self, settings: &SettingsStore) -> Result<WorkerHandle, LaunchError> {
    let mode = LaunchMode::from_start_method(settings.str_value("start_method"));
    let snapshot = settings.snapshot();
    info!(%mode, "launching worker");
    match mode {
      LaunchMode::Thread => self.launch_thread(snapshot),
      LaunchMode::Subprocess => {
        let guard = EntryGuard::acquire().map_err(LaunchError::Spawn)?;
        let options = WorkerOptions::from_settings(settings);
        self.launch_subprocess(guard.entry(), &options, snapshot).await
      }
      LaunchMode::Networked => {
        let guard = EntryGuard::acquire().map_err(LaunchError::Spawn)?;
        let options = WorkerOptions::from_settings(settings);
        self.launch_networked(guard.entry(), &options, snapshot).await
      }
    }
  }

  fn launch_thread(&self, snapshot: SettingsSnapshot) -> Result<WorkerHandle, LaunchError> {
    let (interface, endpoint) = channel_pair();
    let worker_fn = self.config.worker_fn.clone();
    let join = std::thread::Builder::new()
      .name("runtrace-worker".into())
      .spawn(move || worker_fn(snapshot, endpoint))
      .map_err(|e| LaunchError::Thread(e.to_string()))?;
    let thread_id = join.thread().id();
    debug!(?thread_id, "worker thread started");
    Ok(WorkerHandle {
      interface,
      transport: Transport::Thread {
        join: Some(join),
        thread_id,
      },
      closed: false,
    })
  }

  async fn launch_subprocess(
    &self,
    entry: &EntryPoint,
    options: &WorkerOptions,
    snapshot: SettingsSnapshot,
  ) -> Result<WorkerHandle, LaunchError> {
    let mut command = entry.command(WORKER_SUBCOMMAND);
    options.apply(&mut command);
    command
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .kill_on_drop(true);
    let mut child = command.spawn().map_err(LaunchError::Spawn)?;
    let pid = child.id().unwrap_or_default();
    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
      return Err(LaunchError::Spawn(std::io::Error::other("worker stdio not captured")));
    };
    debug!(pid, "worker process spawned");

    let (mut interface, bridge) = bridge_caller(stdout, stdin);
    if let Err(e) = self.handshake(&mut interface, &mut child, snapshot).await {
      bridge.abort();
      return Err(e);
    }
    Ok(WorkerHandle {
      interface,
      transport: Transport::Subprocess { child, pid, bridge },
      closed: false,
    })
  }

  async fn launch_networked(
    &self,
    entry: &EntryPoint,
    options: &WorkerOptions,
    snapshot: SettingsSnapshot,
  ) -> Result<WorkerHandle, LaunchError> {
    let port_file = dirs::port_file_path(std::process::id());
    port::clear_port_file(&port_file);

    let mut command = entry.command(SERVER_SUBCOMMAND);
    command
      .arg("--port-filename")
      .arg(&port_file)
      .arg("--pid")
      .arg(std::process::id().to_string());
    options.apply(&mut command);
    command
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    let mut child = command.spawn().map_err(LaunchError::Spawn)?;
    let pid = child.id().unwrap_or_default();
    debug!(pid, port_file = %port_file.display(), "worker server spawned");

    let found = port::wait_for_port(
      &port_file,
      &mut child,
      self.config.port_timeout,
      self.config.poll_interval,
    )
    .await;
    port::clear_port_file(&port_file);
    let port = found?;

    let endpoint = SocketAddr::from(([127, 0, 0, 1], port));
    let stream = TcpStream::connect(endpoint).await?;
    let (read_half, write_half) = stream.into_split();
    let (mut interface, bridge) = bridge_caller(read_half, write_half);
    if let Err(e) = self.handshake(&mut interface, &mut child, snapshot).await {
      bridge.abort();
      return Err(e);
    }
    info!(pid, %endpoint, "networked worker ready");
    Ok(WorkerHandle {
      interface,
      transport: Transport::Networked {
        child,
        pid,
        endpoint,
        bridge,
      },
      closed: false,
    })
  }

  /// Sends the snapshot and waits for `ready`, watching for early exit.
  async fn handshake(
    &self,
    interface: &mut WorkerInterface,
    child: &mut Child,
    snapshot: SettingsSnapshot,
  ) -> Result<(), LaunchError> {
    let timeout = self.config.handshake_timeout;
    let answer = tokio::select! {
      answer = interface.request(RecordData::Settings(snapshot), timeout) => answer,
      status = child.wait() => {
        let status = status?;
        return Err(LaunchError::Timeout(format!("worker exited during handshake ({status})")));
      }
    };
    match answer {
      Ok(RecordResult {
        data: crate::ipc::ResultData::Ready { pid, .. },
        ..
      }) => {
        debug!(pid, "worker ready");
        Ok(())
      }
      Ok(other) => Err(LaunchError::Ipc(IpcError::Unexpected(format!("{:?}", other.data)))),
      Err(IpcError::Timeout(what)) => Err(LaunchError::Timeout(format!("no answer to {what}"))),
      Err(IpcError::Closed) => Err(LaunchError::Timeout("worker closed the channel during handshake".into())),
      Err(e) => Err(e.into()),
    }
  }
}

// ============================================================================
// Worker process options
// ============================================================================

/// Settings forwarded to worker processes on their command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerOptions {
  pub log_file: Option<PathBuf>,
  pub log_level: Option<String>,
  pub check_interval: Option<u64>,
}

impl WorkerOptions {
  pub fn from_settings(settings: &SettingsStore) -> Self {
    let check_interval = settings
      .value("_internal_check_process")
      .and_then(crate::settings::Value::as_int)
      .and_then(|secs| u64::try_from(secs).ok())
      .filter(|secs| *secs > 0);
    if settings.value("_internal_check_process").is_some() && check_interval.is_none() {
      warn!("ignoring non-positive _internal_check_process");
    }
    Self {
      log_file: settings.log_internal(),
      log_level: settings.str_value("_log_level").map(str::to_string),
      check_interval,
    }
  }

  fn apply(&self, command: &mut tokio::process::Command) {
    if let Some(path) = &self.log_file {
      command.arg("--log-file").arg(path);
    }
    if let Some(level) = &self.log_level {
      command.arg("--log-level").arg(level);
    }
    if let Some(secs) = self.check_interval {
      command.arg("--check-interval").arg(secs.to_string());
    }
  }
}
