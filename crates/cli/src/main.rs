//! runtrace CLI - resolve run settings and drive worker processes

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use runtrace::launcher::{EntryPoint, register_entry_point};
use std::path::PathBuf;

mod commands;
mod logging;

use commands::{cmd_run, cmd_settings, cmd_worker, cmd_worker_server};
use logging::{init_cli_logging, init_worker_logging};

#[derive(Parser)]
#[command(name = "runtrace")]
#[command(about = "Layered run settings and worker launch")]
#[command(after_help = "\
EXAMPLES:
  runtrace settings                       # Resolved public settings
  runtrace settings --all --sources       # Every field with its source
  RUNTRACE_PROJECT=demo runtrace settings # Environment layer
  runtrace run --start-method grpc -p '{\"step\":1}'")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

/// Options the launcher forwards to worker processes
#[derive(Args, Debug, Clone)]
struct WorkerArgs {
  /// Append logs to this file instead of stderr
  #[arg(long, value_name = "FILE")]
  log_file: Option<PathBuf>,
  /// Log level (error, warn, info, debug, trace)
  #[arg(long)]
  log_level: Option<String>,
  /// Seconds between parent liveness checks (worker-server only)
  #[arg(long, default_value = "8")]
  check_interval: u64,
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve settings and print them as JSON
  Settings {
    /// Explicit setting, highest precedence (repeatable)
    #[arg(short, long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
    /// Also run the init layer (assigns a run id)
    #[arg(long)]
    init: bool,
    /// Include private fields
    #[arg(long)]
    all: bool,
    /// Show the source of each value
    #[arg(long)]
    sources: bool,
  },
  /// Launch a worker, publish payloads and shut it down
  Run {
    /// thread, spawn, fork, forkserver or grpc
    #[arg(long)]
    start_method: Option<String>,
    /// Init argument (repeatable)
    #[arg(short, long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
    /// JSON payload to publish (repeatable)
    #[arg(short, long = "payload", value_name = "JSON")]
    payload: Vec<String>,
  },
  /// Serve the worker protocol on stdin/stdout
  #[command(hide = true)]
  Worker {
    #[command(flatten)]
    worker: WorkerArgs,
  },
  /// Serve the worker protocol on a local TCP port
  #[command(hide = true)]
  WorkerServer {
    /// File the chosen port is written to
    #[arg(long, value_name = "FILE")]
    port_filename: PathBuf,
    /// Caller pid; the server exits once it is gone
    #[arg(long)]
    pid: Option<u32>,
    #[command(flatten)]
    worker: WorkerArgs,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  // Workers log to their file or stderr, everything else to stderr
  let _guard = match &cli.command {
    Commands::Worker { worker } | Commands::WorkerServer { worker, .. } => {
      init_worker_logging(worker.log_file.as_deref(), worker.log_level.as_deref())
    }
    _ => {
      init_cli_logging();
      None
    }
  };

  // Workers are re-executions of this binary
  register_entry_point(EntryPoint::synthetic()?);

  match cli.command {
    Commands::Settings {
      set,
      init,
      all,
      sources,
    } => cmd_settings(&set, init, all, sources).await,
    Commands::Run {
      start_method,
      set,
      payload,
    } => cmd_run(start_method, &set, &payload).await,
    Commands::Worker { .. } => cmd_worker().await,
    Commands::WorkerServer {
      port_filename,
      pid,
      worker,
    } => cmd_worker_server(port_filename, pid, worker.check_interval).await,
  }
}
