//! Worker entry identity.
//!
//! Subprocess and networked workers re-execute a program that understands the
//! worker subcommands. The `runtrace` binary registers itself at startup.
//! Embedders, test harnesses and debuggers usually do not, so a launch installs
//! a synthetic identity for its own duration and restores the absent one
//! afterwards, on success and on failure alike.

use std::{
  ffi::OsString,
  path::PathBuf,
  sync::{Mutex, MutexGuard},
};

use tokio::process::Command;
use tracing::debug;

/// Overrides the program used for synthetic entry points.
pub const WORKER_EXE_ENV: &str = "RUNTRACE_WORKER_EXE";

static ENTRY: Mutex<Option<EntryPoint>> = Mutex::new(None);

fn lock() -> MutexGuard<'static, Option<EntryPoint>> {
  // the slot holds plain data, a poisoned lock is still consistent
  ENTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Program plus leading arguments that reach the worker subcommands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
  pub program: PathBuf,
  pub args: Vec<OsString>,
}

impl EntryPoint {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
    }
  }

  pub fn with_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
  {
    self.args = args.into_iter().map(Into::into).collect();
    self
  }

  /// `RUNTRACE_WORKER_EXE` if set, else the running executable.
  pub fn synthetic() -> std::io::Result<Self> {
    if let Some(exe) = std::env::var_os(WORKER_EXE_ENV) {
      return Ok(Self::new(exe));
    }
    Ok(Self::new(std::env::current_exe()?))
  }

  /// Command running `subcommand` of this entry point.
  pub fn command(&self, subcommand: &str) -> Command {
    let mut command = Command::new(&self.program);
    command.args(&self.args).arg(subcommand);
    command
  }
}

/// Registers the process-wide entry point; replaces any earlier one.
pub fn register_entry_point(entry: EntryPoint) {
  debug!(program = %entry.program.display(), "worker entry point registered");
  *lock() = Some(entry);
}

/// Currently registered entry point.
pub fn registered_entry_point() -> Option<EntryPoint> {
  lock().clone()
}

/// Keeps an entry point available for one launch.
#[derive(Debug)]
pub struct EntryGuard {
  entry: EntryPoint,
  installed: bool,
}

impl EntryGuard {
  /// Uses the registered entry point, installing a synthetic one if there is
  /// none.
  pub fn acquire() -> std::io::Result<Self> {
    let mut slot = lock();
    if let Some(entry) = slot.as_ref() {
      return Ok(Self {
        entry: entry.clone(),
        installed: false,
      });
    }
    let entry = EntryPoint::synthetic()?;
    debug!(program = %entry.program.display(), "installing synthetic worker entry point");
    *slot = Some(entry.clone());
    Ok(Self { entry, installed: true })
  }

  pub fn entry(&self) -> &EntryPoint {
    &self.entry
  }
}

impl Drop for EntryGuard {
  fn drop(&mut self) {
    if !self.installed {
      return;
    }
    let mut slot = lock();
    if slot.as_ref() == Some(&self.entry) {
      *slot = None;
      debug!("synthetic worker entry point removed");
    }
  }
}

/// Serializes tests that touch the process-wide slot.
#[cfg(test)]
pub(crate) static TEST_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

#[cfg(test)]
pub(crate) fn tests_reset() {
  *lock() = None;
}
