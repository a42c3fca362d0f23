//! Derived, read-only properties.
//!
//! Computed from stored fields on every access; never stored and never part
//! of the merge.

use std::{
  path::{Path, PathBuf},
  sync::atomic::Ordering,
};

use super::{SettingsStore, Value, registry::str_as_bool};
use crate::dirs;

pub const COMPUTED_NAMES: &[&str] = &[
  "_offline",
  "_noop",
  "_silent",
  "_strict",
  "_show_info",
  "_show_warnings",
  "_show_errors",
  "_jupyter",
  "_windows",
  "_console",
  "stage_dir",
  "resume_fname",
  "log_user",
  "log_internal",
  "_sync_dir",
  "sync_file",
  "files_dir",
  "tmp_dir",
  "_tmp_code_dir",
  "log_symlink_user",
  "log_symlink_internal",
  "sync_symlink_latest",
  "settings_system",
  "settings_workspace",
];

/// Resolved console capture strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleMode {
  Off,
  Wrap,
  Redirect,
}

impl ConsoleMode {
  pub fn as_str(self) -> &'static str {
    match self {
      ConsoleMode::Off => "off",
      ConsoleMode::Wrap => "wrap",
      ConsoleMode::Redirect => "redirect",
    }
  }
}

const STAGE_DIR: &str = "runtrace";
const HIDDEN_STAGE_DIR: &str = ".runtrace";

fn path_value(path: Option<PathBuf>) -> Option<Value> {
  path.map(|p| Value::Str(p.to_string_lossy().into_owned()))
}

impl SettingsStore {
  /// `Some(value)` when `name` is a computed property.
  pub(super) fn computed(&self, name: &str) -> Option<Option<Value>> {
    let value = match name {
      "_offline" => Some(self.offline().into()),
      "_noop" => Some(self.noop().into()),
      "_silent" => self.flag("silent").map(Value::from),
      "_strict" => self.flag("strict").map(Value::from),
      "_show_info" => self.flag("show_info").map(Value::from),
      "_show_warnings" => self.flag("show_warnings").map(Value::from),
      "_show_errors" => self.flag("show_errors").map(Value::from),
      "_jupyter" => Some(self.jupyter().into()),
      "_windows" => Some(cfg!(windows).into()),
      "_console" => self.console_mode().map(|c| c.as_str().into()),
      "stage_dir" => path_value(Some(self.stage_dir())),
      "resume_fname" => path_value(self.resume_fname()),
      "log_user" => path_value(self.log_user()),
      "log_internal" => path_value(self.log_internal()),
      "_sync_dir" => path_value(self.spec_path(&["sync_dir_spec"])),
      "sync_file" => path_value(self.sync_file()),
      "files_dir" => path_value(self.files_dir()),
      "tmp_dir" => path_value(Some(self.tmp_dir())),
      "_tmp_code_dir" => path_value(Some(self.tmp_dir().join("code"))),
      "log_symlink_user" => path_value(self.spec_path(&["log_symlink_user_spec"])),
      "log_symlink_internal" => path_value(self.spec_path(&["log_symlink_internal_spec"])),
      "sync_symlink_latest" => path_value(self.spec_path(&["sync_symlink_latest_spec"])),
      "settings_system" => path_value(self.settings_system()),
      "settings_workspace" => path_value(self.settings_workspace()),
      _ => return None,
    };
    Some(value)
  }

  fn flag(&self, name: &str) -> Option<bool> {
    let value = self.value(name)?;
    if !value.is_truthy() {
      return None;
    }
    str_as_bool(value)
  }

  /// Offline when disabled or in a dry-run/offline mode.
  pub fn offline(&self) -> bool {
    let disabled = self.value("disabled").is_some_and(Value::is_truthy);
    disabled || matches!(self.str_value("mode"), Some("dryrun" | "offline"))
  }

  pub fn noop(&self) -> bool {
    self.str_value("mode") == Some("disabled")
  }

  pub fn silent(&self) -> bool {
    self.flag("silent").unwrap_or(false)
  }

  pub fn jupyter(&self) -> bool {
    self.value("_notebook").is_some_and(Value::is_truthy)
  }

  /// `auto` resolves to `wrap` in notebooks, thread workers and on Windows,
  /// otherwise `redirect`.
  pub fn console_mode(&self) -> Option<ConsoleMode> {
    let console = match self.str_value("console")? {
      "auto" => {
        if self.jupyter() || self.str_value("start_method") == Some("thread") || cfg!(windows) {
          "wrap"
        } else {
          "redirect"
        }
      }
      other => other,
    };
    match console {
      "off" => Some(ConsoleMode::Off),
      "wrap" => Some(ConsoleMode::Wrap),
      "redirect" => Some(ConsoleMode::Redirect),
      _ => None,
    }
  }

  /// Staging directory under `root_dir`.
  ///
  /// Prefers an existing hidden directory. Falls back to the system temp
  /// directory when `root_dir` is not writable; the notice for that is sent
  /// once per store.
  pub fn stage_dir(&self) -> PathBuf {
    let root = self.str_value("root_dir").unwrap_or("");
    let root_path = Path::new(root);
    let name = if root_path.join(HIDDEN_STAGE_DIR).exists() {
      HIDDEN_STAGE_DIR
    } else {
      STAGE_DIR
    };
    let path = root_path.join(name);
    let probe = if root.is_empty() { Path::new(".") } else { root_path };
    if !dirs::is_writable(probe) {
      if !self.stage_fallback_noticed.swap(true, Ordering::Relaxed) {
        self.notices.warn(format!(
          "Path {} wasn't writable, using system temp directory",
          path.display()
        ));
      }
      return std::env::temp_dir().join(name);
    }
    path
  }

  /// Resolves the template stored in each named spec field.
  pub(crate) fn spec_path(&self, spec_fields: &[&str]) -> Option<PathBuf> {
    let parts: Option<Vec<&str>> = spec_fields.iter().map(|f| self.str_value(f)).collect();
    self.resolve_path(&parts?)
  }

  pub fn resume_fname(&self) -> Option<PathBuf> {
    self.spec_path(&["resume_fname_spec"])
  }

  pub fn log_user(&self) -> Option<PathBuf> {
    self.spec_path(&["log_dir_spec", "log_user_spec"])
  }

  pub fn log_internal(&self) -> Option<PathBuf> {
    self.spec_path(&["log_dir_spec", "log_internal_spec"])
  }

  pub fn sync_file(&self) -> Option<PathBuf> {
    self.spec_path(&["sync_dir_spec", "sync_file_spec"])
  }

  pub fn files_dir(&self) -> Option<PathBuf> {
    self.spec_path(&["files_dir_spec"])
  }

  pub fn tmp_dir(&self) -> PathBuf {
    self
      .spec_path(&["tmp_dir_spec"])
      .unwrap_or_else(std::env::temp_dir)
  }

  pub fn settings_system(&self) -> Option<PathBuf> {
    self.spec_path(&["settings_system_spec"])
  }

  pub fn settings_workspace(&self) -> Option<PathBuf> {
    self.spec_path(&["settings_workspace_spec"])
  }
}
