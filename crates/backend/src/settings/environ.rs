//! Host environment probing and environment variable mapping.
//!
//! [`HostEnvironment::capture`] is the only place in the settings layer that
//! reads process-global state. Everything downstream is a pure function of a
//! captured value, so tests construct `HostEnvironment` directly.

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use tracing::{debug, info};

use super::{SettingsMap, Value};

pub const ENV_PREFIX: &str = "RUNTRACE_";

/// Settings whose variable is `RUNTRACE_<NAME>`.
const PLAIN_ENV_SETTINGS: &[&str] = &[
  "entity",
  "project",
  "base_url",
  "api_key",
  "sweep_id",
  "mode",
  "run_group",
  "problem",
  "console",
  "config_paths",
  "sweep_param_path",
  "run_id",
  "notebook_name",
  "host",
  "username",
  "disable_code",
  "code_dir",
  "anonymous",
  "ignore_globs",
  "resume",
  "silent",
  "sagemaker_disable",
  "start_method",
  "strict",
  "label_disable",
];

/// Settings whose variable name differs from the field name.
const RENAMED_ENV_SETTINGS: &[(&str, &str)] = &[
  ("root_dir", "RUNTRACE_DIR"),
  ("run_name", "RUNTRACE_NAME"),
  ("run_notes", "RUNTRACE_NOTES"),
  ("run_tags", "RUNTRACE_TAGS"),
  ("run_job_type", "RUNTRACE_JOB_TYPE"),
];

/// Prefixed variables read by host inference or the launcher rather than
/// mapped onto a setting.
const CONSUMED_ELSEWHERE: &[&str] = &[
  "RUNTRACE_SAVE_CODE",
  "RUNTRACE_DOCKER",
  crate::launcher::entry::WORKER_EXE_ENV,
];

/// Comma separated variables.
const LIST_SETTINGS: &[&str] = &["run_tags", "ignore_globs"];

const CUDA_VERSION_FILE: &str = "/usr/local/cuda/version.txt";

/// Variable name for `setting`, if it is read from the environment.
pub fn env_var_for(setting: &str) -> Option<String> {
  if let Some((_, var)) = RENAMED_ENV_SETTINGS.iter().find(|(s, _)| *s == setting) {
    return Some((*var).to_string());
  }
  PLAIN_ENV_SETTINGS
    .contains(&setting)
    .then(|| format!("{ENV_PREFIX}{}", setting.to_uppercase()))
}

fn setting_for_var(var: &str) -> Option<&'static str> {
  if let Some((setting, _)) = RENAMED_ENV_SETTINGS.iter().find(|(_, v)| *v == var) {
    return Some(*setting);
  }
  let name = var.strip_prefix(ENV_PREFIX)?.to_lowercase();
  PLAIN_ENV_SETTINGS.iter().copied().find(|s| *s == name)
}

/// Maps prefixed variables onto settings. Unrecognized prefixed variables are
/// logged and skipped.
pub fn environ_to_settings(vars: &BTreeMap<String, String>) -> SettingsMap {
  let mut out = SettingsMap::new();
  for (var, raw) in vars.range(ENV_PREFIX.to_string()..) {
    if !var.starts_with(ENV_PREFIX) {
      break;
    }
    let Some(setting) = setting_for_var(var) else {
      if CONSUMED_ELSEWHERE.contains(&var.as_str()) {
        debug!(var = %var, "environment variable handled outside the settings map");
      } else {
        info!(var = %var, "unhandled environment variable");
      }
      continue;
    };
    let value = if LIST_SETTINGS.contains(&setting) {
      Value::comma_list(raw)
    } else {
      Value::from(raw.as_str())
    };
    out.push((setting.to_string(), value));
  }
  debug!(count = out.len(), "settings from environment");
  out
}

/// Snapshot of everything the settings layer needs to know about the host.
#[derive(Debug, Clone, Default)]
pub struct HostEnvironment {
  pub vars: BTreeMap<String, String>,
  pub cwd: Option<PathBuf>,
  pub hostname: Option<String>,
  pub username: Option<String>,
  pub executable: Option<PathBuf>,
  pub os: String,
  pub args: Vec<String>,
  pub cuda_version: Option<String>,
  pub windows: bool,
}

impl HostEnvironment {
  /// Reads the current process environment.
  pub fn capture() -> Self {
    let vars: BTreeMap<String, String> = std::env::vars().collect();
    let username = vars
      .get("USER")
      .or_else(|| vars.get("LOGNAME"))
      .cloned()
      .or_else(current_uid);
    Self {
      cwd: std::env::current_dir().ok(),
      hostname: hostname::get().ok().map(|h| h.to_string_lossy().into_owned()),
      username,
      executable: std::env::current_exe().ok(),
      os: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
      args: std::env::args().skip(1).collect(),
      cuda_version: read_cuda_version(Path::new(CUDA_VERSION_FILE)),
      windows: cfg!(windows),
      vars,
    }
  }

  pub fn var(&self, name: &str) -> Option<&str> {
    self.vars.get(name).map(String::as_str)
  }

  pub fn notebook(&self) -> bool {
    self.var("RUNTRACE_NOTEBOOK_NAME").is_some() || self.var("JPY_PARENT_PID").is_some()
  }

  pub fn kaggle(&self) -> bool {
    self.var("KAGGLE_KERNEL_RUN_TYPE").is_some()
  }
}

#[cfg(unix)]
fn current_uid() -> Option<String> {
  // SAFETY: getuid has no preconditions and cannot fail
  Some(unsafe { libc::getuid() }.to_string())
}

#[cfg(not(unix))]
fn current_uid() -> Option<String> {
  None
}

/// Last whitespace separated word of the CUDA version file.
fn read_cuda_version(path: &Path) -> Option<String> {
  let contents = std::fs::read_to_string(path).ok()?;
  contents.split_whitespace().last().map(str::to_string)
}

fn env_flag(host: &HostEnvironment, name: &str) -> Option<bool> {
  host.var(name).and_then(|v| super::registry::str_as_bool(&Value::from(v)))
}

/// Settings implied by the host: identity, platform, notebook and container
/// detection. Pure in `host`.
pub fn infer_from_environment(host: &HostEnvironment) -> SettingsMap {
  let mut out: SettingsMap = Vec::new();
  let mut put = |k: &str, v: Value| out.push((k.to_string(), v));

  let save_code = host.var("RUNTRACE_SAVE_CODE");
  let disable_code = host.var("RUNTRACE_DISABLE_CODE");
  if save_code.is_some() || disable_code.is_some() {
    let save = env_flag(host, "RUNTRACE_SAVE_CODE").unwrap_or(false);
    let disabled = env_flag(host, "RUNTRACE_DISABLE_CODE").unwrap_or(false);
    put("save_code", (save && !disabled).into());
  }

  if host.notebook() {
    put("_notebook", true.into());
    if let Some(name) = host.var("RUNTRACE_NOTEBOOK_NAME")
      && let Some(cwd) = &host.cwd
      && cwd.join(name).exists()
    {
      put("_jupyter_path", name.into());
      put("_jupyter_name", name.into());
      put("_jupyter_root", cwd.to_string_lossy().into_owned().into());
    }
  }
  if host.kaggle() {
    put("_kaggle", true.into());
  }

  if let Some(hostname) = &host.hostname {
    put("host", hostname.as_str().into());
  }
  if let Some(username) = &host.username {
    put("username", username.as_str().into());
  }
  if let Some(exe) = &host.executable {
    put("_executable", exe.to_string_lossy().into_owned().into());
  }
  if let Some(image) = host.var("RUNTRACE_DOCKER") {
    put("docker", image.into());
  }
  if let Some(cuda) = &host.cuda_version {
    put("_cuda", cuda.as_str().into());
  }
  put("_args", host.args.clone().into());
  put("_os", host.os.as_str().into());
  put("_runtime", concat!("runtrace/", env!("CARGO_PKG_VERSION")).into());
  if host.windows {
    put("_except_exit", true.into());
  }
  out
}
