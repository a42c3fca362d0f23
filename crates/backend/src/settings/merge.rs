//! Layered settings resolution.
//!
//! Each `apply_*` method folds one layer into a store with a single `update`
//! call at that layer's [`Source`]. [`SettingsMerger::resolve`] runs them in
//! order.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
  HostEnvironment, SettingsError, SettingsMap, SettingsSnapshot, SettingsStore, Source, Value,
  environ::{environ_to_settings, infer_from_environment},
  registry::RESUME_CHOICES,
};
use crate::notice::Notices;

/// Length of generated run ids.
const RUN_ID_LEN: usize = 8;

const NO_PROGRAM: &str = "<no main program>";

/// Fresh run id: lowercase hex.
pub fn generate_id() -> String {
  let mut id = Uuid::new_v4().simple().to_string();
  id.truncate(RUN_ID_LEN);
  id
}

/// Contents of the auto-resume marker file.
#[derive(Debug, Serialize, Deserialize)]
struct ResumeMarker {
  run_id: String,
}

fn read_resume_marker(path: &Path) -> Option<String> {
  let contents = std::fs::read_to_string(path).ok()?;
  match serde_json::from_str::<ResumeMarker>(&contents) {
    Ok(marker) => Some(marker.run_id),
    Err(e) => {
      warn!(path = %path.display(), "ignoring unreadable resume marker: {}", e);
      None
    }
  }
}

/// Renames caller-facing keys and drops `None` values.
fn rename_keys(args: SettingsMap, renames: &[(&str, &str)]) -> SettingsMap {
  args
    .into_iter()
    .filter(|(_, v)| !v.is_none())
    .map(|(k, v)| match renames.iter().find(|(from, _)| *from == k) {
      Some((_, to)) => (to.to_string(), v),
      None => (k, v),
    })
    .collect()
}

const LOGIN_RENAMES: &[(&str, &str)] = &[("key", "api_key"), ("host", "base_url")];

const INIT_RENAMES: &[(&str, &str)] = &[
  ("name", "run_name"),
  ("id", "run_id"),
  ("tags", "run_tags"),
  ("group", "run_group"),
  ("job_type", "run_job_type"),
  ("notes", "run_notes"),
  ("dir", "root_dir"),
];

/// Keys a sweep controls; caller values are discarded while a sweep runs.
const SWEEP_LOCKED: &[&str] = &["project", "entity", "id", "run_id"];

fn lookup<'a>(map: &'a SettingsMap, key: &str) -> Option<&'a Value> {
  map.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// `resume` accepts a run id or `true` besides the named policies.
fn normalize_resume(args: &mut SettingsMap) {
  let Some(resume) = lookup(args, "resume").cloned() else {
    return;
  };
  let resume = match resume {
    Value::Str(s) if !RESUME_CHOICES.contains(&s.as_str()) => {
      if lookup(args, "run_id").is_none_or(Value::is_none) {
        args.push(("run_id".to_string(), Value::Str(s)));
      }
      Value::from("allow")
    }
    Value::Bool(true) => Value::from("auto"),
    other => other,
  };
  args.retain(|(k, _)| k != "resume");
  args.push(("resume".to_string(), resume));
}

impl SettingsStore {
  /// Host inference, then prefixed variables, both at `Source::Env`.
  pub fn apply_environ(&mut self, host: &HostEnvironment) -> Result<(), SettingsError> {
    self.update(infer_from_environment(host), Source::Env, None)?;
    let env = environ_to_settings(&host.vars);
    info!(count = env.len(), "applying environment settings");
    self.update(env, Source::Env, None)?;

    let cwd = host
      .cwd
      .as_ref()
      .map(|p| Value::from(p.to_string_lossy().into_owned()))
      .unwrap_or_default();
    self.set_defaults([("root_dir", cwd), ("symlink", Value::Bool(!host.windows))])
  }

  /// System then workspace INI files.
  pub fn apply_config_files(&mut self) -> Result<(), SettingsError> {
    if let Some(path) = self.settings_system() {
      let values = self.load_from_key_value_file(&path);
      debug!(path = %path.display(), count = values.len(), "system settings file");
      self.update(values, Source::System, None)?;
    }
    if let Some(path) = self.settings_workspace() {
      let values = self.load_from_key_value_file(&path);
      debug!(path = %path.display(), count = values.len(), "workspace settings file");
      self.update(values, Source::Workspace, None)?;
    }
    Ok(())
  }

  /// Login arguments; `key` and `host` name the credentials and server.
  pub fn apply_login(&mut self, args: SettingsMap) -> Result<(), SettingsError> {
    self.update(rename_keys(args, LOGIN_RENAMES), Source::Login, None)
  }

  pub fn apply_setup(&mut self, args: SettingsMap) -> Result<(), SettingsError> {
    self.update(args, Source::Setup, None)
  }

  /// Every stored value of a caller-built settings object.
  pub fn apply_user(&mut self, user: &SettingsSnapshot) -> Result<(), SettingsError> {
    let values = user.iter().map(|(k, v)| (k.as_str(), v.clone()));
    self.update(values, Source::User, None)
  }

  /// The login-related subset of init arguments (`mode`).
  pub fn apply_init_login(&mut self, args: &SettingsMap) -> Result<(), SettingsError> {
    let values = args
      .iter()
      .filter(|(k, v)| k == "mode" && !v.is_none())
      .map(|(k, v)| (k.as_str(), v.clone()));
    self.update(values, Source::Init, None)
  }

  /// Init arguments, including sweep locking, resume handling and run id
  /// assignment.
  pub fn apply_init(&mut self, mut args: SettingsMap) -> Result<(), SettingsError> {
    if self.value("sweep_id").is_some_and(Value::is_truthy) {
      args.retain(|(k, v)| {
        if !SWEEP_LOCKED.contains(&k.as_str()) {
          return true;
        }
        if v.is_truthy() {
          self.notices.warn(format!("Ignored init arg {k} when running a sweep"));
        }
        false
      });
    }

    let mut args = rename_keys(args, INIT_RENAMES);
    normalize_resume(&mut args);
    self.update(args, Source::Init, None)?;

    let auto_resume = self.str_value("resume") == Some("auto");
    if auto_resume
      && let Some(path) = self.resume_fname()
      && let Some(resumed) = read_resume_marker(&path)
    {
      match self.str_value("run_id") {
        None => self.set("run_id", resumed)?,
        Some(current) if current != resumed => {
          self.notices.warn(format!(
            "Tried to auto resume run with id {resumed} but id {current} is set."
          ));
        }
        Some(_) => {}
      }
    }

    if self.value("run_id").is_none() {
      self.set("run_id", generate_id())?;
    }

    if auto_resume {
      self.persist_resume_marker()?;
    }
    Ok(())
  }

  fn persist_resume_marker(&self) -> Result<(), SettingsError> {
    let (Some(path), Some(run_id)) = (self.resume_fname(), self.str_value("run_id")) else {
      return Ok(());
    };
    let stage_dir = self.stage_dir();
    std::fs::create_dir_all(&stage_dir).map_err(|e| SettingsError::persist(&stage_dir, e))?;
    let marker = ResumeMarker {
      run_id: run_id.to_string(),
    };
    let json = serde_json::to_string(&marker).map_err(|e| SettingsError::persist(&path, e.into()))?;
    std::fs::write(&path, json).map_err(|e| SettingsError::persist(&path, e))
  }

  /// Fills `program`/`program_relpath` from the host unless already set.
  pub fn apply_program(&mut self, host: &HostEnvironment) -> Result<(), SettingsError> {
    let program = self
      .str_value("program")
      .map(PathBuf::from)
      .or_else(|| host.executable.clone());
    let Some(program) = program else {
      return self.update([("program", Value::from(NO_PROGRAM))], Source::Setup, None);
    };

    let relpath = match self.str_value("program_relpath") {
      Some(existing) => Some(existing.to_string()),
      None => self
        .str_value("root_dir")
        .and_then(|root| program.strip_prefix(root).ok())
        .map(|rel| rel.to_string_lossy().into_owned()),
    };
    self.update(
      [
        ("program", Value::from(program.to_string_lossy().into_owned())),
        ("program_relpath", Value::from(relpath)),
      ],
      Source::Setup,
      None,
    )
  }

  /// Direct constructor arguments.
  pub fn apply_args(&mut self, args: SettingsMap) -> Result<(), SettingsError> {
    self.update(args, Source::Settings, None)
  }
}

// ============================================================================
// Merger
// ============================================================================

/// Everything a caller can contribute to a resolution.
#[derive(Debug, Clone, Default)]
pub struct SettingsRequest {
  /// Captured from the process when absent.
  pub host: Option<HostEnvironment>,
  pub load_files: bool,
  pub login: SettingsMap,
  pub setup: SettingsMap,
  pub user: Option<SettingsSnapshot>,
  /// Init layer; `Some` runs it even when empty.
  pub init: Option<SettingsMap>,
  pub infer_program: bool,
  pub args: SettingsMap,
  pub freeze: bool,
  pub notices: Notices,
}

impl SettingsRequest {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_host(mut self, host: HostEnvironment) -> Self {
    self.host = Some(host);
    self
  }

  pub fn with_files(mut self) -> Self {
    self.load_files = true;
    self
  }

  pub fn with_init(mut self, init: SettingsMap) -> Self {
    self.init = Some(init);
    self
  }

  pub fn with_program(mut self) -> Self {
    self.infer_program = true;
    self
  }

  pub fn with_args(mut self, args: SettingsMap) -> Self {
    self.args = args;
    self
  }

  pub fn with_notices(mut self, notices: Notices) -> Self {
    self.notices = notices;
    self
  }

  pub fn frozen(mut self) -> Self {
    self.freeze = true;
    self
  }
}

/// Runs every layer in order.
#[derive(Debug, Default)]
pub struct SettingsMerger;

impl SettingsMerger {
  pub fn resolve(request: SettingsRequest) -> Result<SettingsStore, SettingsError> {
    let host = request.host.unwrap_or_else(HostEnvironment::capture);
    let mut store = SettingsStore::new().with_notices(request.notices);

    store.apply_environ(&host)?;
    if request.load_files {
      store.apply_config_files()?;
    }
    store.apply_login(request.login)?;
    store.apply_setup(request.setup)?;
    if let Some(user) = &request.user {
      store.apply_user(user)?;
    }
    let has_init = request.init.is_some();
    if let Some(init) = request.init {
      store.apply_init_login(&init)?;
      store.apply_init(init)?;
    }
    if request.infer_program {
      store.apply_program(&host)?;
    }
    store.apply_args(request.args)?;

    debug!(
      run_id = store.str_value("run_id").unwrap_or(""),
      mode = store.str_value("mode").unwrap_or(""),
      init = has_init,
      "settings resolved"
    );
    if request.freeze {
      store.freeze();
    }
    Ok(store)
  }
}
