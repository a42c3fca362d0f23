//! Field registry: every settings field, its hooks and its defaults.
//!
//! The registry is immutable once built and shared between stores via `Arc`.
//! Stores never look hooks up by name convention; they iterate this table.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::value::Value;

/// Pure check returning a rejection reason.
pub type Validator = fn(&Value) -> Option<String>;

/// Pure transform applied before validation.
pub type Preprocessor = fn(Value) -> Value;

/// Names starting with this marker are private: excluded from public
/// enumeration and from `set_defaults`.
pub const PRIVATE_MARKER: char = '_';

pub fn is_private(name: &str) -> bool {
  name.starts_with(PRIVATE_MARKER)
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
  pub name: &'static str,
  pub validate: Option<Validator>,
  pub preprocess: Option<Preprocessor>,
}

impl FieldSpec {
  pub const fn new(name: &'static str) -> Self {
    Self {
      name,
      validate: None,
      preprocess: None,
    }
  }

  pub const fn validated(self, validate: Validator) -> Self {
    Self {
      validate: Some(validate),
      ..self
    }
  }

  pub const fn preprocessed(self, preprocess: Preprocessor) -> Self {
    Self {
      preprocess: Some(preprocess),
      ..self
    }
  }

  pub fn is_private(&self) -> bool {
    is_private(self.name)
  }
}

/// Ordered `(name, value)` pairs.
pub type Defaults = Vec<(&'static str, Value)>;

/// Declared fields plus the three default tables applied at `Source::Base`.
#[derive(Debug, Clone)]
pub struct Registry {
  fields: Vec<FieldSpec>,
  /// Behavioral defaults for mode/console/flags.
  class_defaults: Defaults,
  /// Deployment defaults (server URL, git remote, ...).
  static_defaults: Defaults,
  /// Per-field defaults: sampling intervals, path templates, internals.
  field_defaults: Defaults,
}

static STANDARD: LazyLock<Arc<Registry>> = LazyLock::new(|| Arc::new(Registry::build_standard()));

impl Registry {
  /// Empty registry for building custom field sets.
  pub fn new(fields: Vec<FieldSpec>) -> Self {
    Self {
      fields,
      class_defaults: Vec::new(),
      static_defaults: Vec::new(),
      field_defaults: Vec::new(),
    }
  }

  pub fn with_class_defaults(mut self, defaults: Defaults) -> Self {
    self.class_defaults = defaults;
    self
  }

  pub fn with_static_defaults(mut self, defaults: Defaults) -> Self {
    self.static_defaults = defaults;
    self
  }

  pub fn with_field_defaults(mut self, defaults: Defaults) -> Self {
    self.field_defaults = defaults;
    self
  }

  /// The registry describing every run setting.
  pub fn standard() -> Arc<Registry> {
    Arc::clone(&STANDARD)
  }

  pub fn fields(&self) -> &[FieldSpec] {
    &self.fields
  }

  pub fn field(&self, name: &str) -> Option<&FieldSpec> {
    self.fields.iter().find(|f| f.name == name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.field(name).is_some()
  }

  pub fn class_defaults(&self) -> &Defaults {
    &self.class_defaults
  }

  pub fn static_defaults(&self) -> &Defaults {
    &self.static_defaults
  }

  pub fn field_defaults(&self) -> &Defaults {
    &self.field_defaults
  }

  fn build_standard() -> Self {
    Self::new(STANDARD_FIELDS.to_vec())
      .with_class_defaults(class_defaults())
      .with_static_defaults(static_defaults())
      .with_field_defaults(field_defaults())
  }
}

// ============================================================================
// Standard fields
// ============================================================================

const STANDARD_FIELDS: &[FieldSpec] = &[
  // server and identity
  FieldSpec::new("base_url")
    .preprocessed(preprocess_base_url)
    .validated(validate_base_url),
  FieldSpec::new("api_key"),
  FieldSpec::new("anonymous").validated(validate_anonymous),
  FieldSpec::new("mode").validated(validate_mode),
  FieldSpec::new("start_method").validated(validate_start_method),
  FieldSpec::new("entity"),
  FieldSpec::new("project"),
  FieldSpec::new("run_group"),
  FieldSpec::new("run_job_type"),
  FieldSpec::new("run_id"),
  FieldSpec::new("run_name"),
  FieldSpec::new("run_notes"),
  FieldSpec::new("resume"),
  FieldSpec::new("magic"),
  FieldSpec::new("run_tags"),
  FieldSpec::new("sweep_id"),
  FieldSpec::new("allow_val_change"),
  FieldSpec::new("force"),
  FieldSpec::new("relogin"),
  // compatibility and error handling
  FieldSpec::new("strict").validated(validate_bool_str),
  FieldSpec::new("problem").validated(validate_problem),
  // sampling
  FieldSpec::new("system_sample_seconds"),
  FieldSpec::new("system_samples"),
  FieldSpec::new("heartbeat_seconds"),
  FieldSpec::new("config_paths"),
  FieldSpec::new("sweep_param_path"),
  // directories and files
  FieldSpec::new("root_dir"),
  FieldSpec::new("settings_system_spec"),
  FieldSpec::new("settings_workspace_spec"),
  FieldSpec::new("sync_dir_spec"),
  FieldSpec::new("sync_file_spec"),
  FieldSpec::new("sync_symlink_latest_spec"),
  FieldSpec::new("log_dir_spec"),
  FieldSpec::new("log_user_spec"),
  FieldSpec::new("log_internal_spec"),
  FieldSpec::new("log_symlink_user_spec"),
  FieldSpec::new("log_symlink_internal_spec"),
  FieldSpec::new("resume_fname_spec"),
  FieldSpec::new("files_dir_spec"),
  FieldSpec::new("tmp_dir_spec"),
  FieldSpec::new("symlink"),
  // code and program
  FieldSpec::new("program"),
  FieldSpec::new("notebook_name"),
  FieldSpec::new("disable_code"),
  FieldSpec::new("ignore_globs"),
  FieldSpec::new("save_code"),
  FieldSpec::new("code_dir"),
  FieldSpec::new("program_relpath"),
  FieldSpec::new("git_remote"),
  // host
  FieldSpec::new("host"),
  FieldSpec::new("username"),
  FieldSpec::new("email"),
  FieldSpec::new("docker"),
  FieldSpec::new("sagemaker_disable"),
  FieldSpec::new("label_disable"),
  // console and output
  FieldSpec::new("console").validated(validate_console),
  FieldSpec::new("disabled"),
  FieldSpec::new("reinit"),
  FieldSpec::new("show_colors"),
  FieldSpec::new("show_emoji"),
  FieldSpec::new("silent").validated(validate_bool_str),
  FieldSpec::new("show_info").validated(validate_bool_str),
  FieldSpec::new("show_warnings").validated(validate_bool_str),
  FieldSpec::new("show_errors").validated(validate_bool_str),
  FieldSpec::new("summary_errors"),
  FieldSpec::new("summary_warnings"),
  // private
  FieldSpec::new("_cli_only_mode"),
  FieldSpec::new("_disable_viewer"),
  FieldSpec::new("_save_requirements"),
  FieldSpec::new("_internal_queue_timeout"),
  FieldSpec::new("_internal_check_process"),
  FieldSpec::new("_disable_meta"),
  FieldSpec::new("_disable_stats"),
  FieldSpec::new("_notebook"),
  FieldSpec::new("_jupyter_path"),
  FieldSpec::new("_jupyter_name"),
  FieldSpec::new("_jupyter_root"),
  FieldSpec::new("_executable"),
  FieldSpec::new("_cuda"),
  FieldSpec::new("_args"),
  FieldSpec::new("_os"),
  FieldSpec::new("_runtime"),
  FieldSpec::new("_kaggle"),
  FieldSpec::new("_except_exit"),
  FieldSpec::new("_log_level"),
];

fn class_defaults() -> Defaults {
  vec![
    ("mode", "online".into()),
    ("console", "auto".into()),
    ("disabled", false.into()),
    ("silent", "False".into()),
    ("show_info", "True".into()),
    ("show_warnings", "True".into()),
    ("show_errors", "True".into()),
  ]
}

pub const DEFAULT_BASE_URL: &str = "https://api.runtrace.ai";

fn static_defaults() -> Defaults {
  vec![
    ("base_url", DEFAULT_BASE_URL.into()),
    ("summary_warnings", 5.into()),
    ("git_remote", "origin".into()),
    ("ignore_globs", Value::List(Vec::new())),
  ]
}

fn field_defaults() -> Defaults {
  vec![
    ("problem", "fatal".into()),
    ("magic", false.into()),
    ("system_sample_seconds", 2.into()),
    ("system_samples", 15.into()),
    ("heartbeat_seconds", 30.into()),
    ("settings_system_spec", "~/.config/runtrace/settings".into()),
    ("settings_workspace_spec", "{stage_dir}/settings".into()),
    ("sync_dir_spec", "{stage_dir}/{run_mode}-{timespec}-{run_id}".into()),
    ("sync_file_spec", "run-{run_id}.runtrace".into()),
    ("sync_symlink_latest_spec", "{stage_dir}/latest-run".into()),
    ("log_dir_spec", "{stage_dir}/{run_mode}-{timespec}-{run_id}/logs".into()),
    ("log_user_spec", "debug.log".into()),
    ("log_internal_spec", "debug-internal.log".into()),
    ("log_symlink_user_spec", "{stage_dir}/debug.log".into()),
    ("log_symlink_internal_spec", "{stage_dir}/debug-internal.log".into()),
    ("resume_fname_spec", "{stage_dir}/runtrace-resume.json".into()),
    ("files_dir_spec", "{stage_dir}/{run_mode}-{timespec}-{run_id}/files".into()),
    ("tmp_dir_spec", "{stage_dir}/{run_mode}-{timespec}-{run_id}/tmp".into()),
    ("_save_requirements", true.into()),
    ("_internal_queue_timeout", 2.into()),
    ("_internal_check_process", 8.into()),
  ]
}

// ============================================================================
// Validators and preprocessors
// ============================================================================

fn error_choices(value: &Value, choices: &[&str]) -> String {
  format!("{} not in {}", value, choices.join(","))
}

fn check_choice(value: &Value, choices: &[&str]) -> Option<String> {
  match value.as_str() {
    Some(s) if choices.contains(&s) => None,
    _ => Some(error_choices(value, choices)),
  }
}

/// Loose boolean parsing: `y/yes/t/true/on/1` and `n/no/f/false/off/0`,
/// case-insensitive. Native booleans pass through.
pub fn str_as_bool(value: &Value) -> Option<bool> {
  match value {
    Value::Bool(b) => Some(*b),
    Value::Int(0) => Some(false),
    Value::Int(1) => Some(true),
    Value::Str(s) => match s.to_ascii_lowercase().as_str() {
      "y" | "yes" | "t" | "true" | "on" | "1" => Some(true),
      "n" | "no" | "f" | "false" | "off" | "0" => Some(false),
      _ => None,
    },
    _ => None,
  }
}

pub const START_METHODS: &[&str] = &["thread", "spawn", "fork", "forkserver", "grpc"];

pub const RESUME_CHOICES: &[&str] = &["allow", "must", "never", "auto"];

fn validate_start_method(value: &Value) -> Option<String> {
  check_choice(value, START_METHODS)
}

fn validate_mode(value: &Value) -> Option<String> {
  check_choice(value, &["dryrun", "run", "offline", "online", "disabled"])
}

fn validate_console(value: &Value) -> Option<String> {
  check_choice(value, &["auto", "redirect", "off", "wrap"])
}

fn validate_problem(value: &Value) -> Option<String> {
  check_choice(value, &["fatal", "warn", "silent"])
}

fn validate_anonymous(value: &Value) -> Option<String> {
  check_choice(value, &["allow", "must", "never", "false", "true"])
}

fn validate_bool_str(value: &Value) -> Option<String> {
  match str_as_bool(value) {
    Some(_) => None,
    None => Some(format!("{value} is not a boolean")),
  }
}

static CLOUD_HOST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r".*runtrace\.ai[^\.]*$").expect("valid regex"));

fn validate_base_url(value: &Value) -> Option<String> {
  let url = value.as_str()?;
  if CLOUD_HOST.is_match(url) && !url.contains("api.") {
    // the web app host is a common guess for the server address
    return Some(format!(
      "{url} is not a valid server address, did you mean {DEFAULT_BASE_URL}?"
    ));
  }
  if CLOUD_HOST.is_match(url) && url.contains("http://") {
    return Some(format!("http is not secure, please use {DEFAULT_BASE_URL}"));
  }
  None
}

fn preprocess_base_url(value: Value) -> Value {
  match value {
    Value::Str(s) => Value::Str(s.trim_end_matches('/').to_string()),
    other => other,
  }
}
