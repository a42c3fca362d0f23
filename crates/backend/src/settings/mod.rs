//! Layered run settings.
//!
//! A [`SettingsStore`] holds every declared field together with the source
//! that last set it. Values flow in through [`SettingsStore::update`], tagged
//! with a [`Source`]; a value only replaces another when its source ranks at
//! least as high, unless an override tag pins the existing value.
//!
//! ```text
//! defaults ─► environment ─► config files ─► login ─► setup ─► user ─► init ─► args
//!  (BASE)        (ENV)      (SYSTEM/WORKSPACE) (LOGIN) (SETUP) (USER)  (INIT) (SETTINGS)
//! ```
//!
//! The layering itself lives in [`merge`]; OS probing lives in [`environ`].

use std::{
  collections::{BTreeMap, BTreeSet, HashMap},
  sync::{Arc, atomic::AtomicBool},
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::notice::Notices;

pub mod computed;
pub mod environ;
mod error;
mod file;
pub mod merge;
mod path;
pub mod registry;
mod source;
mod value;

#[cfg(test)]
mod __tests__;

pub use computed::{COMPUTED_NAMES, ConsoleMode};
pub use environ::{HostEnvironment, infer_from_environment};
pub use error::SettingsError;
pub use merge::{SettingsMerger, SettingsRequest};
pub use registry::{FieldSpec, Registry};
pub use source::Source;
pub use value::Value;

/// Ordered `(field, value)` pairs, applied in order by `update`.
pub type SettingsMap = Vec<(String, Value)>;

#[derive(Debug, Clone, Default)]
struct Field {
  value: Value,
  source: Option<Source>,
  override_source: Option<Source>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
  Mutable,
  Frozen,
}

/// Configuration for a single run or session.
#[derive(Debug)]
pub struct SettingsStore {
  registry: Arc<Registry>,
  fields: BTreeMap<&'static str, Field>,
  state: State,
  /// Every source that tried to set a field, accepted or not.
  source_audit: HashMap<&'static str, BTreeSet<Source>>,
  /// Every override tag that tried to set a field, accepted or not.
  override_audit: HashMap<&'static str, BTreeSet<Source>>,
  started_at: Option<DateTime<Local>>,
  notices: Notices,
  /// Set once the unwritable-root notice has been sent.
  stage_fallback_noticed: AtomicBool,
}

impl Default for SettingsStore {
  fn default() -> Self {
    Self::new()
  }
}

impl SettingsStore {
  /// Standard registry with every default table applied at `Source::Base`.
  pub fn new() -> Self {
    let mut store = Self::empty(Registry::standard());
    store.apply_registry_defaults();
    store
  }

  /// A store with every field declared and unset.
  pub fn empty(registry: Arc<Registry>) -> Self {
    let fields = registry.fields().iter().map(|f| (f.name, Field::default())).collect();
    Self {
      registry,
      fields,
      state: State::Mutable,
      source_audit: HashMap::new(),
      override_audit: HashMap::new(),
      started_at: None,
      notices: Notices::log_only(),
      stage_fallback_noticed: AtomicBool::new(false),
    }
  }

  pub fn with_notices(mut self, notices: Notices) -> Self {
    self.notices = notices;
    self
  }

  pub fn notices(&self) -> &Notices {
    &self.notices
  }

  pub fn registry(&self) -> &Arc<Registry> {
    &self.registry
  }

  /// Class, static and per-field defaults, one `update` each.
  pub(crate) fn apply_registry_defaults(&mut self) {
    let registry = Arc::clone(&self.registry);
    for table in [
      registry.class_defaults(),
      registry.static_defaults(),
      registry.field_defaults(),
    ] {
      let values = table.iter().map(|(k, v)| (*k, v.clone()));
      if let Err(e) = self.update(values, Source::Base, None) {
        // defaults are authored alongside their validators
        warn!("default table rejected: {}", e);
      }
    }
  }

  // ==========================================================================
  // Mutation
  // ==========================================================================

  fn ensure_mutable(&self) -> Result<(), SettingsError> {
    match self.state {
      State::Mutable => Ok(()),
      State::Frozen => Err(SettingsError::Frozen),
    }
  }

  fn key_of(&self, name: &str) -> Result<&'static str, SettingsError> {
    self
      .fields
      .get_key_value(name)
      .map(|(k, _)| *k)
      .ok_or_else(|| SettingsError::unknown(name))
  }

  /// Runs the preprocessor then the validator for `name`.
  fn check(&self, name: &'static str, value: Value) -> Result<Value, SettingsError> {
    let Some(spec) = self.registry.field(name) else {
      return Err(SettingsError::unknown(name));
    };
    let value = match spec.preprocess {
      Some(preprocess) => preprocess(value),
      None => value,
    };
    if !value.is_none()
      && let Some(validate) = spec.validate
      && let Some(reason) = validate(&value)
    {
      return Err(SettingsError::validation(name, reason));
    }
    Ok(value)
  }

  /// Direct assignment, bypassing source priority.
  pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), SettingsError> {
    let key = self.key_of(name)?;
    self.ensure_mutable()?;
    let value = self.check(key, value.into())?.normalize();
    if let Some(field) = self.fields.get_mut(key) {
      field.value = value;
    }
    Ok(())
  }

  /// Applies `values` at `source`, honoring the priority rule.
  ///
  /// An undeclared key aborts the whole call before anything changes. A value
  /// that fails validation is skipped while the other keys still apply; the
  /// first such failure is returned once the call completes. Values rejected
  /// by priority are dropped silently.
  pub fn update<I, K>(&mut self, values: I, source: Source, override_source: Option<Source>) -> Result<(), SettingsError>
  where
    I: IntoIterator<Item = (K, Value)>,
    K: AsRef<str>,
  {
    let values: Vec<(K, Value)> = values.into_iter().collect();
    if values.is_empty() {
      return Ok(());
    }
    self.ensure_mutable()?;

    let mut keyed = Vec::with_capacity(values.len());
    for (name, value) in values {
      keyed.push((self.key_of(name.as_ref())?, value));
    }

    let mut first_error = None;
    for (key, value) in keyed {
      let value = match self.check(key, value) {
        Ok(v) => v,
        Err(e) => {
          if first_error.is_none() {
            first_error = Some(e);
          } else {
            warn!("{}", e);
          }
          continue;
        }
      };
      if value.is_none() {
        continue;
      }

      self.source_audit.entry(key).or_default().insert(source);
      if let Some(o) = override_source {
        self.override_audit.entry(key).or_default().insert(o);
      }

      let Some(field) = self.fields.get_mut(key) else {
        continue;
      };
      if priority_rejects(field, source, override_source) {
        trace!(field = key, %source, "update rejected by priority");
        continue;
      }
      field.value = value.normalize();
      field.source = Some(source);
      if override_source.is_some() {
        field.override_source = override_source;
      }
    }

    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  /// Fills fields that are still unset. Private keys are skipped; no priority
  /// or validation is involved.
  pub fn set_defaults<I, K>(&mut self, values: I) -> Result<(), SettingsError>
  where
    I: IntoIterator<Item = (K, Value)>,
    K: AsRef<str>,
  {
    self.ensure_mutable()?;
    for (name, value) in values {
      let name = name.as_ref();
      if registry::is_private(name) {
        continue;
      }
      let key = self.key_of(name)?;
      if let Some(field) = self.fields.get_mut(key)
        && field.value.is_none()
      {
        field.value = value.normalize();
      }
    }
    Ok(())
  }

  /// One-way transition into the read-only state.
  pub fn freeze(&mut self) -> &mut Self {
    self.state = State::Frozen;
    self
  }

  pub fn is_frozen(&self) -> bool {
    self.state == State::Frozen
  }

  /// Unfrozen deep copy.
  ///
  /// Stored values are re-applied at `Source::Base`, so the copy's own later
  /// updates from any layer replace them.
  pub fn duplicate(&self) -> SettingsStore {
    let mut copy = SettingsStore::empty(Arc::clone(&self.registry)).with_notices(self.notices.clone());
    copy.started_at = self.started_at;
    let values = self
      .fields
      .iter()
      .filter(|(_, f)| !f.value.is_none())
      .map(|(k, f)| (*k, f.value.clone()));
    if let Err(e) = copy.update(values, Source::Base, None) {
      warn!("duplicate dropped a field: {}", e);
    }
    copy
  }

  /// Records the run start, which makes `{timespec}` resolvable.
  pub fn start_run(&mut self) {
    let now = Local::now();
    debug!(started_at = %now, "run started");
    self.started_at = Some(now);
  }

  pub fn started_at(&self) -> Option<DateTime<Local>> {
    self.started_at
  }

  // ==========================================================================
  // Access
  // ==========================================================================

  /// Computed property or stored value. Unset fields and undeterminable
  /// paths are `None`.
  pub fn get(&self, name: &str) -> Result<Option<Value>, SettingsError> {
    if let Some(computed) = self.computed(name) {
      return Ok(computed);
    }
    let key = self.key_of(name)?;
    Ok(self.fields.get(key).map(|f| f.value.clone()).filter(|v| !v.is_none()))
  }

  /// Stored value, without computed properties.
  pub fn value(&self, name: &str) -> Option<&Value> {
    self.fields.get(name).map(|f| &f.value).filter(|v| !v.is_none())
  }

  pub fn str_value(&self, name: &str) -> Option<&str> {
    self.value(name).and_then(Value::as_str)
  }

  /// Source that last set the field through `update`.
  pub fn source_of(&self, name: &str) -> Option<Source> {
    self.fields.get(name).and_then(|f| f.source)
  }

  pub fn override_of(&self, name: &str) -> Option<Source> {
    self.fields.get(name).and_then(|f| f.override_source)
  }

  pub fn audit_sources(&self, name: &str) -> BTreeSet<Source> {
    self.source_audit.get(name).cloned().unwrap_or_default()
  }

  pub fn audit_overrides(&self, name: &str) -> BTreeSet<Source> {
    self.override_audit.get(name).cloned().unwrap_or_default()
  }

  /// Declared fields that are not private.
  pub fn public_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.fields.keys().copied().filter(|k| !registry::is_private(k))
  }

  /// Public fields followed by every computed property.
  pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.public_keys().chain(COMPUTED_NAMES.iter().copied())
  }

  /// Owned copy of every stored value, for handing to a worker.
  pub fn snapshot(&self) -> SettingsSnapshot {
    let values = self
      .fields
      .iter()
      .filter(|(_, f)| !f.value.is_none())
      .map(|(k, f)| (k.to_string(), f.value.clone()))
      .collect();
    SettingsSnapshot(values)
  }
}

/// Decides whether an update at `(source, override_source)` must be dropped.
fn priority_rejects(field: &Field, source: Source, override_source: Option<Source>) -> bool {
  let Some(recorded) = field.source else {
    return false;
  };
  if field.override_source.is_some() {
    return override_source.is_none() || source <= recorded;
  }
  override_source.is_none() && source < recorded
}

// ============================================================================
// Snapshot
// ============================================================================

/// Value copy of a store, serializable across process boundaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsSnapshot(BTreeMap<String, Value>);

impl SettingsSnapshot {
  pub fn get(&self, name: &str) -> Option<&Value> {
    self.0.get(name)
  }

  pub fn str_value(&self, name: &str) -> Option<&str> {
    self.get(name).and_then(Value::as_str)
  }

  pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
    self.0.insert(name.into(), value.into());
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.0.iter()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn field(source: Option<Source>, override_source: Option<Source>) -> Field {
    Field {
      value: "x".into(),
      source,
      override_source,
    }
  }

  #[test]
  fn test_unset_field_accepts_anything() {
    assert!(!priority_rejects(&field(None, None), Source::Base, None));
  }

  #[test]
  fn test_lower_source_rejected() {
    let f = field(Some(Source::Init), None);
    assert!(priority_rejects(&f, Source::Env, None));
    assert!(!priority_rejects(&f, Source::Init, None));
    assert!(!priority_rejects(&f, Source::Args, None));
  }

  #[test]
  fn test_override_pins_value() {
    let f = field(Some(Source::Env), Some(Source::Env));
    assert!(priority_rejects(&f, Source::Args, None));
    assert!(priority_rejects(&f, Source::Env, Some(Source::Env)));
    assert!(priority_rejects(&f, Source::Base, Some(Source::Args)));
    assert!(!priority_rejects(&f, Source::Init, Some(Source::Init)));
  }

  #[test]
  fn test_override_update_on_plain_field() {
    let f = field(Some(Source::Init), None);
    // an override tag lifts the plain lower-source check
    assert!(!priority_rejects(&f, Source::Env, Some(Source::Env)));
  }

  #[test]
  fn test_set_unknown_field() {
    let mut store = SettingsStore::new();
    let err = store.set("no_such_field", "x").unwrap_err();
    assert!(matches!(err, SettingsError::UnknownField { .. }));
  }

  #[test]
  fn test_set_validates() {
    let mut store = SettingsStore::new();
    let err = store.set("mode", "sideways").unwrap_err();
    assert!(matches!(err, SettingsError::Validation { ref field, .. } if field == "mode"));
    store.set("mode", "offline").unwrap();
    assert_eq!(store.str_value("mode"), Some("offline"));
  }

  #[test]
  fn test_frozen_rejects_mutation() {
    let mut store = SettingsStore::new();
    store.freeze();
    assert!(store.is_frozen());
    assert!(matches!(store.set("project", "p"), Err(SettingsError::Frozen)));
    assert!(matches!(
      store.update([("project", Value::from("p"))], Source::Args, None),
      Err(SettingsError::Frozen)
    ));
    assert!(matches!(
      store.set_defaults([("project", Value::from("p"))]),
      Err(SettingsError::Frozen)
    ));
    // an empty update has nothing to mutate
    store.update(Vec::<(String, Value)>::new(), Source::Args, None).unwrap();
  }

  #[test]
  fn test_defaults_applied_at_base() {
    let store = SettingsStore::new();
    assert_eq!(store.str_value("mode"), Some("online"));
    assert_eq!(store.source_of("mode"), Some(Source::Base));
    assert_eq!(store.value("summary_warnings"), Some(&Value::Int(5)));
    assert!(store.value("run_id").is_none());
  }

  #[test]
  fn test_get_unknown() {
    let store = SettingsStore::new();
    assert!(store.get("bogus").is_err());
    assert_eq!(store.get("project").unwrap(), None);
  }

  #[test]
  fn test_snapshot_skips_unset() {
    let mut store = SettingsStore::new();
    store.set("project", "vision").unwrap();
    let snapshot = store.snapshot();
    assert_eq!(snapshot.str_value("project"), Some("vision"));
    assert!(snapshot.get("entity").is_none());
    assert_eq!(snapshot.get("_internal_check_process"), Some(&Value::Int(8)));
  }
}
