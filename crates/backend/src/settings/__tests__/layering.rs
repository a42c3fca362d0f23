//! End-to-end layering through `SettingsMerger::resolve`.

#[cfg(test)]
mod tests {
  use crate::{
    notice::NoticeLevel,
    settings::{SettingsError, Source, Value, __tests__::helpers::{SettingsTestContext, map}},
  };

  // ==========================================================================
  // Layer precedence
  // ==========================================================================

  #[test]
  fn test_env_overrides_defaults() {
    let ctx = SettingsTestContext::new().with_env("RUNTRACE_MODE", "offline");
    let store = ctx.resolve(ctx.request());
    assert_eq!(store.str_value("mode"), Some("offline"));
    assert_eq!(store.source_of("mode"), Some(Source::Env));
    assert!(store.offline());
  }

  #[test]
  fn test_init_beats_env_and_args_beat_init() {
    let ctx = SettingsTestContext::new().with_env("RUNTRACE_PROJECT", "from-env");
    let store = ctx.resolve(ctx.request().with_init(map(&[("project", "from-init".into())])));
    assert_eq!(store.str_value("project"), Some("from-init"));

    let store = ctx.resolve(
      ctx
        .request()
        .with_init(map(&[("project", "from-init".into())]))
        .with_args(map(&[("project", "from-args".into())])),
    );
    assert_eq!(store.str_value("project"), Some("from-args"));
    assert_eq!(store.source_of("project"), Some(Source::Settings));
  }

  #[test]
  fn test_workspace_file_below_env() {
    let ctx = SettingsTestContext::new();
    let stage = ctx.root.path().join("runtrace");
    std::fs::create_dir_all(&stage).unwrap();
    std::fs::write(stage.join("settings"), "[default]\nproject = from-file\nentity = team\n").unwrap();

    let store = ctx.resolve(ctx.request().with_files());
    assert_eq!(store.str_value("project"), Some("from-file"));
    assert_eq!(store.source_of("project"), Some(Source::Workspace));

    let ctx = SettingsTestContext {
      root: ctx.root,
      host: ctx.host,
    }
    .with_env("RUNTRACE_PROJECT", "from-env");
    let store = ctx.resolve(ctx.request().with_files());
    assert_eq!(store.str_value("project"), Some("from-env"));
    assert_eq!(store.str_value("entity"), Some("team"));
  }

  #[test]
  fn test_root_dir_from_cwd_unless_given() {
    let ctx = SettingsTestContext::new();
    let store = ctx.resolve(ctx.request());
    let expected = ctx.root.path().to_string_lossy().into_owned();
    assert_eq!(store.str_value("root_dir"), Some(expected.as_str()));

    let other = tempfile::TempDir::new().unwrap();
    let dir = other.path().to_string_lossy().into_owned();
    let store = ctx.resolve(ctx.request().with_init(map(&[("dir", dir.clone().into())])));
    assert_eq!(store.str_value("root_dir"), Some(dir.as_str()));
  }

  #[test]
  fn test_user_layer_below_init() {
    let ctx = SettingsTestContext::new();
    let mut user = crate::settings::SettingsStore::empty(crate::settings::Registry::standard());
    user.set("project", "from-user").unwrap();
    user.set("entity", "user-team").unwrap();
    let mut request = ctx.request().with_init(map(&[("project", "from-init".into())]));
    request.user = Some(user.snapshot());
    let store = ctx.resolve(request);
    assert_eq!(store.str_value("project"), Some("from-init"));
    assert_eq!(store.str_value("entity"), Some("user-team"));
    assert_eq!(store.source_of("entity"), Some(Source::User));
  }

  #[test]
  fn test_invalid_env_value_fails_resolution() {
    let ctx = SettingsTestContext::new().with_env("RUNTRACE_MODE", "sideways");
    let err = crate::settings::SettingsMerger::resolve(ctx.request()).unwrap_err();
    assert!(matches!(err, SettingsError::Validation { ref field, .. } if field == "mode"));
  }

  // ==========================================================================
  // Run ids and resume
  // ==========================================================================

  #[test]
  fn test_run_id_generated_for_init() {
    let ctx = SettingsTestContext::new();
    let store = ctx.resolve(ctx.request().with_init(map(&[("project", "p".into())])));
    let id = store.str_value("run_id").unwrap();
    assert_eq!(id.len(), 8);
  }

  #[test]
  fn test_resume_string_becomes_run_id() {
    let ctx = SettingsTestContext::new();
    let store = ctx.resolve(ctx.request().with_init(map(&[("resume", "abc123".into())])));
    assert_eq!(store.str_value("run_id"), Some("abc123"));
    assert_eq!(store.str_value("resume"), Some("allow"));
  }

  #[test]
  fn test_resume_string_keeps_given_id() {
    let ctx = SettingsTestContext::new();
    let store = ctx.resolve(
      ctx
        .request()
        .with_init(map(&[("id", "given".into()), ("resume", "xyz".into())])),
    );
    assert_eq!(store.str_value("run_id"), Some("given"));
    assert_eq!(store.str_value("resume"), Some("allow"));
  }

  #[test]
  fn test_auto_resume_adopts_marker() {
    let ctx = SettingsTestContext::new();
    let stage = ctx.root.path().join("runtrace");
    std::fs::create_dir_all(&stage).unwrap();
    std::fs::write(stage.join("runtrace-resume.json"), r#"{"run_id": "old123"}"#).unwrap();

    let store = ctx.resolve(ctx.request().with_init(map(&[("resume", true.into())])));
    assert_eq!(store.str_value("resume"), Some("auto"));
    assert_eq!(store.str_value("run_id"), Some("old123"));
  }

  #[test]
  fn test_auto_resume_conflict_warns_and_persists() {
    let ctx = SettingsTestContext::new();
    let stage = ctx.root.path().join("runtrace");
    std::fs::create_dir_all(&stage).unwrap();
    let marker = stage.join("runtrace-resume.json");
    std::fs::write(&marker, r#"{"run_id": "old123"}"#).unwrap();

    let (store, notices) = ctx.resolve_with_notices(
      ctx
        .request()
        .with_init(map(&[("id", "new456".into()), ("resume", "auto".into())])),
    );
    assert_eq!(store.str_value("run_id"), Some("new456"));
    assert!(
      notices
        .iter()
        .any(|n| n.level == NoticeLevel::Warn && n.message.contains("old123") && n.message.contains("new456"))
    );
    let written = std::fs::read_to_string(&marker).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(parsed["run_id"], "new456");
  }

  #[test]
  fn test_auto_resume_creates_marker() {
    let ctx = SettingsTestContext::new();
    let store = ctx.resolve(ctx.request().with_init(map(&[("resume", "auto".into())])));
    let marker = ctx.root.path().join("runtrace").join("runtrace-resume.json");
    let written = std::fs::read_to_string(marker).unwrap();
    assert!(written.contains(store.str_value("run_id").unwrap()));
  }

  #[test]
  fn test_corrupt_marker_is_ignored() {
    let ctx = SettingsTestContext::new();
    let stage = ctx.root.path().join("runtrace");
    std::fs::create_dir_all(&stage).unwrap();
    std::fs::write(stage.join("runtrace-resume.json"), "not json").unwrap();
    let store = ctx.resolve(ctx.request().with_init(map(&[("resume", "auto".into())])));
    assert_eq!(store.str_value("run_id").map(str::len), Some(8));
  }

  // ==========================================================================
  // Sweeps
  // ==========================================================================

  #[test]
  fn test_sweep_drops_locked_init_args() {
    let ctx = SettingsTestContext::new().with_env("RUNTRACE_SWEEP_ID", "sw1");
    let (store, notices) = ctx.resolve_with_notices(ctx.request().with_init(map(&[
      ("project", "mine".into()),
      ("id", "myid".into()),
      ("notes", "kept".into()),
    ])));
    assert!(store.value("project").is_none());
    assert_ne!(store.str_value("run_id"), Some("myid"));
    assert_eq!(store.str_value("run_notes"), Some("kept"));
    let ignored: Vec<_> = notices.iter().filter(|n| n.message.contains("sweep")).collect();
    assert_eq!(ignored.len(), 2);
  }

  // ==========================================================================
  // Freezing
  // ==========================================================================

  #[test]
  fn test_resolve_frozen() {
    let ctx = SettingsTestContext::new();
    let mut store = ctx.resolve(ctx.request().frozen());
    assert!(store.is_frozen());
    assert!(matches!(store.set("project", "late"), Err(SettingsError::Frozen)));
    let copy = store.duplicate();
    assert!(!copy.is_frozen());
    assert_eq!(copy.value("host"), Some(&Value::from("testhost")));
  }
}
