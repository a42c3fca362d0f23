//! Store-level properties that cut across modules.

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use crate::settings::{SettingsError, SettingsStore, Source, Value};

  fn permutations(items: &[Source]) -> Vec<Vec<Source>> {
    if items.len() <= 1 {
      return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
      let mut rest = items.to_vec();
      let head = rest.remove(i);
      for mut tail in permutations(&rest) {
        tail.insert(0, head);
        out.push(tail);
      }
    }
    out
  }

  #[test]
  fn test_highest_source_wins_in_any_order() {
    let sources = [Source::Env, Source::Workspace, Source::Init, Source::Setup];
    for order in permutations(&sources) {
      let mut store = SettingsStore::new();
      for source in &order {
        store
          .update([("project", Value::from(source.to_string()))], *source, None)
          .unwrap();
      }
      assert_eq!(store.str_value("project"), Some("init"), "order {order:?}");
      assert_eq!(store.source_of("project"), Some(Source::Init));
    }
  }

  #[test]
  fn test_equal_source_replaces() {
    let mut store = SettingsStore::new();
    store.update([("entity", Value::from("a"))], Source::Env, None).unwrap();
    store.update([("entity", Value::from("b"))], Source::Env, None).unwrap();
    assert_eq!(store.str_value("entity"), Some("b"));
  }

  #[test]
  fn test_same_batch_last_write_wins() {
    let mut store = SettingsStore::new();
    store
      .update(
        [("entity", Value::from("first")), ("entity", Value::from("second"))],
        Source::Init,
        None,
      )
      .unwrap();
    assert_eq!(store.str_value("entity"), Some("second"));
  }

  #[test]
  fn test_override_survives_higher_sources() {
    let mut store = SettingsStore::new();
    store
      .update([("project", Value::from("pinned"))], Source::Env, Some(Source::Env))
      .unwrap();
    store.update([("project", Value::from("args"))], Source::Args, None).unwrap();
    assert_eq!(store.str_value("project"), Some("pinned"));
    assert_eq!(store.override_of("project"), Some(Source::Env));

    store
      .update([("project", Value::from("stronger"))], Source::Init, Some(Source::Init))
      .unwrap();
    assert_eq!(store.str_value("project"), Some("stronger"));
  }

  #[test]
  fn test_unknown_key_aborts_whole_update() {
    let mut store = SettingsStore::new();
    let err = store
      .update(
        [("project", Value::from("p")), ("bogus", Value::from("x"))],
        Source::Args,
        None,
      )
      .unwrap_err();
    assert!(matches!(err, SettingsError::UnknownField { ref name } if name == "bogus"));
    assert!(store.value("project").is_none());
    assert!(store.audit_sources("project").is_empty());
  }

  #[test]
  fn test_invalid_value_skipped_siblings_applied() {
    let mut store = SettingsStore::new();
    let err = store
      .update(
        [
          ("mode", Value::from("sideways")),
          ("project", Value::from("p")),
          ("console", Value::from("loud")),
        ],
        Source::Init,
        None,
      )
      .unwrap_err();
    assert!(matches!(err, SettingsError::Validation { ref field, .. } if field == "mode"));
    assert_eq!(store.str_value("project"), Some("p"));
    assert_eq!(store.str_value("mode"), Some("online"));
    assert_eq!(store.str_value("console"), Some("auto"));
  }

  #[test]
  fn test_audit_records_rejected_attempts() {
    let mut store = SettingsStore::new();
    store.update([("entity", Value::from("high"))], Source::Init, None).unwrap();
    store.update([("entity", Value::from("low"))], Source::Env, None).unwrap();
    store
      .update([("entity", Value::from("tagged"))], Source::Base, Some(Source::Org))
      .unwrap();
    assert_eq!(
      store.audit_sources("entity").into_iter().collect::<Vec<_>>(),
      vec![Source::Base, Source::Env, Source::Init]
    );
    assert_eq!(
      store.audit_overrides("entity").into_iter().collect::<Vec<_>>(),
      vec![Source::Org]
    );
  }

  #[test]
  fn test_none_values_are_skipped() {
    let mut store = SettingsStore::new();
    store.update([("project", Value::from("p"))], Source::Env, None).unwrap();
    store.update([("project", Value::None)], Source::Args, None).unwrap();
    assert_eq!(store.str_value("project"), Some("p"));
    assert!(!store.audit_sources("project").contains(&Source::Args));
  }

  #[test]
  fn test_lists_stored_as_tuples() {
    let mut store = SettingsStore::new();
    store
      .update([("run_tags", Value::from(vec!["a", "b"]))], Source::Init, None)
      .unwrap();
    let tags = store.value("run_tags").unwrap();
    assert!(matches!(tags, Value::Tuple(_)));
    assert_eq!(tags.as_slice().map(<[Value]>::len), Some(2));
  }

  #[test]
  fn test_duplicate_reapplies_at_base() {
    let mut store = SettingsStore::new();
    store.update([("project", Value::from("orig"))], Source::Args, None).unwrap();
    store.start_run();
    store.freeze();

    let mut copy = store.duplicate();
    assert!(!copy.is_frozen());
    assert_eq!(copy.str_value("project"), Some("orig"));
    assert_eq!(copy.source_of("project"), Some(Source::Base));
    assert_eq!(copy.started_at(), store.started_at());

    copy.update([("project", Value::from("later"))], Source::Env, None).unwrap();
    assert_eq!(copy.str_value("project"), Some("later"));
    assert_eq!(store.str_value("project"), Some("orig"));
  }

  #[test]
  fn test_set_defaults_fills_only_absent_public() {
    let mut store = SettingsStore::new();
    store
      .set_defaults([
        ("mode", Value::from("offline")),
        ("entity", Value::from("team")),
        ("_cuda", Value::from("12.0")),
      ])
      .unwrap();
    assert_eq!(store.str_value("mode"), Some("online"));
    assert_eq!(store.str_value("entity"), Some("team"));
    assert!(store.value("_cuda").is_none());
    assert!(matches!(
      store.set_defaults([("bogus", Value::from("x"))]),
      Err(SettingsError::UnknownField { .. })
    ));
  }

  #[test]
  fn test_keys_hide_private_and_list_computed() {
    let store = SettingsStore::new();
    let keys: Vec<_> = store.keys().collect();
    assert!(keys.contains(&"project"));
    assert!(keys.contains(&"stage_dir"));
    assert!(keys.contains(&"_offline"));
    assert!(!keys.contains(&"_cuda"));
    assert!(store.public_keys().all(|k| !k.starts_with('_')));
  }

  #[test]
  fn test_computed_names_cannot_be_set() {
    let mut store = SettingsStore::new();
    assert!(matches!(
      store.set("stage_dir", "/tmp/x"),
      Err(SettingsError::UnknownField { .. })
    ));
  }

  #[test]
  fn test_snapshot_serializes_as_map() {
    let mut store = SettingsStore::empty(crate::settings::Registry::standard());
    store.set("project", "p").unwrap();
    store.set("run_tags", vec!["a"]).unwrap();
    let json = serde_json::to_value(store.snapshot()).unwrap();
    assert_eq!(json, serde_json::json!({"project": "p", "run_tags": ["a"]}));
  }
}
