//! Settings command

use anyhow::{Context, Result};
use runtrace::{SettingsMerger, SettingsRequest, SettingsStore};
use serde_json::{Map, json};

/// Resolve settings and print them as a JSON object
pub async fn cmd_settings(set: &[String], init: bool, all: bool, sources: bool) -> Result<()> {
  let args = super::parse_assignments(set)?;
  let mut request = SettingsRequest::new().with_files().with_program().with_args(args);
  if init {
    request = request.with_init(Vec::new());
  }
  let store = SettingsMerger::resolve(request).context("Failed to resolve settings")?;
  let rendered = render(&store, all, sources);
  println!("{}", serde_json::to_string_pretty(&rendered)?);
  Ok(())
}

fn render(store: &SettingsStore, all: bool, sources: bool) -> Map<String, serde_json::Value> {
  let snapshot = store.snapshot();
  snapshot
    .iter()
    .filter(|(name, _)| all || !name.starts_with('_'))
    .map(|(name, value)| {
      let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
      let entry = if sources {
        json!({
          "value": value,
          "source": store.source_of(name).map(|s| s.to_string()),
        })
      } else {
        value
      };
      (name.clone(), entry)
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_render_hides_private_fields() {
    let mut store = SettingsStore::new();
    store.set("project", "vision").unwrap();
    let public = render(&store, false, false);
    assert_eq!(public.get("project"), Some(&json!("vision")));
    assert!(public.keys().all(|k| !k.starts_with('_')));

    let everything = render(&store, true, false);
    assert!(everything.contains_key("_internal_check_process"));
  }

  #[test]
  fn test_render_with_sources() {
    let mut store = SettingsStore::new();
    store
      .update([("project", "vision".into())], runtrace::Source::Init, None)
      .unwrap();
    let rendered = render(&store, false, true);
    assert_eq!(rendered["project"], json!({"value": "vision", "source": "init"}));
  }
}
