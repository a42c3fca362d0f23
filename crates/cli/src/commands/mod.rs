//! CLI command implementations

mod run;
mod settings;
mod worker;

pub use run::cmd_run;
pub use settings::cmd_settings;
pub use worker::{cmd_worker, cmd_worker_server};

use anyhow::{Result, bail};
use runtrace::{Value, settings::SettingsMap};

/// Parses repeated `KEY=VALUE` arguments in order.
pub(crate) fn parse_assignments(raw: &[String]) -> Result<SettingsMap> {
  raw
    .iter()
    .map(|item| {
      let Some((key, value)) = item.split_once('=') else {
        bail!("expected KEY=VALUE, got {item:?}");
      };
      let key = key.trim();
      if key.is_empty() {
        bail!("empty setting name in {item:?}");
      }
      Ok((key.to_string(), Value::from(value)))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_assignments_keeps_order() {
    let parsed = parse_assignments(&["project=a".into(), "entity=b=c".into(), "project=d".into()]).unwrap();
    let keys: Vec<_> = parsed.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, ["project", "entity", "project"]);
    assert_eq!(parsed[1].1.as_str(), Some("b=c"));
  }

  #[test]
  fn test_parse_assignments_rejects_bare_words() {
    assert!(parse_assignments(&["project".into()]).is_err());
    assert!(parse_assignments(&["=x".into()]).is_err());
  }
}
