//! INI settings files (`[default]` section only).

use std::path::Path;

use ini::Ini;
use tracing::{debug, warn};

use super::{SettingsMap, SettingsStore, Value};

const SECTION: &str = "default";

impl SettingsStore {
  /// Reads the `[default]` section of an INI file.
  ///
  /// A missing or unreadable file yields an empty map. Keys the registry does
  /// not declare are dropped with a warning so one stray line cannot void the
  /// whole file.
  pub fn load_from_key_value_file(&self, path: &Path) -> SettingsMap {
    if !path.exists() {
      debug!(path = %path.display(), "settings file not present");
      return SettingsMap::new();
    }
    let ini = match Ini::load_from_file(path) {
      Ok(ini) => ini,
      Err(e) => {
        warn!(path = %path.display(), "unreadable settings file: {}", e);
        return SettingsMap::new();
      }
    };
    let Some(section) = ini.section(Some(SECTION)) else {
      return SettingsMap::new();
    };

    let mut values = SettingsMap::new();
    for (key, raw) in section.iter() {
      if !self.registry().contains(key) {
        warn!(path = %path.display(), key, "ignoring unknown settings key");
        continue;
      }
      let value = match key {
        "ignore_globs" => Value::comma_list(raw),
        _ => Value::from(raw),
      };
      values.push((key.to_string(), value));
    }
    values
  }
}
