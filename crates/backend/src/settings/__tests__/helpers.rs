//! Fixtures for settings resolution tests.

use tempfile::TempDir;

use crate::{
  notice::{Notice, Notices},
  settings::{HostEnvironment, SettingsMap, SettingsMerger, SettingsRequest, SettingsStore, Value},
};

/// A scratch working directory plus a host rooted in it.
pub struct SettingsTestContext {
  pub root: TempDir,
  pub host: HostEnvironment,
}

impl SettingsTestContext {
  pub fn new() -> Self {
    let root = TempDir::new().expect("create root temp dir");
    let host = HostEnvironment {
      cwd: Some(root.path().to_path_buf()),
      hostname: Some("testhost".into()),
      username: Some("tester".into()),
      os: "test-os".into(),
      ..Default::default()
    };
    Self { root, host }
  }

  pub fn with_env(mut self, name: &str, value: &str) -> Self {
    self.host.vars.insert(name.to_string(), value.to_string());
    self
  }

  pub fn request(&self) -> SettingsRequest {
    SettingsRequest::new().with_host(self.host.clone())
  }

  pub fn resolve(&self, request: SettingsRequest) -> SettingsStore {
    SettingsMerger::resolve(request).expect("resolve settings")
  }

  /// Resolves and collects every notice emitted along the way.
  pub fn resolve_with_notices(&self, request: SettingsRequest) -> (SettingsStore, Vec<Notice>) {
    let (notices, mut rx) = Notices::channel();
    let store = self.resolve(request.with_notices(notices));
    let mut seen = Vec::new();
    while let Ok(notice) = rx.try_recv() {
      seen.push(notice);
    }
    (store, seen)
  }
}

pub fn map(pairs: &[(&str, Value)]) -> SettingsMap {
  pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}
