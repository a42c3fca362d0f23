//! Provenance tags used to arbitrate between competing setting values.

use serde::{Deserialize, Serialize};

/// Where a setting value came from.
///
/// Variants are ordered by priority: a later variant outranks an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Source {
  Base = 1,
  Org = 2,
  Entity = 3,
  Project = 4,
  User = 5,
  System = 6,
  Workspace = 7,
  Env = 8,
  Setup = 9,
  Login = 10,
  Init = 11,
  Settings = 12,
  Args = 13,
}

impl Source {
  pub const ALL: [Source; 13] = [
    Source::Base,
    Source::Org,
    Source::Entity,
    Source::Project,
    Source::User,
    Source::System,
    Source::Workspace,
    Source::Env,
    Source::Setup,
    Source::Login,
    Source::Init,
    Source::Settings,
    Source::Args,
  ];

  /// Numeric priority, higher wins.
  pub fn priority(self) -> u8 {
    self as u8
  }
}

impl std::fmt::Display for Source {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Source::Base => "base",
      Source::Org => "org",
      Source::Entity => "entity",
      Source::Project => "project",
      Source::User => "user",
      Source::System => "system",
      Source::Workspace => "workspace",
      Source::Env => "env",
      Source::Setup => "setup",
      Source::Login => "login",
      Source::Init => "init",
      Source::Settings => "settings",
      Source::Args => "args",
    };
    f.write_str(name)
  }
}
