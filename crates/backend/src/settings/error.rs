//! Settings errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
  /// The name was never declared in the field registry.
  #[error("unknown settings field: {name}")]
  UnknownField { name: String },

  /// A field's validator rejected the value.
  #[error("settings field {field}: {reason}")]
  Validation { field: String, reason: String },

  /// Mutation attempted after `freeze()`.
  #[error("settings object is frozen")]
  Frozen,

  #[error("failed to write {}: {source}", path.display())]
  Persist {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl SettingsError {
  pub fn unknown(name: impl Into<String>) -> Self {
    Self::UnknownField { name: name.into() }
  }

  pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::Validation {
      field: field.into(),
      reason: reason.into(),
    }
  }

  pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Persist {
      path: path.into(),
      source,
    }
  }
}
