//! IPC module - record/result envelopes and the worker channel abstraction
use serde::{Deserialize, Serialize};

use crate::settings::SettingsSnapshot;

pub mod codec;
pub mod interface;

pub use interface::{WorkerEndpoint, WorkerInterface, channel_pair};

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum IpcError {
  #[error("Ser/de error: {0}")]
  Serde(String),
  #[error("IO error: {0}")]
  Io(String),
  #[error("Channel closed")]
  Closed,
  #[error("Timed out waiting for {0}")]
  Timeout(String),
  #[error("Unexpected result: {0}")]
  Unexpected(String),
  #[error("Codec error: {0}")]
  Codec(String),
}

impl From<serde_json::Error> for IpcError {
  fn from(err: serde_json::Error) -> Self {
    IpcError::Serde(err.to_string())
  }
}

impl From<std::io::Error> for IpcError {
  fn from(err: std::io::Error) -> Self {
    IpcError::Io(err.to_string())
  }
}

impl From<tokio_util::codec::LinesCodecError> for IpcError {
  fn from(err: tokio_util::codec::LinesCodecError) -> Self {
    IpcError::Codec(err.to_string())
  }
}

// ============================================================================
// Record envelope (caller -> worker)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
  pub num: u64,
  #[serde(flatten)]
  pub data: RecordData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "record", content = "data")]
pub enum RecordData {
  /// Settings hand-off; always the first record on a byte transport.
  Settings(SettingsSnapshot),
  Payload(serde_json::Value),
  Exit,
}

impl RecordData {
  pub fn kind(&self) -> &'static str {
    match self {
      RecordData::Settings(_) => "settings",
      RecordData::Payload(_) => "payload",
      RecordData::Exit => "exit",
    }
  }
}

// ============================================================================
// Result envelope (worker -> caller)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordResult {
  /// Number of the record this answers.
  pub num: u64,
  #[serde(flatten)]
  pub data: ResultData,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "data")]
pub enum ResultData {
  Ready { pid: u32, version: Option<String> },
  Ack,
  ExitAck,
  Error { message: String },
}

impl RecordResult {
  pub fn ready(num: u64) -> Self {
    Self {
      num,
      data: ResultData::Ready {
        pid: std::process::id(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
      },
    }
  }

  pub fn ack(num: u64) -> Self {
    Self { num, data: ResultData::Ack }
  }

  pub fn exit_ack(num: u64) -> Self {
    Self {
      num,
      data: ResultData::ExitAck,
    }
  }

  pub fn error(num: u64, message: impl Into<String>) -> Self {
    Self {
      num,
      data: ResultData::Error {
        message: message.into(),
      },
    }
  }

  pub fn is_ready(&self) -> bool {
    matches!(self.data, ResultData::Ready { .. })
  }

  pub fn is_exit_ack(&self) -> bool {
    matches!(self.data, ResultData::ExitAck)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_record_wire_shape() {
    let record = Record {
      num: 3,
      data: RecordData::Payload(serde_json::json!({"loss": 0.5})),
    };
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(
      json,
      serde_json::json!({"num": 3, "record": "payload", "data": {"loss": 0.5}})
    );

    let exit: Record = serde_json::from_str(r#"{"num": 9, "record": "exit"}"#).unwrap();
    assert!(matches!(exit.data, RecordData::Exit));
  }

  #[test]
  fn test_ready_omits_missing_version() {
    let result = RecordResult {
      num: 0,
      data: ResultData::Ready { pid: 7, version: None },
    };
    let line = serde_json::to_string(&result).unwrap();
    assert!(!line.contains("version"));
    let back: RecordResult = serde_json::from_str(&line).unwrap();
    assert_eq!(back, result);
  }
}
