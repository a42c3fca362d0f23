//! User-facing advisories.
//!
//! Warnings that must reach the user without failing the call that produced
//! them (resume id conflicts, ignored sweep arguments, unwritable directories)
//! go through a `Notices` sink. Sending never blocks; every notice is also
//! logged.

use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeLevel {
  Info,
  Warn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
  pub level: NoticeLevel,
  pub message: String,
}

/// Cheap to clone; a sink without a receiver only logs.
#[derive(Debug, Clone, Default)]
pub struct Notices {
  tx: Option<mpsc::UnboundedSender<Notice>>,
}

impl Notices {
  /// Sink that only logs.
  pub fn log_only() -> Self {
    Self { tx: None }
  }

  /// Sink paired with a receiver for the caller's UI.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx: Some(tx) }, rx)
  }

  pub fn warn(&self, message: impl Into<String>) {
    let message = message.into();
    warn!("{}", message);
    self.emit(Notice {
      level: NoticeLevel::Warn,
      message,
    });
  }

  pub fn info(&self, message: impl Into<String>) {
    let message = message.into();
    tracing::info!("{}", message);
    self.emit(Notice {
      level: NoticeLevel::Info,
      message,
    });
  }

  fn emit(&self, notice: Notice) {
    if let Some(tx) = &self.tx {
      // receiver may be gone; advisories are best-effort
      let _ = tx.send(notice);
    }
  }
}
