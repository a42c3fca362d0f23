use std::{
  sync::atomic::{AtomicU64, Ordering},
  time::Duration,
};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{IpcError, Record, RecordData, RecordResult};

/// Caller side of a worker channel: records out, results in.
///
/// Every launch mode hands one of these back, whatever carries the bytes.
/// Both directions are unbounded, so a caller that never reads results can
/// still publish and shut down.
#[derive(Debug)]
pub struct WorkerInterface {
  record_tx: Option<mpsc::UnboundedSender<Record>>,
  result_rx: mpsc::UnboundedReceiver<RecordResult>,
  counter: AtomicU64,
}

/// Worker side of a worker channel: records in, results out.
#[derive(Debug)]
pub struct WorkerEndpoint {
  pub records: mpsc::UnboundedReceiver<Record>,
  pub results: mpsc::UnboundedSender<RecordResult>,
}

/// A connected interface/endpoint pair.
pub fn channel_pair() -> (WorkerInterface, WorkerEndpoint) {
  let (record_tx, records) = mpsc::unbounded_channel();
  let (results, result_rx) = mpsc::unbounded_channel();
  let interface = WorkerInterface {
    record_tx: Some(record_tx),
    result_rx,
    counter: AtomicU64::new(0),
  };
  (interface, WorkerEndpoint { records, results })
}

impl WorkerInterface {
  /// Queues a record; returns its number.
  pub async fn send(&self, data: RecordData) -> Result<u64, IpcError> {
    let tx = self.record_tx.as_ref().ok_or(IpcError::Closed)?;
    let num = self.counter.fetch_add(1, Ordering::Relaxed);
    trace!(num, kind = data.kind(), "sending record");
    tx.send(Record { num, data }).map_err(|_| IpcError::Closed)?;
    Ok(num)
  }

  pub async fn publish(&self, payload: serde_json::Value) -> Result<u64, IpcError> {
    self.send(RecordData::Payload(payload)).await
  }

  /// Next result, or `None` once the worker side is gone.
  pub async fn recv(&mut self) -> Option<RecordResult> {
    self.result_rx.recv().await
  }

  pub async fn recv_timeout(&mut self, timeout: Duration, waiting_for: &str) -> Result<RecordResult, IpcError> {
    match tokio::time::timeout(timeout, self.result_rx.recv()).await {
      Ok(Some(result)) => Ok(result),
      Ok(None) => Err(IpcError::Closed),
      Err(_) => Err(IpcError::Timeout(waiting_for.to_string())),
    }
  }

  /// Sends `data` and waits for the result answering it. Results for other
  /// records that arrive first are discarded.
  pub async fn request(&mut self, data: RecordData, timeout: Duration) -> Result<RecordResult, IpcError> {
    let kind = data.kind();
    let num = self.send(data).await?;
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
      let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
      let result = self.recv_timeout(remaining, kind).await?;
      if result.num == num {
        return Ok(result);
      }
      debug!(num = result.num, "skipping result for an earlier record");
    }
  }

  /// Closes the outbound direction. The worker sees end-of-stream once it has
  /// drained what was already queued.
  pub fn finish(&mut self) {
    if self.record_tx.take().is_some() {
      debug!("record channel closed");
    }
  }

  pub fn is_finished(&self) -> bool {
    self.record_tx.is_none()
  }

  /// Closes the inbound direction and drops anything still buffered.
  pub fn close(&mut self) {
    self.finish();
    self.result_rx.close();
    while self.result_rx.try_recv().is_ok() {}
  }
}
