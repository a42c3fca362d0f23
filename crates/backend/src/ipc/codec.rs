//! Newline-delimited JSON pumps between byte transports and channels.

use futures::{SinkExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use tokio::{
  io::{AsyncRead, AsyncWrite},
  sync::mpsc,
  task::JoinHandle,
};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error, warn};

use super::{IpcError, Record, RecordResult, WorkerEndpoint, WorkerInterface, channel_pair};

/// Forwards each message from `rx` as one JSON line. Ends when `rx` closes or
/// the transport fails; the writer is dropped on exit, closing the stream.
pub fn spawn_writer<M, W>(mut rx: mpsc::UnboundedReceiver<M>, writer: W) -> JoinHandle<Result<(), IpcError>>
where
  M: Serialize + Send + 'static,
  W: AsyncWrite + Unpin + Send + 'static,
{
  tokio::spawn(async move {
    let mut sink = FramedWrite::new(writer, LinesCodec::new());
    while let Some(message) = rx.recv().await {
      let line = serde_json::to_string(&message)?;
      if let Err(e) = sink.send(line).await {
        error!("failed to write line: {e}");
        return Err(e.into());
      }
    }
    SinkExt::<String>::close(&mut sink).await?;
    debug!("writer pump finished");
    Ok(())
  })
}

/// Parses each JSON line from `reader` into `tx`. Unparseable lines are
/// logged and skipped. Ends at end-of-stream or when `tx` has no receiver.
pub fn spawn_reader<M, R>(reader: R, tx: mpsc::UnboundedSender<M>) -> JoinHandle<Result<(), IpcError>>
where
  M: DeserializeOwned + Send + 'static,
  R: AsyncRead + Unpin + Send + 'static,
{
  tokio::spawn(async move {
    let mut stream = FramedRead::new(reader, LinesCodec::new());
    while let Some(line) = stream.next().await {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }
      match serde_json::from_str::<M>(&line) {
        Ok(message) => {
          if tx.send(message).is_err() {
            debug!("reader pump receiver dropped");
            break;
          }
        }
        Err(e) => warn!("skipping malformed line: {e}"),
      }
    }
    debug!("reader pump finished");
    Ok(())
  })
}

/// Pump tasks bridging a byte transport to a channel pair.
#[derive(Debug)]
pub struct Bridge {
  pub reader: JoinHandle<Result<(), IpcError>>,
  pub writer: JoinHandle<Result<(), IpcError>>,
}

impl Bridge {
  pub fn abort(&self) {
    self.reader.abort();
    self.writer.abort();
  }
}

/// Caller side: records are written to `writer`, results read from `reader`.
pub fn bridge_caller<R, W>(reader: R, writer: W) -> (WorkerInterface, Bridge)
where
  R: AsyncRead + Unpin + Send + 'static,
  W: AsyncWrite + Unpin + Send + 'static,
{
  let (interface, endpoint) = channel_pair();
  let WorkerEndpoint { records, results } = endpoint;
  let bridge = Bridge {
    writer: spawn_writer::<Record, _>(records, writer),
    reader: spawn_reader::<RecordResult, _>(reader, results),
  };
  (interface, bridge)
}

/// Worker side: records are read from `reader`, results written to `writer`.
pub fn bridge_worker<R, W>(reader: R, writer: W) -> (WorkerEndpoint, Bridge)
where
  R: AsyncRead + Unpin + Send + 'static,
  W: AsyncWrite + Unpin + Send + 'static,
{
  let (record_tx, records) = mpsc::unbounded_channel();
  let (results, result_rx) = mpsc::unbounded_channel();
  let bridge = Bridge {
    reader: spawn_reader::<Record, _>(reader, record_tx),
    writer: spawn_writer::<RecordResult, _>(result_rx, writer),
  };
  (WorkerEndpoint { records, results }, bridge)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ipc::{RecordData, ResultData};

  #[tokio::test]
  async fn test_bridges_talk_over_duplex() {
    let (caller_io, worker_io) = tokio::io::duplex(4096);
    let (caller_read, caller_write) = tokio::io::split(caller_io);
    let (worker_read, worker_write) = tokio::io::split(worker_io);

    let (mut interface, _caller_bridge) = bridge_caller(caller_read, caller_write);
    let (mut endpoint, _worker_bridge) = bridge_worker(worker_read, worker_write);

    interface.publish(serde_json::json!({"step": 1})).await.unwrap();
    let record = endpoint.records.recv().await.unwrap();
    assert!(matches!(record.data, RecordData::Payload(ref v) if v["step"] == 1));

    endpoint.results.send(RecordResult::ack(record.num)).unwrap();
    let result = interface.recv().await.unwrap();
    assert_eq!(result.data, ResultData::Ack);
  }

  #[tokio::test]
  async fn test_reader_skips_garbage() {
    let input: &[u8] = b"not json\n{\"num\":1,\"result\":\"ack\"}\n";
    let (tx, mut rx) = mpsc::unbounded_channel::<RecordResult>();
    spawn_reader(input, tx).await.unwrap().unwrap();
    assert_eq!(rx.recv().await.unwrap().num, 1);
    assert!(rx.recv().await.is_none());
  }
}
