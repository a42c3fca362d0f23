//! Worker shutdown.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::{
  ipc::RecordData,
  launcher::{LaunchError, WorkerHandle},
};

/// Owns a [`WorkerHandle`] and tears it down exactly once.
#[derive(Debug)]
pub struct LifecycleSupervisor {
  handle: Mutex<WorkerHandle>,
  done: AtomicBool,
}

impl LifecycleSupervisor {
  pub fn new(handle: WorkerHandle) -> Self {
    Self {
      handle: Mutex::new(handle),
      done: AtomicBool::new(false),
    }
  }

  /// Exclusive access to the handle, e.g. to publish records.
  pub async fn handle(&self) -> MutexGuard<'_, WorkerHandle> {
    self.handle.lock().await
  }

  pub fn is_shut_down(&self) -> bool {
    self.done.load(Ordering::Acquire)
  }

  /// Sends `exit`, drains results, waits for the worker and closes the
  /// channels. Only the first call does anything.
  pub async fn shutdown(&self) -> Result<(), LaunchError> {
    if self.done.swap(true, Ordering::AcqRel) {
      debug!("shutdown already done");
      return Ok(());
    }
    let mut handle = self.handle.lock().await;
    let mode = handle.mode();
    info!(%mode, "shutting down worker");

    let interface = handle.interface_mut();
    if let Err(e) = interface.send(RecordData::Exit).await {
      // worker side already gone; joining still reaps it
      warn!("exit record not delivered: {e}");
    }
    interface.finish();

    let mut drained = 0usize;
    while let Some(result) = interface.recv().await {
      drained += 1;
      if result.is_exit_ack() {
        debug!(num = result.num, "worker acknowledged exit");
      }
    }
    debug!(drained, "result channel drained");

    let joined = handle.join().await;
    handle.close();
    joined
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  use super::*;
  use crate::{
    ipc::RecordResult,
    launcher::{LaunchConfig, WorkerLauncher},
    settings::SettingsStore,
  };

  fn counting_launcher(exits: Arc<AtomicUsize>) -> WorkerLauncher {
    WorkerLauncher::new(LaunchConfig {
      worker_fn: Arc::new(move |_snapshot, mut endpoint| {
        while let Some(record) = endpoint.records.blocking_recv() {
          match record.data {
            RecordData::Exit => {
              exits.fetch_add(1, Ordering::SeqCst);
              let _ = endpoint.results.send(RecordResult::exit_ack(record.num));
            }
            _ => {
              let _ = endpoint.results.send(RecordResult::ack(record.num));
            }
          }
        }
      }),
      ..Default::default()
    })
  }

  fn thread_settings() -> SettingsStore {
    let mut settings = SettingsStore::new();
    settings.set("start_method", "thread").unwrap();
    settings
  }

  #[tokio::test]
  async fn test_shutdown_is_idempotent() {
    let exits = Arc::new(AtomicUsize::new(0));
    let handle = counting_launcher(Arc::clone(&exits))
      .launch(&thread_settings())
      .await
      .unwrap();
    let supervisor = LifecycleSupervisor::new(handle);
    assert!(supervisor.handle().await.is_alive());

    supervisor.shutdown().await.unwrap();
    supervisor.shutdown().await.unwrap();
    supervisor.shutdown().await.unwrap();

    assert_eq!(exits.load(Ordering::SeqCst), 1);
    assert!(supervisor.is_shut_down());
    assert!(!supervisor.handle().await.is_alive());
  }

  #[tokio::test]
  async fn test_concurrent_shutdown_runs_once() {
    let exits = Arc::new(AtomicUsize::new(0));
    let handle = counting_launcher(Arc::clone(&exits))
      .launch(&thread_settings())
      .await
      .unwrap();
    let supervisor = Arc::new(LifecycleSupervisor::new(handle));
    let calls: Vec<_> = (0..4)
      .map(|_| {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.shutdown().await })
      })
      .collect();
    for call in calls {
      call.await.unwrap().unwrap();
    }
    assert!(!supervisor.handle().await.is_alive());
    assert_eq!(exits.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_unread_results_do_not_block_shutdown() {
    let handle = WorkerLauncher::default().launch(&thread_settings()).await.unwrap();
    let supervisor = LifecycleSupervisor::new(handle);
    let published = tokio::time::timeout(std::time::Duration::from_secs(5), async {
      let handle = supervisor.handle().await;
      for i in 0..1000 {
        handle.interface().publish(serde_json::json!(i)).await.unwrap();
      }
    })
    .await;
    assert!(published.is_ok(), "publishing stalled with unread results");

    tokio::time::timeout(std::time::Duration::from_secs(5), supervisor.shutdown())
      .await
      .expect("shutdown stalled")
      .unwrap();
    assert!(supervisor.is_shut_down());
  }

  #[tokio::test]
  async fn test_shutdown_after_worker_finished() {
    let handle = WorkerLauncher::default().launch(&thread_settings()).await.unwrap();
    let supervisor = LifecycleSupervisor::new(handle);
    {
      let mut handle = supervisor.handle().await;
      handle
        .interface_mut()
        .request(RecordData::Exit, std::time::Duration::from_secs(5))
        .await
        .unwrap();
    }
    supervisor.shutdown().await.unwrap();
    assert!(!supervisor.handle().await.is_alive());
  }
}
