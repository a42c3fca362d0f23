//! Run command

use std::time::Duration;

use anyhow::{Context, Result};
use runtrace::{
  LifecycleSupervisor, SettingsMerger, SettingsRequest, Value, WorkerLauncher,
  ipc::ResultData,
};
use tracing::{info, warn};

const PAYLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolve settings, launch a worker, publish payloads, shut it down
pub async fn cmd_run(start_method: Option<String>, set: &[String], payloads: &[String]) -> Result<()> {
  let mut init = super::parse_assignments(set)?;
  if let Some(method) = start_method {
    init.push(("start_method".to_string(), Value::from(method)));
  }
  let mut settings =
    SettingsMerger::resolve(SettingsRequest::new().with_files().with_program().with_init(init))
      .context("Failed to resolve settings")?;
  settings.start_run();
  settings.freeze();

  let payloads: Vec<serde_json::Value> = payloads
    .iter()
    .map(|raw| serde_json::from_str(raw).with_context(|| format!("Invalid JSON payload: {raw}")))
    .collect::<Result<_>>()?;

  let handle = WorkerLauncher::default()
    .launch(&settings)
    .await
    .context("Failed to launch worker")?;
  info!(
    run_id = settings.str_value("run_id").unwrap_or(""),
    mode = %handle.mode(),
    pid = ?handle.pid(),
    "worker started"
  );
  let supervisor = LifecycleSupervisor::new(handle);

  let published = publish_all(&supervisor, payloads).await;
  supervisor.shutdown().await.context("Failed to shut down worker")?;
  let acked = published?;

  println!(
    "{}",
    serde_json::json!({
      "run_id": settings.str_value("run_id"),
      "acknowledged": acked,
    })
  );
  Ok(())
}

async fn publish_all(supervisor: &LifecycleSupervisor, payloads: Vec<serde_json::Value>) -> Result<usize> {
  let mut handle = supervisor.handle().await;
  let interface = handle.interface_mut();
  let mut acked = 0;
  for payload in payloads {
    let result = interface
      .request(runtrace::ipc::RecordData::Payload(payload), PAYLOAD_TIMEOUT)
      .await
      .context("Worker did not answer")?;
    match result.data {
      ResultData::Ack => acked += 1,
      other => warn!(num = result.num, "unexpected worker result: {other:?}"),
    }
  }
  Ok(acked)
}
