// core/src/audit.rs

//! Best-effort audit trail.
//!
//! Entries go through a bounded queue to a background task that appends them to an
//! [`AuditSink`]. Nothing here can fail a reconciliation: a full queue or a sink
//! error is logged and the entry is dropped.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{AuditEntry, AuditStage};

#[async_trait]
pub trait AuditSink: Send + Sync {
  async fn append(&self, entry: AuditEntry) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct AuditLog {
  tx: Option<mpsc::Sender<AuditEntry>>,
}

impl AuditLog {
  /// Spawns the consumer task on the current runtime. The task ends once every
  /// `AuditLog` clone has been dropped and the queue is drained.
  pub fn spawn(sink: Arc<dyn AuditSink>, capacity: usize) -> (Self, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<AuditEntry>(capacity.max(1));
    let handle = tokio::spawn(async move {
      while let Some(entry) = rx.recv().await {
        let stage = entry.stage;
        if let Err(e) = sink.append(entry).await {
          warn!(%stage, error = %e, "Dropping audit entry after sink failure.");
        }
      }
      debug!("Audit queue closed.");
    });
    (Self { tx: Some(tx) }, handle)
  }

  /// An audit log that discards everything.
  pub fn disabled() -> Self {
    Self { tx: None }
  }

  pub fn record(&self, payment_id: Option<Uuid>, stage: AuditStage, payload: JsonValue) {
    let Some(tx) = &self.tx else {
      return;
    };
    if let Err(e) = tx.try_send(AuditEntry::new(payment_id, stage, payload)) {
      warn!(?payment_id, %stage, error = %e, "Audit queue unavailable, entry dropped.");
    }
  }
}

impl std::fmt::Debug for AuditLog {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AuditLog").field("enabled", &self.tx.is_some()).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;
  use serde_json::json;

  #[derive(Default)]
  struct FlakySink {
    seen: Mutex<Vec<AuditStage>>,
  }

  #[async_trait]
  impl AuditSink for FlakySink {
    async fn append(&self, entry: AuditEntry) -> anyhow::Result<()> {
      if entry.stage == AuditStage::Error {
        anyhow::bail!("sink refused");
      }
      self.seen.lock().push(entry.stage);
      Ok(())
    }
  }

  #[tokio::test]
  async fn sink_failures_are_swallowed() {
    let sink = Arc::new(FlakySink::default());
    let (log, handle) = AuditLog::spawn(sink.clone(), 8);

    log.record(None, AuditStage::Request, json!({"a": 1}));
    log.record(None, AuditStage::Error, json!({"b": 2}));
    log.record(None, AuditStage::Response, json!({"c": 3}));
    drop(log);
    handle.await.unwrap();

    assert_eq!(*sink.seen.lock(), vec![AuditStage::Request, AuditStage::Response]);
  }

  #[test]
  fn disabled_log_accepts_records() {
    AuditLog::disabled().record(Some(Uuid::new_v4()), AuditStage::Webhook, JsonValue::Null);
  }
}
