// core/src/model/audit.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::text_enum;

text_enum! {
  pub enum AuditStage {
    Request => "request",
    Response => "response",
    Redirect => "redirect",
    Webhook => "webhook",
    Verify => "verify",
    Error => "error",
  }
}

/// Support/debugging record. Never read when deciding a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
  pub id: Uuid,
  pub payment_id: Option<Uuid>,
  pub stage: AuditStage,
  pub payload: JsonValue,
  pub created_at: DateTime<Utc>,
}

impl AuditEntry {
  pub fn new(payment_id: Option<Uuid>, stage: AuditStage, payload: JsonValue) -> Self {
    Self {
      id: Uuid::new_v4(),
      payment_id,
      stage,
      payload,
      created_at: Utc::now(),
    }
  }
}
