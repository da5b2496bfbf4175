// core/src/model/payment.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::text_enum;

text_enum! {
  /// Status of one payment attempt. No transition leaves `Paid`.
  pub enum PaymentStatus {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
  }
}

impl PaymentStatus {
  pub fn is_paid(&self) -> bool {
    matches!(self, PaymentStatus::Paid)
  }
}

/// One attempt to collect an order's amount through a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
  pub id: Uuid,
  pub order_id: Uuid,
  pub provider: String,
  /// Gateway transaction identifier (`pidx`, `transaction_uuid`, ...), known once initiation succeeded.
  pub provider_ref: Option<String>,
  pub amount: i64,
  pub currency: String,
  pub status: PaymentStatus,
  /// Raw initiation response, kept to rebuild the reference if needed.
  pub raw_response: Option<JsonValue>,
  pub paid_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Payment {
  pub fn new_pending(order_id: Uuid, provider: &str, amount: i64, currency: &str) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      order_id,
      provider: provider.to_string(),
      provider_ref: None,
      amount,
      currency: currency.to_string(),
      status: PaymentStatus::Pending,
      raw_response: None,
      paid_at: None,
      created_at: now,
      updated_at: now,
    }
  }
}
