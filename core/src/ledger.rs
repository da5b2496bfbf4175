// core/src/ledger.rs

//! Payment Ledger: owns payment rows and the one path that may mark them paid.

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CheckoutError, Result};
use crate::model::{OrderPatch, OrderPaymentStatus, OrderStatus, Payment, PaymentStatus};
use crate::store::StoreTx;

/// Result of [`mark_paid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkPaid {
  Marked,
  AlreadyPaid,
}

/// Creates a `pending` payment attempt.
pub async fn create(tx: &mut dyn StoreTx, order_id: Uuid, provider: &str, amount: i64, currency: &str) -> Result<Payment> {
  if amount <= 0 {
    return Err(CheckoutError::InvalidInput("payment amount must be positive".into()));
  }
  let payment = Payment::new_pending(order_id, provider, amount, currency);
  tx.insert_payment(&payment).await?;
  debug!(payment_id = %payment.id, %order_id, provider, amount, "Created pending payment.");
  Ok(payment)
}

/// Links the gateway's reference to a payment. A reference already held by another
/// payment of the same provider is a [`CheckoutError::Conflict`].
pub async fn set_provider_ref(tx: &mut dyn StoreTx, payment_id: Uuid, provider_ref: &str, raw_response: &JsonValue) -> Result<()> {
  if provider_ref.trim().is_empty() {
    return Err(CheckoutError::InvalidInput("provider reference must not be empty".into()));
  }
  match tx.set_payment_provider_ref(payment_id, provider_ref, raw_response).await? {
    0 => Err(CheckoutError::not_found(format!("payment {}", payment_id))),
    _ => Ok(()),
  }
}

pub async fn get_by_provider_ref(tx: &mut dyn StoreTx, provider: &str, provider_ref: &str) -> Result<Option<Payment>> {
  Ok(tx.find_payment_by_provider_ref(provider, provider_ref).await?)
}

pub async fn get_by_id(tx: &mut dyn StoreTx, payment_id: Uuid) -> Result<Payment> {
  tx.find_payment(payment_id)
    .await?
    .ok_or_else(|| CheckoutError::not_found(format!("payment {}", payment_id)))
}

/// Marks the payment paid and moves its order to `processing` in the caller's transaction.
///
/// Re-reads the payment under lock first; an already-paid payment is left untouched.
pub async fn mark_paid(tx: &mut dyn StoreTx, payment_id: Uuid) -> Result<MarkPaid> {
  let payment = tx
    .lock_payment(payment_id)
    .await?
    .ok_or_else(|| CheckoutError::not_found(format!("payment {}", payment_id)))?;
  if payment.status.is_paid() {
    debug!(%payment_id, "Payment already paid, mark_paid is a no-op.");
    return Ok(MarkPaid::AlreadyPaid);
  }

  if tx.set_payment_status(payment_id, PaymentStatus::Paid).await? == 0 {
    return Ok(MarkPaid::AlreadyPaid);
  }
  let paid = get_by_id(tx, payment_id).await?;

  let order = tx
    .lock_order(payment.order_id)
    .await?
    .ok_or_else(|| CheckoutError::not_found(format!("order {}", payment.order_id)))?;
  let mut patch = OrderPatch {
    payment_status: Some(OrderPaymentStatus::Paid),
    paid_at: paid.paid_at,
    ..Default::default()
  };
  if order.status.can_transition_to(OrderStatus::Processing) {
    patch.status = Some(OrderStatus::Processing);
  } else {
    warn!(
      order_id = %order.id,
      status = %order.status,
      %payment_id,
      "Payment succeeded but order status cannot move to processing; leaving status as is."
    );
  }
  tx.update_order(order.id, &patch).await?;

  info!(%payment_id, order_id = %order.id, "Payment marked paid.");
  Ok(MarkPaid::Marked)
}

/// Sets a non-paid status. Only [`mark_paid`] may set `paid`.
/// Returns whether the row changed; a paid payment never does.
pub async fn set_status(tx: &mut dyn StoreTx, payment_id: Uuid, status: PaymentStatus) -> Result<bool> {
  if status.is_paid() {
    return Err(CheckoutError::InvalidInput("use mark_paid to settle a payment".into()));
  }
  let rows = tx.set_payment_status(payment_id, status).await?;
  debug!(%payment_id, %status, rows, "Payment status update.");
  Ok(rows > 0)
}
