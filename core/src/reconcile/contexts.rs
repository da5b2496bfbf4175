// core/src/reconcile/contexts.rs

//! Flow state for the checkout and verify flows, plus the values they report.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::config::EngineConfig;
use crate::gateway::{CallbackPayload, GatewayRegistry, InitiateResponse, VerifyOutcome};
use crate::model::{Order, Payment, PaymentMethod, ShippingDetails};
use crate::store::Store;

/// Everything a flow handler may reach for. Shared by every run.
pub struct EngineDeps {
  pub store: Arc<dyn Store>,
  pub gateways: GatewayRegistry,
  pub audit: AuditLog,
  pub config: EngineConfig,
}

/// Input of a fresh checkout.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct CheckoutRequest {
  pub payment_method: PaymentMethod,
  pub shipping: ShippingDetails,
}

pub struct CheckoutCtx {
  pub deps: Arc<EngineDeps>,
  pub owner_id: Uuid,
  pub payment_method: PaymentMethod,
  pub shipping: Option<ShippingDetails>,
  /// Set when a new attempt is opened on an existing order instead of snapshotting the cart.
  pub retry_order_id: Option<Uuid>,

  // --- produced ---
  pub order: Option<Order>,
  pub payment: Option<Payment>,
  pub initiated: Option<InitiateResponse>,
}

impl CheckoutCtx {
  pub fn new(deps: Arc<EngineDeps>, owner_id: Uuid, payment_method: PaymentMethod) -> Self {
    Self {
      deps,
      owner_id,
      payment_method,
      shipping: None,
      retry_order_id: None,
      order: None,
      payment: None,
      initiated: None,
    }
  }
}

/// What a checkout (or payment retry) hands back to the customer.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
  pub order: Order,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub payment: Option<Payment>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub payment_url: Option<String>,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub form_fields: BTreeMap<String, String>,
}

/// Which of the racing triggers started a reconciliation.
#[derive(Debug, Clone)]
pub enum Trigger {
  Webhook { provider: String, payload: CallbackPayload },
  Return { provider: String, payload: CallbackPayload },
  ClientVerify {
    owner_id: Uuid,
    payment_id: Uuid,
    method: String,
    gateway_data: JsonValue,
  },
}

impl Trigger {
  pub fn label(&self) -> &'static str {
    match self {
      Trigger::Webhook { .. } => "webhook",
      Trigger::Return { .. } => "return",
      Trigger::ClientVerify { .. } => "client_verify",
    }
  }
}

pub struct VerifyCtx {
  pub deps: Arc<EngineDeps>,
  pub trigger: Trigger,

  // --- produced ---
  pub payment: Option<Payment>,
  /// Data handed to the adapter's `verify`.
  pub verify_context: JsonValue,
  pub outcome: Option<VerifyOutcome>,
  pub report: Option<ReconcileReport>,
}

impl VerifyCtx {
  pub fn new(deps: Arc<EngineDeps>, trigger: Trigger) -> Self {
    Self {
      deps,
      trigger,
      payment: None,
      verify_context: JsonValue::Null,
      outcome: None,
      report: None,
    }
  }

  pub(crate) fn settle(&mut self, outcome: ReconcileOutcome) {
    let payment = self.payment.as_ref();
    self.report = Some(ReconcileReport {
      outcome,
      payment_id: payment.map(|p| p.id),
      order_id: payment.map(|p| p.order_id),
      gateway_state: self.outcome.as_ref().map(|o| o.state.clone()),
    });
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
  /// This call moved the payment to paid.
  Paid,
  /// The payment was paid before this call; nothing changed.
  AlreadyPaid,
  /// The gateway reported a terminal failure.
  Failed,
  /// The gateway has not decided yet; nothing changed.
  Pending,
  /// The callback named a reference no payment holds; nothing changed.
  UnknownReference,
}

impl ReconcileOutcome {
  pub fn is_paid(&self) -> bool {
    matches!(self, ReconcileOutcome::Paid | ReconcileOutcome::AlreadyPaid)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
  pub outcome: ReconcileOutcome,
  pub payment_id: Option<Uuid>,
  pub order_id: Option<Uuid>,
  pub gateway_state: Option<String>,
}
