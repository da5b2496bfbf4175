// core/src/reconcile/mod.rs

//! Reconciliation Engine.
//!
//! [`Reconciler`] is the single entry point for every trigger that can move the joint
//! `(cart, payment, order)` state: checkout, payment retry, webhook, return redirect
//! and client verify. Each trigger runs as a [`Flow`](crate::flow::Flow); gateway calls
//! happen between transactions, never inside one.

use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::cart::CartBook;
use crate::config::EngineConfig;
use crate::error::{CheckoutError, FlowError, GatewayError, Result};
use crate::flow::{ContextData, Flow};
use crate::gateway::{CallbackPayload, GatewayRegistry};
use crate::model::PaymentMethod;
use crate::orders::OrderDesk;
use crate::store::Store;

pub mod checkout;
pub mod contexts;
pub mod verify;

pub use contexts::{
  CheckoutCtx, CheckoutReceipt, CheckoutRequest, EngineDeps, ReconcileOutcome, ReconcileReport, Trigger, VerifyCtx,
};

/// Runs a gateway call under `limit`. An elapsed deadline is a transient [`GatewayError::Timeout`].
pub(crate) async fn gateway_call<T, F>(limit: Duration, fut: F) -> Result<T, GatewayError>
where
  F: Future<Output = Result<T, GatewayError>>,
{
  tokio::time::timeout(limit, fut).await.unwrap_or(Err(GatewayError::Timeout))
}

#[derive(Clone)]
pub struct Reconciler {
  deps: Arc<EngineDeps>,
  checkout_flow: Arc<Flow<CheckoutCtx, CheckoutError>>,
  verify_flow: Arc<Flow<VerifyCtx, CheckoutError>>,
}

impl Reconciler {
  pub fn new(store: Arc<dyn Store>, gateways: GatewayRegistry, audit: AuditLog, config: EngineConfig) -> Self {
    Self {
      deps: Arc::new(EngineDeps {
        store,
        gateways,
        audit,
        config,
      }),
      checkout_flow: Arc::new(checkout::build_checkout_flow()),
      verify_flow: Arc::new(verify::build_verify_flow()),
    }
  }

  pub fn deps(&self) -> &Arc<EngineDeps> {
    &self.deps
  }

  pub fn carts(&self) -> CartBook {
    CartBook::new(self.deps.store.clone(), self.deps.config.store_timeout)
  }

  pub fn orders(&self) -> OrderDesk {
    OrderDesk::new(self.deps.store.clone(), self.deps.config.store_timeout)
  }

  /// Snapshots the owner's active cart into an order and, for online methods, opens
  /// a payment with the gateway. The cart is never cleared here.
  #[instrument(name = "Reconciler::checkout", skip(self, request), fields(method = %request.payment_method))]
  pub async fn checkout(&self, owner_id: Uuid, request: CheckoutRequest) -> Result<CheckoutReceipt> {
    let mut ctx = CheckoutCtx::new(self.deps.clone(), owner_id, request.payment_method);
    ctx.shipping = Some(request.shipping);
    self.run_checkout(ctx).await
  }

  /// Opens a new payment attempt on an existing, unpaid order.
  #[instrument(name = "Reconciler::retry_payment", skip(self), fields(method = %payment_method))]
  pub async fn retry_payment(&self, owner_id: Uuid, order_id: Uuid, payment_method: PaymentMethod) -> Result<CheckoutReceipt> {
    let mut ctx = CheckoutCtx::new(self.deps.clone(), owner_id, payment_method);
    ctx.retry_order_id = Some(order_id);
    self.run_checkout(ctx).await
  }

  #[instrument(name = "Reconciler::handle_webhook", skip(self, payload))]
  pub async fn handle_webhook(&self, provider: &str, payload: CallbackPayload) -> Result<ReconcileReport> {
    self
      .run_verify(Trigger::Webhook {
        provider: provider.to_ascii_lowercase(),
        payload,
      })
      .await
  }

  /// The customer's browser coming back from the gateway. The redirect itself proves
  /// nothing; the payment is verified with the gateway like a webhook.
  #[instrument(name = "Reconciler::handle_return", skip(self, payload))]
  pub async fn handle_return(&self, provider: &str, payload: CallbackPayload) -> Result<ReconcileReport> {
    self
      .run_verify(Trigger::Return {
        provider: provider.to_ascii_lowercase(),
        payload,
      })
      .await
  }

  #[instrument(name = "Reconciler::verify_payment", skip(self, gateway_data))]
  pub async fn verify_payment(
    &self,
    owner_id: Uuid,
    payment_id: Uuid,
    method: &str,
    gateway_data: JsonValue,
  ) -> Result<ReconcileReport> {
    self
      .run_verify(Trigger::ClientVerify {
        owner_id,
        payment_id,
        method: method.to_string(),
        gateway_data,
      })
      .await
  }

  async fn run_checkout(&self, ctx: CheckoutCtx) -> Result<CheckoutReceipt> {
    let ctx_data = ContextData::new(ctx);
    self.checkout_flow.run(ctx_data.clone()).await?;

    let guard = ctx_data.read();
    let order = guard.order.clone().ok_or(FlowError::IncompleteState {
      flow: checkout::FLOW_NAME,
      step_name: "completion".to_string(),
      missing: "an order",
    })?;
    let initiated = guard.initiated.clone().unwrap_or_default();
    info!(order_id = %order.id, status = %order.status, "Checkout finished.");
    Ok(CheckoutReceipt {
      order,
      payment: guard.payment.clone(),
      payment_url: initiated.payment_url,
      form_fields: initiated.form_fields,
    })
  }

  async fn run_verify(&self, trigger: Trigger) -> Result<ReconcileReport> {
    let label = trigger.label();
    let ctx_data = ContextData::new(VerifyCtx::new(self.deps.clone(), trigger));
    let outcome = self.verify_flow.run(ctx_data.clone()).await?;

    let report = ctx_data.read().report.clone().ok_or(FlowError::IncompleteState {
      flow: verify::FLOW_NAME,
      step_name: "completion".to_string(),
      missing: "a reconcile report",
    })?;
    info!(
      trigger = label,
      outcome = ?report.outcome,
      payment_id = ?report.payment_id,
      stopped_early = !outcome.is_completed(),
      "Reconciliation finished."
    );
    Ok(report)
  }
}
