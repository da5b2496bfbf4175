// core/src/reconcile/checkout.rs

//! The checkout flow: snapshot the cart into an order, open a payment attempt,
//! lock the cart, then initiate with the gateway outside the transaction.
//!
//! A payment retry runs the same flow with `retry_order_id` set: the snapshot step
//! is skipped and a new attempt is opened on the existing order instead.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cart;
use crate::config::with_deadline;
use crate::error::{CheckoutError, FlowError, Result};
use crate::flow::{skip_when, ContextData, Flow, FlowControl};
use crate::gateway::InitiateRequest;
use crate::ledger;
use crate::model::{AuditStage, Cart, CartStatus, Order, OrderPatch, OrderPaymentStatus, OrderStatus, Payment, PaymentStatus};
use crate::orders;
use crate::store::StoreTx;

use super::contexts::{CheckoutCtx, EngineDeps};
use super::gateway_call;

pub(crate) const FLOW_NAME: &str = "checkout";

pub(crate) fn build_checkout_flow() -> Flow<CheckoutCtx, CheckoutError> {
  let mut flow = Flow::new(
    FLOW_NAME,
    &[
      ("validate_checkout_request", false, None),
      (
        "snapshot_order_and_lock_cart",
        false,
        skip_when(|c: &CheckoutCtx| c.retry_order_id.is_some()),
      ),
      (
        "open_payment_attempt",
        false,
        skip_when(|c: &CheckoutCtx| c.retry_order_id.is_none()),
      ),
      ("initiate_gateway_payment", false, skip_when(|c: &CheckoutCtx| c.payment.is_none())),
      ("record_provider_reference", false, skip_when(|c: &CheckoutCtx| c.initiated.is_none())),
    ],
  );

  flow.on("validate_checkout_request", validate_checkout_request);
  flow.on("snapshot_order_and_lock_cart", snapshot_order_and_lock_cart);
  flow.on("open_payment_attempt", open_payment_attempt);
  flow.on("initiate_gateway_payment", initiate_gateway_payment);
  flow.on("record_provider_reference", record_provider_reference);
  flow
}

fn incomplete(step_name: &str, missing: &'static str) -> CheckoutError {
  FlowError::IncompleteState {
    flow: FLOW_NAME,
    step_name: step_name.to_string(),
    missing,
  }
  .into()
}

async fn validate_checkout_request(ctx: ContextData<CheckoutCtx>) -> Result<FlowControl> {
  let guard = ctx.read();
  if let Some(provider) = guard.payment_method.provider() {
    if !guard.deps.gateways.contains(provider) {
      return Err(CheckoutError::UnknownProvider(provider.to_string()));
    }
  }

  match guard.retry_order_id {
    None => {
      let shipping = guard
        .shipping
        .as_ref()
        .ok_or_else(|| CheckoutError::InvalidInput("shipping details are required".into()))?;
      if let Some(field) = shipping.first_missing_field() {
        return Err(CheckoutError::InvalidInput(format!("shipping.{} is required", field)));
      }
    }
    Some(order_id) if !guard.payment_method.is_online() => {
      return Err(CheckoutError::InvalidInput(format!(
        "order {}: cash on delivery cannot be used to retry a payment",
        order_id
      )));
    }
    Some(_) => {}
  }
  Ok(FlowControl::Continue)
}

/// Picks and row-locks the owner's active cart for checkout, so no item edit can
/// land between the snapshot and the lock.
///
/// A missing or empty active cart next to a cart already locked to another checkout
/// is a conflict (the owner is checking out twice); otherwise it is an empty cart.
async fn select_checkout_cart(tx: &mut dyn StoreTx, owner_id: Uuid) -> Result<Cart> {
  if let Some(cart) = tx.lock_owner_cart(owner_id, CartStatus::Active).await? {
    if !cart.is_empty() {
      return Ok(cart);
    }
  }
  match tx.find_owner_cart(owner_id, CartStatus::CheckoutPending).await? {
    Some(pending) => Err(CheckoutError::CartNotActive { cart_id: pending.id }),
    None => Err(CheckoutError::EmptyCart),
  }
}

async fn snapshot_order_and_lock_cart(ctx: ContextData<CheckoutCtx>) -> Result<FlowControl> {
  let (deps, owner_id, method, shipping) = {
    let guard = ctx.read();
    (guard.deps.clone(), guard.owner_id, guard.payment_method.clone(), guard.shipping.clone())
  };
  let shipping = shipping.ok_or_else(|| incomplete("snapshot_order_and_lock_cart", "shipping details"))?;

  let (order, payment) = with_deadline("checkout snapshot", deps.config.store_timeout, async {
    let mut tx = deps.store.begin().await?;
    let cart = select_checkout_cart(tx.as_mut(), owner_id).await?;
    let mut order = orders::create_from_cart(tx.as_mut(), &cart, &shipping, &method, &deps.config.currency).await?;

    // Cash on delivery: no payment row, cart stays active.
    let payment = match method.provider() {
      None => None,
      Some(provider) => {
        let payment = ledger::create(tx.as_mut(), order.id, provider, order.total_amount, &order.currency).await?;
        let patch = OrderPatch {
          primary_payment_id: Some(payment.id),
          ..Default::default()
        };
        tx.update_order(order.id, &patch).await?;
        order.primary_payment_id = Some(payment.id);
        cart::lock_for_checkout(tx.as_mut(), cart.id, order.id).await?;
        Some(payment)
      }
    };

    tx.commit().await?;
    Ok((order, payment))
  })
  .await?;

  info!(
    order_id = %order.id,
    order_number = %order.order_number,
    payment_id = ?payment.as_ref().map(|p| p.id),
    "Checkout snapshot committed."
  );
  let mut guard = ctx.write();
  guard.order = Some(order);
  guard.payment = payment;
  Ok(FlowControl::Continue)
}

async fn open_payment_attempt(ctx: ContextData<CheckoutCtx>) -> Result<FlowControl> {
  let (deps, owner_id, order_id, method) = {
    let guard = ctx.read();
    (guard.deps.clone(), guard.owner_id, guard.retry_order_id, guard.payment_method.clone())
  };
  let order_id = order_id.ok_or_else(|| incomplete("open_payment_attempt", "the order to retry"))?;
  let provider = method
    .provider()
    .ok_or_else(|| CheckoutError::InvalidInput("a gateway is required to retry a payment".into()))?
    .to_string();

  let (order, payment) = with_deadline("payment retry", deps.config.store_timeout, async {
    let mut tx = deps.store.begin().await?;
    let order = tx
      .lock_order(order_id)
      .await?
      .filter(|o| o.owner_id == owner_id)
      .ok_or_else(|| CheckoutError::not_found(format!("order {}", order_id)))?;

    if order.payment_status == OrderPaymentStatus::Paid || !order.status.accepts_payment_attempt() {
      return Err(CheckoutError::Conflict(format!(
        "order {} in status {} does not accept a new payment attempt",
        order.order_number, order.status
      )));
    }
    if tx.list_order_payments(order.id).await?.iter().any(|p| p.status.is_paid()) {
      return Err(CheckoutError::Conflict(format!("order {} is already paid", order.order_number)));
    }

    // Amount comes from the immutable snapshot, never from the cart.
    let payment = ledger::create(tx.as_mut(), order.id, &provider, order.total_amount, &order.currency).await?;
    let patch = OrderPatch {
      status: Some(OrderStatus::AwaitingPayment),
      payment_status: Some(OrderPaymentStatus::Pending),
      primary_payment_id: Some(payment.id),
      ..Default::default()
    };
    tx.update_order(order.id, &patch).await?;

    // Re-lock the cart only while it still holds what the order was built from.
    if tx.find_cart_locked_to(order.id).await?.is_none() {
      match tx.lock_owner_cart(owner_id, CartStatus::Active).await? {
        Some(cart) if order.matches_cart(&cart) => cart::lock_for_checkout(tx.as_mut(), cart.id, order.id).await?,
        Some(cart) => debug!(order_id = %order.id, cart_id = %cart.id, "Active cart changed since the order was placed, left unlocked."),
        None => {}
      }
    }

    let order = orders::load(tx.as_mut(), order.id).await?;
    tx.commit().await?;
    Ok((order, payment))
  })
  .await?;

  info!(order_id = %order.id, payment_id = %payment.id, provider = %payment.provider, "Opened new payment attempt.");
  let mut guard = ctx.write();
  guard.order = Some(order);
  guard.payment = Some(payment);
  Ok(FlowControl::Continue)
}

async fn initiate_gateway_payment(ctx: ContextData<CheckoutCtx>) -> Result<FlowControl> {
  let (deps, owner_id, order, payment) = {
    let guard = ctx.read();
    (guard.deps.clone(), guard.owner_id, guard.order.clone(), guard.payment.clone())
  };
  let order = order.ok_or_else(|| incomplete("initiate_gateway_payment", "an order"))?;
  let payment = payment.ok_or_else(|| incomplete("initiate_gateway_payment", "a payment"))?;
  let adapter = deps
    .gateways
    .get(&payment.provider)
    .ok_or_else(|| CheckoutError::UnknownProvider(payment.provider.clone()))?;

  let request = InitiateRequest {
    payment_id: payment.id,
    order_id: order.id,
    order_number: order.order_number.clone(),
    amount: payment.amount,
    currency: payment.currency.clone(),
    transaction_ref: payment.id.simple().to_string(),
    return_url: deps.config.return_url_for(&payment.provider),
    metadata: BTreeMap::from([("owner_id".to_string(), owner_id.to_string())]),
  };
  deps.audit.record(
    Some(payment.id),
    AuditStage::Request,
    serde_json::to_value(&request).unwrap_or_default(),
  );

  match gateway_call(deps.config.gateway_timeout, adapter.initiate(&request)).await {
    Ok(response) => {
      debug!(payment_id = %payment.id, provider_ref = %response.provider_ref, "Gateway initiation succeeded.");
      deps.audit.record(
        Some(payment.id),
        AuditStage::Response,
        json!({ "provider_ref": response.provider_ref, "payment_url": response.payment_url, "raw": response.raw }),
      );
      ctx.write().initiated = Some(response);
      Ok(FlowControl::Continue)
    }
    Err(source) => {
      warn!(payment_id = %payment.id, provider = %payment.provider, error = %source, "Gateway initiation failed.");
      deps.audit.record(
        Some(payment.id),
        AuditStage::Error,
        json!({ "phase": "initiate", "error": source.to_string() }),
      );
      release_failed_attempt(&deps, &order, &payment).await;
      Err(CheckoutError::GatewayInitiate {
        provider: payment.provider.clone(),
        source,
      })
    }
  }
}

async fn record_provider_reference(ctx: ContextData<CheckoutCtx>) -> Result<FlowControl> {
  let (deps, order, payment, initiated) = {
    let guard = ctx.read();
    (guard.deps.clone(), guard.order.clone(), guard.payment.clone(), guard.initiated.clone())
  };
  let order = order.ok_or_else(|| incomplete("record_provider_reference", "an order"))?;
  let payment = payment.ok_or_else(|| incomplete("record_provider_reference", "a payment"))?;
  let initiated = initiated.ok_or_else(|| incomplete("record_provider_reference", "a gateway response"))?;

  let linked = with_deadline("provider reference link", deps.config.store_timeout, async {
    let mut tx = deps.store.begin().await?;
    ledger::set_provider_ref(tx.as_mut(), payment.id, &initiated.provider_ref, &initiated.raw).await?;
    let payment = ledger::get_by_id(tx.as_mut(), payment.id).await?;
    tx.commit().await?;
    Ok(payment)
  })
  .await;

  match linked {
    Ok(payment) => {
      ctx.write().payment = Some(payment);
      Ok(FlowControl::Continue)
    }
    Err(e) => {
      // Without the reference no callback can ever find this attempt.
      error!(payment_id = %payment.id, error = %e, "Could not link provider reference.");
      release_failed_attempt(&deps, &order, &payment).await;
      Err(e)
    }
  }
}

/// Compensation after an attempt could not be opened with the gateway:
/// payment `failed`, and when this is still the order's current attempt the cart
/// unlocked and the order moved to `payment_failed` if its status allows. Errors are logged; the caller reports the original failure.
async fn release_failed_attempt(deps: &Arc<EngineDeps>, order: &Order, payment: &Payment) {
  let result = with_deadline("initiate compensation", deps.config.store_timeout, async {
    let mut tx = deps.store.begin().await?;
    ledger::set_status(tx.as_mut(), payment.id, PaymentStatus::Failed).await?;
    let current = tx
      .lock_order(order.id)
      .await?
      .ok_or_else(|| CheckoutError::not_found(format!("order {}", order.id)))?;
    if current.primary_payment_id == Some(payment.id) {
      if current.status.can_transition_to(OrderStatus::PaymentFailed) {
        let patch = OrderPatch::status(OrderStatus::PaymentFailed).with_payment_status(OrderPaymentStatus::Failed);
        tx.update_order(order.id, &patch).await?;
      }
      cart::unlock_checkout_cart(tx.as_mut(), order.id).await?;
    }
    tx.commit().await?;
    Ok(())
  })
  .await;

  if let Err(e) = result {
    error!(order_id = %order.id, payment_id = %payment.id, error = %e, "Failed to release a failed payment attempt.");
  }
}
