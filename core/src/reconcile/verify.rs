// core/src/reconcile/verify.rs

//! The verify flow shared by webhooks, return redirects and client verify calls.
//!
//! Steps: resolve the payment, short-circuit if it is already paid, ask the gateway
//! (no transaction open), then re-read and apply exactly one transition.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cart;
use crate::config::{with_deadline, VerifyErrorPolicy};
use crate::error::{CheckoutError, FlowError, Result};
use crate::flow::{ContextData, Flow, FlowControl};
use crate::gateway::Verdict;
use crate::ledger::{self, MarkPaid};
use crate::model::{AuditStage, OrderPatch, OrderPaymentStatus, OrderStatus, Payment, PaymentMethod, PaymentStatus};
use crate::orders;

use super::contexts::{EngineDeps, ReconcileOutcome, Trigger, VerifyCtx};
use super::gateway_call;

pub(crate) const FLOW_NAME: &str = "verify_payment";

pub(crate) fn build_verify_flow() -> Flow<VerifyCtx, CheckoutError> {
  let mut flow = Flow::new(
    FLOW_NAME,
    &[
      ("resolve_payment", false, None),
      ("short_circuit_paid", false, None),
      ("verify_with_gateway", false, None),
      ("apply_transition", false, None),
      ("record_audit", true, None),
    ],
  );

  flow.on("resolve_payment", resolve_payment);
  flow.on("short_circuit_paid", short_circuit_paid);
  flow.on("verify_with_gateway", verify_with_gateway);
  flow.on("apply_transition", apply_transition);
  flow.after("record_audit", record_audit);
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

fn resolved_payment(ctx: &ContextData<VerifyCtx>, step_name: &str) -> Result<(Arc<EngineDeps>, Payment)> {
  let guard = ctx.read();
  let payment = guard.payment.clone().ok_or_else(|| incomplete(step_name, "a payment"))?;
  Ok((guard.deps.clone(), payment))
}

async fn resolve_payment(ctx: ContextData<VerifyCtx>) -> Result<FlowControl> {
  let (deps, trigger) = {
    let guard = ctx.read();
    (guard.deps.clone(), guard.trigger.clone())
  };

  match trigger {
    Trigger::Webhook { provider, payload } | Trigger::Return { provider, payload } => {
      let stage = if ctx.with(|c| matches!(c.trigger, Trigger::Webhook { .. })) {
        AuditStage::Webhook
      } else {
        AuditStage::Redirect
      };
      deps.audit.record(None, stage, json!({ "provider": provider, "payload": payload }));

      let adapter = deps
        .gateways
        .get(&provider)
        .ok_or_else(|| CheckoutError::UnknownProvider(provider.clone()))?;
      let reference = adapter
        .callback_reference(&payload)
        .map_err(|e| CheckoutError::InvalidInput(e.to_string()))?;

      let found = with_deadline("payment lookup", deps.config.store_timeout, async {
        let mut tx = deps.store.begin().await?;
        ledger::get_by_provider_ref(tx.as_mut(), &provider, &reference).await
      })
      .await?;

      let mut guard = ctx.write();
      match found {
        None => {
          info!(%provider, %reference, "Callback for an unknown provider reference acknowledged.");
          guard.settle(ReconcileOutcome::UnknownReference);
          Ok(FlowControl::Stop)
        }
        Some(payment) => {
          debug!(payment_id = %payment.id, %reference, "Callback resolved to payment.");
          guard.verify_context = serde_json::to_value(&payload).unwrap_or_default();
          guard.payment = Some(payment);
          Ok(FlowControl::Continue)
        }
      }
    }

    Trigger::ClientVerify {
      owner_id,
      payment_id,
      method,
      gateway_data,
    } => {
      let method = PaymentMethod::parse(&method).map_err(|e| CheckoutError::InvalidInput(e.to_string()))?;
      let provider = method
        .provider()
        .ok_or_else(|| CheckoutError::InvalidInput("cash on delivery payments are not verified with a gateway".into()))?
        .to_string();

      let payment = with_deadline("payment lookup", deps.config.store_timeout, async {
        let mut tx = deps.store.begin().await?;
        let payment = ledger::get_by_id(tx.as_mut(), payment_id).await?;
        orders::load_owned(tx.as_mut(), owner_id, payment.order_id)
          .await
          .map_err(|_| CheckoutError::not_found(format!("payment {}", payment_id)))?;
        Ok(payment)
      })
      .await?;

      if payment.provider != provider {
        warn!(%payment_id, expected = %payment.provider, got = %provider, "Verify request named the wrong provider.");
        return Err(CheckoutError::ProviderMismatch {
          payment_id,
          expected: payment.provider,
          got: provider,
        });
      }

      deps.audit.record(
        Some(payment.id),
        AuditStage::Verify,
        json!({ "trigger": "client_verify", "gateway_data": gateway_data }),
      );
      let mut guard = ctx.write();
      guard.verify_context = gateway_data;
      guard.payment = Some(payment);
      Ok(FlowControl::Continue)
    }
  }
}

async fn short_circuit_paid(ctx: ContextData<VerifyCtx>) -> Result<FlowControl> {
  let mut guard = ctx.write();
  let paid = guard
    .payment
    .as_ref()
    .map(|p| p.status.is_paid())
    .ok_or_else(|| incomplete("short_circuit_paid", "a payment"))?;
  if paid {
    debug!("Payment already paid, skipping gateway verification.");
    guard.settle(ReconcileOutcome::AlreadyPaid);
    return Ok(FlowControl::Stop);
  }
  Ok(FlowControl::Continue)
}

async fn verify_with_gateway(ctx: ContextData<VerifyCtx>) -> Result<FlowControl> {
  let (deps, payment) = resolved_payment(&ctx, "verify_with_gateway")?;
  let verify_context = ctx.with(|c| c.verify_context.clone());

  let provider_ref = payment
    .provider_ref
    .clone()
    .ok_or_else(|| CheckoutError::Conflict(format!("payment {} has no provider reference yet", payment.id)))?;
  let adapter = deps
    .gateways
    .get(&payment.provider)
    .ok_or_else(|| CheckoutError::UnknownProvider(payment.provider.clone()))?;

  match gateway_call(deps.config.gateway_timeout, adapter.verify(&provider_ref, &verify_context)).await {
    Ok(outcome) => {
      info!(
        payment_id = %payment.id,
        state = %outcome.state,
        success = outcome.success,
        terminal = outcome.terminal,
        "Gateway verification answered."
      );
      ctx.write().outcome = Some(outcome);
      Ok(FlowControl::Continue)
    }
    Err(source) => {
      warn!(payment_id = %payment.id, provider = %payment.provider, error = %source, "Gateway verification failed.");
      deps.audit.record(
        Some(payment.id),
        AuditStage::Error,
        json!({ "phase": "verify", "error": source.to_string(), "transient": source.is_transient() }),
      );
      if source.is_transient() {
        apply_verify_error_policy(&deps, &payment).await;
      }
      Err(CheckoutError::GatewayVerify {
        provider: payment.provider.clone(),
        source,
      })
    }
  }
}

/// A verification that could not reach the gateway is not a business failure;
/// the payment always stays `pending`.
async fn apply_verify_error_policy(deps: &Arc<EngineDeps>, payment: &Payment) {
  if deps.config.verify_error_policy == VerifyErrorPolicy::KeepLocked {
    return;
  }
  let result = with_deadline("verify error policy", deps.config.store_timeout, async {
    let mut tx = deps.store.begin().await?;
    // Same lock order as settlement: payment, then order.
    let current = tx
      .lock_payment(payment.id)
      .await?
      .ok_or_else(|| CheckoutError::not_found(format!("payment {}", payment.id)))?;
    if current.status != PaymentStatus::Pending {
      debug!(payment_id = %payment.id, status = %current.status, "Payment settled meanwhile, verify error policy skipped.");
      return Ok(());
    }
    let order = tx
      .lock_order(payment.order_id)
      .await?
      .ok_or_else(|| CheckoutError::not_found(format!("order {}", payment.order_id)))?;
    if order.primary_payment_id != Some(payment.id) || !order.status.can_transition_to(OrderStatus::PaymentFailed) {
      return Ok(());
    }
    tx.update_order(order.id, &OrderPatch::status(OrderStatus::PaymentFailed)).await?;
    let unlocked = cart::unlock_checkout_cart(tx.as_mut(), order.id).await?;
    tx.commit().await?;
    info!(order_id = %order.id, payment_id = %payment.id, unlocked, "Released cart after verify error; payment left pending.");
    Ok(())
  })
  .await;

  if let Err(e) = result {
    error!(payment_id = %payment.id, error = %e, "Could not apply verify error policy.");
  }
}

async fn apply_transition(ctx: ContextData<VerifyCtx>) -> Result<FlowControl> {
  let (deps, payment) = resolved_payment(&ctx, "apply_transition")?;
  let verdict = ctx
    .with(|c| c.outcome.as_ref().map(|o| o.classify()))
    .ok_or_else(|| incomplete("apply_transition", "a verify outcome"))?;

  let outcome = match verdict {
    Verdict::Pending => {
      debug!(payment_id = %payment.id, "Gateway has not settled the payment yet, no change.");
      ReconcileOutcome::Pending
    }
    Verdict::Success => settle_success(&deps, &payment).await?,
    Verdict::TerminalFailure => settle_failure(&deps, &payment).await?,
  };

  ctx.write().settle(outcome);
  Ok(FlowControl::Continue)
}

async fn settle_success(deps: &Arc<EngineDeps>, payment: &Payment) -> Result<ReconcileOutcome> {
  with_deadline("payment settlement", deps.config.store_timeout, async {
    let mut tx = deps.store.begin().await?;
    match ledger::mark_paid(tx.as_mut(), payment.id).await? {
      MarkPaid::AlreadyPaid => Ok(ReconcileOutcome::AlreadyPaid),
      MarkPaid::Marked => {
        let converted = cart::convert_checkout_cart(tx.as_mut(), payment.order_id).await?;
        tx.commit().await?;
        info!(payment_id = %payment.id, order_id = %payment.order_id, converted, "Payment settled.");
        Ok(ReconcileOutcome::Paid)
      }
    }
  })
  .await
}

async fn settle_failure(deps: &Arc<EngineDeps>, payment: &Payment) -> Result<ReconcileOutcome> {
  with_deadline("payment settlement", deps.config.store_timeout, async {
    let mut tx = deps.store.begin().await?;
    let current = tx
      .lock_payment(payment.id)
      .await?
      .ok_or_else(|| CheckoutError::not_found(format!("payment {}", payment.id)))?;
    if current.status.is_paid() {
      return Ok(ReconcileOutcome::AlreadyPaid);
    }
    ledger::set_status(tx.as_mut(), payment.id, PaymentStatus::Failed).await?;

    let order = tx
      .lock_order(payment.order_id)
      .await?
      .ok_or_else(|| CheckoutError::not_found(format!("order {}", payment.order_id)))?;
    // A superseded attempt failing late must not touch the order or the cart.
    // The current attempt always frees the cart, even when the order has moved on.
    if order.primary_payment_id == Some(payment.id) {
      if order.status.can_transition_to(OrderStatus::PaymentFailed) {
        let patch = OrderPatch::status(OrderStatus::PaymentFailed).with_payment_status(OrderPaymentStatus::Failed);
        tx.update_order(order.id, &patch).await?;
      } else {
        debug!(order_id = %order.id, order_status = %order.status, "Order status kept after failed payment.");
      }
      cart::unlock_checkout_cart(tx.as_mut(), order.id).await?;
    } else {
      debug!(order_id = %order.id, payment_id = %payment.id, "Failed attempt is not current, order untouched.");
    }

    tx.commit().await?;
    info!(payment_id = %payment.id, order_id = %order.id, "Payment marked failed.");
    Ok(ReconcileOutcome::Failed)
  })
  .await
}

async fn record_audit(ctx: ContextData<VerifyCtx>) -> Result<FlowControl> {
  let guard = ctx.read();
  let payment_id = guard.payment.as_ref().map(|p| p.id);
  guard.deps.audit.record(
    payment_id,
    AuditStage::Verify,
    json!({
      "trigger": guard.trigger.label(),
      "outcome": guard.report.as_ref().map(|r| r.outcome),
      "gateway": guard.outcome,
    }),
  );
  Ok(FlowControl::Continue)
}
