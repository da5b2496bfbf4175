// core/src/orders.rs

//! Order Snapshot Builder and order status changes.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::with_deadline;
use crate::error::{CheckoutError, Result};
use crate::model::{
  Cart, Order, OrderItem, OrderPatch, OrderPaymentStatus, OrderStatus, Payment, PaymentMethod, ShippingDetails,
};
use crate::store::{Store, StoreTx};

/// `ORD-YYYYMMDD-XXXXXXXX`, the suffix drawn from a random v4 uuid.
pub fn generate_order_number() -> String {
  let suffix = Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
  format!("ORD-{}-{}", Utc::now().format("%Y%m%d"), suffix)
}

/// Snapshots `cart` into a new order and inserts it.
///
/// Cash on delivery starts `pending`/`unpaid`; online methods start
/// `awaiting_payment`/`pending`. The cart itself is not modified here.
pub async fn create_from_cart(
  tx: &mut dyn StoreTx,
  cart: &Cart,
  shipping: &ShippingDetails,
  payment_method: &PaymentMethod,
  currency: &str,
) -> Result<Order> {
  if cart.is_empty() {
    return Err(CheckoutError::EmptyCart);
  }
  if let Some(field) = shipping.first_missing_field() {
    return Err(CheckoutError::InvalidInput(format!("shipping.{} is required", field)));
  }

  let items: Vec<OrderItem> = cart
    .items
    .iter()
    .map(|item| OrderItem {
      variant_id: item.variant_id,
      quantity: item.quantity,
      unit_price: item.unit_price,
      line_total: item.line_total(),
    })
    .collect();
  let total_amount = cart.total();
  if total_amount <= 0 {
    return Err(CheckoutError::InvalidInput("order total must be positive".into()));
  }

  let (status, payment_status) = match payment_method {
    PaymentMethod::CashOnDelivery => (OrderStatus::Pending, OrderPaymentStatus::Unpaid),
    PaymentMethod::Gateway(_) => (OrderStatus::AwaitingPayment, OrderPaymentStatus::Pending),
  };

  let now = Utc::now();
  let order = Order {
    id: Uuid::new_v4(),
    owner_id: cart.owner_id,
    order_number: generate_order_number(),
    items,
    total_amount,
    currency: currency.to_string(),
    payment_method: payment_method.clone(),
    shipping: shipping.clone(),
    status,
    payment_status,
    paid_at: None,
    primary_payment_id: None,
    created_at: now,
    updated_at: now,
  };
  tx.insert_order(&order).await?;
  info!(order_id = %order.id, order_number = %order.order_number, %status, total_amount, "Order snapshot created.");
  Ok(order)
}

/// Moves an order to `status`, rejecting transitions the lifecycle does not allow.
pub async fn update_status(
  tx: &mut dyn StoreTx,
  order_id: Uuid,
  status: OrderStatus,
  payment_status: Option<OrderPaymentStatus>,
) -> Result<Order> {
  let order = tx
    .lock_order(order_id)
    .await?
    .ok_or_else(|| CheckoutError::not_found(format!("order {}", order_id)))?;
  if !order.status.can_transition_to(status) {
    return Err(CheckoutError::Conflict(format!(
      "order {} cannot move from {} to {}",
      order.order_number, order.status, status
    )));
  }
  let patch = OrderPatch {
    status: Some(status),
    payment_status,
    ..Default::default()
  };
  tx.update_order(order_id, &patch).await?;
  debug!(%order_id, from = %order.status, to = %status, "Order status updated.");
  load(tx, order_id).await
}

pub async fn load(tx: &mut dyn StoreTx, order_id: Uuid) -> Result<Order> {
  tx.find_order(order_id)
    .await?
    .ok_or_else(|| CheckoutError::not_found(format!("order {}", order_id)))
}

/// Loads an order visible to `owner_id`. Someone else's order reads as not found.
pub async fn load_owned(tx: &mut dyn StoreTx, owner_id: Uuid, order_id: Uuid) -> Result<Order> {
  match tx.find_order(order_id).await? {
    Some(order) if order.owner_id == owner_id => Ok(order),
    _ => Err(CheckoutError::not_found(format!("order {}", order_id))),
  }
}

/// An order together with every payment attempt made for it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrderView {
  #[serde(flatten)]
  pub order: Order,
  pub payments: Vec<Payment>,
}

/// Owner-scoped reads and admin status changes, each in its own transaction.
#[derive(Clone)]
pub struct OrderDesk {
  store: Arc<dyn Store>,
  timeout: Duration,
}

impl OrderDesk {
  pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
    Self { store, timeout }
  }

  #[instrument(name = "OrderDesk::order_for_owner", skip(self))]
  pub async fn order_for_owner(&self, owner_id: Uuid, order_id: Uuid) -> Result<OrderView> {
    with_deadline("order read", self.timeout, async {
      let mut tx = self.store.begin().await?;
      let order = load_owned(tx.as_mut(), owner_id, order_id).await?;
      let payments = tx.list_order_payments(order_id).await?;
      Ok(OrderView { order, payments })
    })
    .await
  }

  #[instrument(name = "OrderDesk::payment_for_owner", skip(self))]
  pub async fn payment_for_owner(&self, owner_id: Uuid, payment_id: Uuid) -> Result<Payment> {
    with_deadline("payment read", self.timeout, async {
      let mut tx = self.store.begin().await?;
      let not_found = || CheckoutError::not_found(format!("payment {}", payment_id));
      let payment = tx.find_payment(payment_id).await?.ok_or_else(not_found)?;
      load_owned(tx.as_mut(), owner_id, payment.order_id)
        .await
        .map_err(|_| not_found())?;
      Ok(payment)
    })
    .await
  }

  /// Admin transition. Only the order status moves; payment rows are untouched.
  #[instrument(name = "OrderDesk::admin_update_status", skip(self))]
  pub async fn admin_update_status(&self, order_id: Uuid, status: OrderStatus) -> Result<Order> {
    with_deadline("order write", self.timeout, async {
      let mut tx = self.store.begin().await?;
      let order = update_status(tx.as_mut(), order_id, status, None).await?;
      tx.commit().await?;
      info!(%order_id, %status, "Order status changed by admin.");
      Ok(order)
    })
    .await
  }
}
