// core/src/store/memory.rs

//! An in-process [`Store`] with serializable transactions.
//!
//! A transaction takes the single state mutex, works on a private copy, and
//! publishes the copy on commit. Concurrent transactions therefore run one after
//! another, which makes this store a faithful stand-in for row locking in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::error::{StoreError, StoreResult};
use crate::model::{AuditEntry, Cart, CartItem, CartStatus, Order, OrderPatch, Payment, PaymentStatus};
use crate::store::{Store, StoreTx};

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
  pub carts: HashMap<Uuid, Cart>,
  pub orders: HashMap<Uuid, Order>,
  pub payments: HashMap<Uuid, Payment>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
  state: Arc<Mutex<MemoryState>>,
  audit: Arc<parking_lot::Mutex<Vec<AuditEntry>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// A copy of the committed state.
  pub async fn snapshot(&self) -> MemoryState {
    self.state.lock().await.clone()
  }

  /// Whether a transaction currently holds the state.
  pub fn in_transaction(&self) -> bool {
    self.state.try_lock().is_err()
  }

  /// Audit entries appended so far, in arrival order.
  pub fn audit_entries(&self) -> Vec<AuditEntry> {
    self.audit.lock().clone()
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
    let guard = Arc::clone(&self.state).lock_owned().await;
    let working = guard.clone();
    Ok(Box::new(MemoryTx { guard, working }))
  }
}

#[async_trait]
impl AuditSink for MemoryStore {
  async fn append(&self, entry: AuditEntry) -> anyhow::Result<()> {
    self.audit.lock().push(entry);
    Ok(())
  }
}

struct MemoryTx {
  guard: OwnedMutexGuard<MemoryState>,
  working: MemoryState,
}

impl MemoryTx {
  fn active_cart_mut(&mut self, cart_id: Uuid) -> Option<&mut Cart> {
    self
      .working
      .carts
      .get_mut(&cart_id)
      .filter(|cart| cart.status == CartStatus::Active)
  }
}

#[async_trait]
impl StoreTx for MemoryTx {
  async fn find_cart(&mut self, cart_id: Uuid) -> StoreResult<Option<Cart>> {
    Ok(self.working.carts.get(&cart_id).cloned())
  }

  async fn find_owner_cart(&mut self, owner_id: Uuid, status: CartStatus) -> StoreResult<Option<Cart>> {
    Ok(
      self
        .working
        .carts
        .values()
        .filter(|cart| cart.owner_id == owner_id && cart.status == status)
        .max_by_key(|cart| cart.updated_at)
        .cloned(),
    )
  }

  // Transactions are already serialized, so reading is locking.
  async fn lock_owner_cart(&mut self, owner_id: Uuid, status: CartStatus) -> StoreResult<Option<Cart>> {
    self.find_owner_cart(owner_id, status).await
  }

  async fn find_cart_locked_to(&mut self, order_id: Uuid) -> StoreResult<Option<Cart>> {
    Ok(
      self
        .working
        .carts
        .values()
        .find(|cart| cart.status == CartStatus::CheckoutPending && cart.checkout_order_id == Some(order_id))
        .cloned(),
    )
  }

  async fn insert_cart(&mut self, cart: &Cart) -> StoreResult<bool> {
    if self.working.carts.contains_key(&cart.id) {
      return Err(StoreError::Conflict(format!("cart {} already exists", cart.id)));
    }
    let owner_has_active = self
      .working
      .carts
      .values()
      .any(|c| c.owner_id == cart.owner_id && c.status == CartStatus::Active);
    if cart.status == CartStatus::Active && owner_has_active {
      return Ok(false);
    }
    self.working.carts.insert(cart.id, cart.clone());
    Ok(true)
  }

  async fn put_cart_item(&mut self, cart_id: Uuid, item: &CartItem) -> StoreResult<u64> {
    let Some(cart) = self.active_cart_mut(cart_id) else {
      return Ok(0);
    };
    match cart.items.iter_mut().find(|i| i.variant_id == item.variant_id) {
      Some(existing) => *existing = item.clone(),
      None => cart.items.push(item.clone()),
    }
    cart.updated_at = Utc::now();
    Ok(1)
  }

  async fn delete_cart_items(&mut self, cart_id: Uuid, variant_id: Option<Uuid>) -> StoreResult<u64> {
    let Some(cart) = self.active_cart_mut(cart_id) else {
      return Ok(0);
    };
    let before = cart.items.len();
    match variant_id {
      Some(variant_id) => cart.items.retain(|i| i.variant_id != variant_id),
      None => cart.items.clear(),
    }
    let removed = (before - cart.items.len()) as u64;
    if removed > 0 {
      cart.updated_at = Utc::now();
    }
    Ok(removed)
  }

  async fn lock_cart(&mut self, cart_id: Uuid, order_id: Uuid) -> StoreResult<u64> {
    let Some(cart) = self.active_cart_mut(cart_id) else {
      return Ok(0);
    };
    cart.status = CartStatus::CheckoutPending;
    cart.checkout_order_id = Some(order_id);
    cart.updated_at = Utc::now();
    Ok(1)
  }

  async fn release_checkout_cart(&mut self, order_id: Uuid, to: CartStatus) -> StoreResult<u64> {
    let owners_with_active: Vec<Uuid> = self
      .working
      .carts
      .values()
      .filter(|c| c.status == CartStatus::Active)
      .map(|c| c.owner_id)
      .collect();

    let mut affected = 0;
    for cart in self.working.carts.values_mut() {
      if cart.status != CartStatus::CheckoutPending || cart.checkout_order_id != Some(order_id) {
        continue;
      }
      if to == CartStatus::Active && owners_with_active.contains(&cart.owner_id) {
        return Err(StoreError::Conflict(format!(
          "owner {} already has an active cart",
          cart.owner_id
        )));
      }
      cart.status = to;
      cart.checkout_order_id = None;
      cart.updated_at = Utc::now();
      affected += 1;
    }
    Ok(affected)
  }

  async fn abandon_cart(&mut self, cart_id: Uuid) -> StoreResult<u64> {
    let Some(cart) = self.active_cart_mut(cart_id) else {
      return Ok(0);
    };
    cart.status = CartStatus::Abandoned;
    cart.updated_at = Utc::now();
    Ok(1)
  }

  async fn abandon_idle_carts(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
    let now = Utc::now();
    let mut affected = 0;
    for cart in self.working.carts.values_mut() {
      if cart.status == CartStatus::Active && cart.updated_at < cutoff {
        cart.status = CartStatus::Abandoned;
        cart.updated_at = now;
        affected += 1;
      }
    }
    Ok(affected)
  }

  async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
    let number_taken = self
      .working
      .orders
      .values()
      .any(|o| o.id == order.id || o.order_number == order.order_number);
    if number_taken {
      return Err(StoreError::Conflict(format!("order {} already exists", order.order_number)));
    }
    self.working.orders.insert(order.id, order.clone());
    Ok(())
  }

  async fn find_order(&mut self, order_id: Uuid) -> StoreResult<Option<Order>> {
    Ok(self.working.orders.get(&order_id).cloned())
  }

  async fn lock_order(&mut self, order_id: Uuid) -> StoreResult<Option<Order>> {
    self.find_order(order_id).await
  }

  async fn update_order(&mut self, order_id: Uuid, patch: &OrderPatch) -> StoreResult<u64> {
    let Some(order) = self.working.orders.get_mut(&order_id) else {
      return Ok(0);
    };
    patch.apply_to(order);
    order.updated_at = Utc::now();
    Ok(1)
  }

  async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
    if self.working.payments.contains_key(&payment.id) {
      return Err(StoreError::Conflict(format!("payment {} already exists", payment.id)));
    }
    if !self.working.orders.contains_key(&payment.order_id) {
      return Err(StoreError::backend(anyhow::anyhow!(
        "payment {} references missing order {}",
        payment.id,
        payment.order_id
      )));
    }
    self.working.payments.insert(payment.id, payment.clone());
    Ok(())
  }

  async fn find_payment(&mut self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
    Ok(self.working.payments.get(&payment_id).cloned())
  }

  async fn lock_payment(&mut self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
    self.find_payment(payment_id).await
  }

  async fn find_payment_by_provider_ref(&mut self, provider: &str, provider_ref: &str) -> StoreResult<Option<Payment>> {
    Ok(
      self
        .working
        .payments
        .values()
        .find(|p| p.provider == provider && p.provider_ref.as_deref() == Some(provider_ref))
        .cloned(),
    )
  }

  async fn list_order_payments(&mut self, order_id: Uuid) -> StoreResult<Vec<Payment>> {
    let mut payments: Vec<Payment> = self
      .working
      .payments
      .values()
      .filter(|p| p.order_id == order_id)
      .cloned()
      .collect();
    payments.sort_by_key(|p| p.created_at);
    Ok(payments)
  }

  async fn set_payment_provider_ref(
    &mut self,
    payment_id: Uuid,
    provider_ref: &str,
    raw_response: &JsonValue,
  ) -> StoreResult<u64> {
    let provider = match self.working.payments.get(&payment_id) {
      Some(payment) => payment.provider.clone(),
      None => return Ok(0),
    };
    let taken = self
      .working
      .payments
      .values()
      .any(|p| p.id != payment_id && p.provider == provider && p.provider_ref.as_deref() == Some(provider_ref));
    if taken {
      return Err(StoreError::Conflict(format!(
        "provider reference '{}' is already linked for '{}'",
        provider_ref, provider
      )));
    }
    let Some(payment) = self.working.payments.get_mut(&payment_id) else {
      return Ok(0);
    };
    payment.provider_ref = Some(provider_ref.to_string());
    payment.raw_response = Some(raw_response.clone());
    payment.updated_at = Utc::now();
    Ok(1)
  }

  async fn set_payment_status(&mut self, payment_id: Uuid, status: PaymentStatus) -> StoreResult<u64> {
    let Some(payment) = self.working.payments.get_mut(&payment_id) else {
      return Ok(0);
    };
    if payment.status.is_paid() {
      return Ok(0);
    }
    let now = Utc::now();
    payment.status = status;
    if status.is_paid() {
      payment.paid_at = Some(now);
    }
    payment.updated_at = now;
    Ok(1)
  }

  async fn commit(self: Box<Self>) -> StoreResult<()> {
    let MemoryTx { mut guard, working } = *self;
    *guard = working;
    Ok(())
  }
}
