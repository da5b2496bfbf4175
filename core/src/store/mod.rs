// core/src/store/mod.rs

//! Persistence ports.
//!
//! [`Store::begin`] opens a transaction; all reads and writes go through the returned
//! [`StoreTx`], and nothing is visible to others until [`StoreTx::commit`]. Dropping a
//! transaction without committing rolls it back. Conditional writes return the number
//! of rows they touched so callers can tell "applied" from "precondition no longer held".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::model::{Cart, CartItem, CartStatus, Order, OrderPatch, Payment, PaymentStatus};

pub mod memory;

pub use memory::MemoryStore;

#[async_trait]
pub trait Store: Send + Sync {
  async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

#[async_trait]
pub trait StoreTx: Send {
  // --- carts ---

  /// Loads a cart with its items.
  async fn find_cart(&mut self, cart_id: Uuid) -> StoreResult<Option<Cart>>;

  /// Most recently updated cart of `owner_id` in `status`.
  async fn find_owner_cart(&mut self, owner_id: Uuid, status: CartStatus) -> StoreResult<Option<Cart>>;

  /// Same selection as [`StoreTx::find_owner_cart`], but the cart is held against
  /// concurrent item edits and lock attempts until the transaction ends.
  async fn lock_owner_cart(&mut self, owner_id: Uuid, status: CartStatus) -> StoreResult<Option<Cart>>;

  /// The cart currently locked to `order_id`, if any.
  async fn find_cart_locked_to(&mut self, order_id: Uuid) -> StoreResult<Option<Cart>>;

  /// Inserts a new cart header. Returns `false` without writing when the owner already
  /// has an active cart and `cart` is active too.
  async fn insert_cart(&mut self, cart: &Cart) -> StoreResult<bool>;

  /// Inserts or replaces the line for `item.variant_id` on an active cart.
  /// Returns rows affected; zero means the cart is not active.
  async fn put_cart_item(&mut self, cart_id: Uuid, item: &CartItem) -> StoreResult<u64>;

  /// Deletes one line, or every line when `variant_id` is `None`, from an active cart.
  async fn delete_cart_items(&mut self, cart_id: Uuid, variant_id: Option<Uuid>) -> StoreResult<u64>;

  /// `active -> checkout_pending` with `checkout_order_id = order_id`, only if the cart is active.
  async fn lock_cart(&mut self, cart_id: Uuid, order_id: Uuid) -> StoreResult<u64>;

  /// `checkout_pending -> to`, clearing the lock, only where
  /// `status = checkout_pending AND checkout_order_id = order_id`.
  async fn release_checkout_cart(&mut self, order_id: Uuid, to: CartStatus) -> StoreResult<u64>;

  /// `active -> abandoned` for one cart.
  async fn abandon_cart(&mut self, cart_id: Uuid) -> StoreResult<u64>;

  /// `active -> abandoned` for carts not touched since `cutoff`.
  async fn abandon_idle_carts(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

  // --- orders ---

  async fn insert_order(&mut self, order: &Order) -> StoreResult<()>;

  async fn find_order(&mut self, order_id: Uuid) -> StoreResult<Option<Order>>;

  /// Loads the order and holds it against concurrent writers until the transaction ends.
  async fn lock_order(&mut self, order_id: Uuid) -> StoreResult<Option<Order>>;

  async fn update_order(&mut self, order_id: Uuid, patch: &OrderPatch) -> StoreResult<u64>;

  // --- payments ---

  async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()>;

  async fn find_payment(&mut self, payment_id: Uuid) -> StoreResult<Option<Payment>>;

  /// Loads the payment and holds it against concurrent writers until the transaction ends.
  async fn lock_payment(&mut self, payment_id: Uuid) -> StoreResult<Option<Payment>>;

  async fn find_payment_by_provider_ref(&mut self, provider: &str, provider_ref: &str) -> StoreResult<Option<Payment>>;

  /// Every attempt for an order, oldest first.
  async fn list_order_payments(&mut self, order_id: Uuid) -> StoreResult<Vec<Payment>>;

  /// Fails with [`StoreError::Conflict`](crate::error::StoreError::Conflict) when another
  /// payment of the same provider already holds `provider_ref`.
  async fn set_payment_provider_ref(
    &mut self,
    payment_id: Uuid,
    provider_ref: &str,
    raw_response: &JsonValue,
  ) -> StoreResult<u64>;

  /// Sets the status unless the payment is already paid. Setting `Paid` also stamps `paid_at`.
  async fn set_payment_status(&mut self, payment_id: Uuid, status: PaymentStatus) -> StoreResult<u64>;

  async fn commit(self: Box<Self>) -> StoreResult<()>;
}
