// core/src/cart.rs

//! Cart Lock Manager.
//!
//! The free functions run inside a caller-owned transaction so the reconciliation
//! engine can combine them with ledger and order writes. [`CartBook`] wraps them
//! in their own transactions for the standalone cart endpoints and the idle sweep.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::with_deadline;
use crate::error::{CheckoutError, Result};
use crate::model::{Cart, CartItem, CartStatus};
use crate::store::{Store, StoreTx};

/// Get-or-create the owner's active cart. Never returns a checkout_pending cart.
pub async fn ensure_active(tx: &mut dyn StoreTx, owner_id: Uuid) -> Result<Cart> {
  if let Some(cart) = tx.find_owner_cart(owner_id, CartStatus::Active).await? {
    return Ok(cart);
  }
  let cart = Cart::new_active(owner_id);
  if tx.insert_cart(&cart).await? {
    debug!(%owner_id, cart_id = %cart.id, "Created active cart.");
    return Ok(cart);
  }
  // Lost a creation race to a concurrent request.
  tx.find_owner_cart(owner_id, CartStatus::Active)
    .await?
    .ok_or_else(|| CheckoutError::Conflict(format!("active cart for owner {} vanished during creation", owner_id)))
}

/// `active -> checkout_pending`, binding the cart to `order_id`.
pub async fn lock_for_checkout(tx: &mut dyn StoreTx, cart_id: Uuid, order_id: Uuid) -> Result<()> {
  match tx.lock_cart(cart_id, order_id).await? {
    0 => Err(CheckoutError::CartNotActive { cart_id }),
    _ => {
      debug!(%cart_id, %order_id, "Cart locked for checkout.");
      Ok(())
    }
  }
}

/// `checkout_pending -> converted` for the cart locked to `order_id`, if there is one.
/// Zero rows is success: already converted, or the order never locked a cart.
pub async fn convert_checkout_cart(tx: &mut dyn StoreTx, order_id: Uuid) -> Result<u64> {
  let rows = tx.release_checkout_cart(order_id, CartStatus::Converted).await?;
  debug!(%order_id, rows, "Converted checkout cart.");
  Ok(rows)
}

/// `checkout_pending -> active` for the cart locked to `order_id`.
///
/// If the owner opened a fresh active cart while this one was locked, that cart is
/// abandoned and its lines are merged back so the owner still has exactly one.
pub async fn unlock_checkout_cart(tx: &mut dyn StoreTx, order_id: Uuid) -> Result<u64> {
  let Some(locked) = tx.find_cart_locked_to(order_id).await? else {
    debug!(%order_id, "No cart locked to order, nothing to unlock.");
    return Ok(0);
  };

  let newer = tx.find_owner_cart(locked.owner_id, CartStatus::Active).await?;
  if let Some(newer) = &newer {
    tx.abandon_cart(newer.id).await?;
  }

  let rows = tx.release_checkout_cart(order_id, CartStatus::Active).await?;

  if let Some(newer) = newer {
    for item in &newer.items {
      let merged = match locked.item(item.variant_id) {
        Some(existing) => CartItem {
          quantity: existing.quantity.saturating_add(item.quantity),
          ..existing.clone()
        },
        None => item.clone(),
      };
      tx.put_cart_item(locked.id, &merged).await?;
    }
    info!(cart_id = %locked.id, merged_from = %newer.id, lines = newer.items.len(), "Merged interim cart into unlocked cart.");
  }

  debug!(%order_id, cart_id = %locked.id, rows, "Unlocked checkout cart.");
  Ok(rows)
}

/// Adds `quantity` of a variant. An existing line keeps its original price.
pub async fn add_item(tx: &mut dyn StoreTx, owner_id: Uuid, variant_id: Uuid, quantity: i32, unit_price: i64) -> Result<Cart> {
  if quantity <= 0 {
    return Err(CheckoutError::InvalidInput("quantity must be positive".into()));
  }
  if unit_price < 0 {
    return Err(CheckoutError::InvalidInput("unit_price must not be negative".into()));
  }
  let cart = ensure_active(tx, owner_id).await?;
  let item = match cart.item(variant_id) {
    Some(existing) => CartItem {
      quantity: existing.quantity.saturating_add(quantity),
      ..existing.clone()
    },
    None => CartItem {
      variant_id,
      quantity,
      unit_price,
      added_at: Utc::now(),
    },
  };
  put_active(tx, &cart, &item).await?;
  reload(tx, cart.id).await
}

/// Sets a line's quantity; zero removes the line.
pub async fn update_item(tx: &mut dyn StoreTx, owner_id: Uuid, variant_id: Uuid, quantity: i32) -> Result<Cart> {
  if quantity < 0 {
    return Err(CheckoutError::InvalidInput("quantity must not be negative".into()));
  }
  if quantity == 0 {
    return remove_item(tx, owner_id, variant_id).await;
  }
  let cart = ensure_active(tx, owner_id).await?;
  let existing = cart
    .item(variant_id)
    .ok_or_else(|| CheckoutError::not_found(format!("cart item {}", variant_id)))?;
  let item = CartItem {
    quantity,
    ..existing.clone()
  };
  put_active(tx, &cart, &item).await?;
  reload(tx, cart.id).await
}

pub async fn remove_item(tx: &mut dyn StoreTx, owner_id: Uuid, variant_id: Uuid) -> Result<Cart> {
  let cart = ensure_active(tx, owner_id).await?;
  if tx.delete_cart_items(cart.id, Some(variant_id)).await? == 0 {
    return Err(CheckoutError::not_found(format!("cart item {}", variant_id)));
  }
  reload(tx, cart.id).await
}

pub async fn clear(tx: &mut dyn StoreTx, owner_id: Uuid) -> Result<Cart> {
  let cart = ensure_active(tx, owner_id).await?;
  tx.delete_cart_items(cart.id, None).await?;
  reload(tx, cart.id).await
}

async fn put_active(tx: &mut dyn StoreTx, cart: &Cart, item: &CartItem) -> Result<()> {
  match tx.put_cart_item(cart.id, item).await? {
    0 => Err(CheckoutError::CartNotActive { cart_id: cart.id }),
    _ => Ok(()),
  }
}

async fn reload(tx: &mut dyn StoreTx, cart_id: Uuid) -> Result<Cart> {
  tx.find_cart(cart_id)
    .await?
    .ok_or_else(|| CheckoutError::not_found(format!("cart {}", cart_id)))
}

/// Standalone cart operations, each in its own transaction.
#[derive(Clone)]
pub struct CartBook {
  store: Arc<dyn Store>,
  timeout: Duration,
}

impl CartBook {
  pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
    Self { store, timeout }
  }

  #[instrument(name = "CartBook::get", skip(self))]
  pub async fn get(&self, owner_id: Uuid) -> Result<Cart> {
    with_deadline("cart read", self.timeout, async {
      let mut tx = self.store.begin().await?;
      let cart = ensure_active(tx.as_mut(), owner_id).await?;
      tx.commit().await?;
      Ok(cart)
    })
    .await
  }

  #[instrument(name = "CartBook::add_item", skip(self))]
  pub async fn add_item(&self, owner_id: Uuid, variant_id: Uuid, quantity: i32, unit_price: i64) -> Result<Cart> {
    with_deadline("cart write", self.timeout, async {
      let mut tx = self.store.begin().await?;
      let cart = add_item(tx.as_mut(), owner_id, variant_id, quantity, unit_price).await?;
      tx.commit().await?;
      Ok(cart)
    })
    .await
  }

  #[instrument(name = "CartBook::update_item", skip(self))]
  pub async fn update_item(&self, owner_id: Uuid, variant_id: Uuid, quantity: i32) -> Result<Cart> {
    with_deadline("cart write", self.timeout, async {
      let mut tx = self.store.begin().await?;
      let cart = update_item(tx.as_mut(), owner_id, variant_id, quantity).await?;
      tx.commit().await?;
      Ok(cart)
    })
    .await
  }

  #[instrument(name = "CartBook::remove_item", skip(self))]
  pub async fn remove_item(&self, owner_id: Uuid, variant_id: Uuid) -> Result<Cart> {
    with_deadline("cart write", self.timeout, async {
      let mut tx = self.store.begin().await?;
      let cart = remove_item(tx.as_mut(), owner_id, variant_id).await?;
      tx.commit().await?;
      Ok(cart)
    })
    .await
  }

  #[instrument(name = "CartBook::clear", skip(self))]
  pub async fn clear(&self, owner_id: Uuid) -> Result<Cart> {
    with_deadline("cart write", self.timeout, async {
      let mut tx = self.store.begin().await?;
      let cart = clear(tx.as_mut(), owner_id).await?;
      tx.commit().await?;
      Ok(cart)
    })
    .await
  }

  /// Marks active carts idle since before `cutoff` as abandoned.
  pub async fn abandon_idle(&self, cutoff: DateTime<Utc>) -> Result<u64> {
    with_deadline("idle cart sweep", self.timeout, async {
      let mut tx = self.store.begin().await?;
      let rows = tx.abandon_idle_carts(cutoff).await?;
      tx.commit().await?;
      if rows > 0 {
        info!(rows, %cutoff, "Abandoned idle carts.");
      } else {
        debug!(%cutoff, "No idle carts to abandon.");
      }
      Ok(rows)
    })
    .await
    .map_err(|e| {
      warn!(error = %e, "Idle cart sweep failed.");
      e
    })
  }
}
