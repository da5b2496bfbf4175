// core/src/model/cart.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::text_enum;

text_enum! {
  /// Lifecycle of a cart. Only `Active` carts accept item changes.
  pub enum CartStatus {
    Active => "active",
    /// Bound to exactly one in-flight order through `checkout_order_id`.
    CheckoutPending => "checkout_pending",
    Converted => "converted",
    Abandoned => "abandoned",
  }
}

/// A cart line. `unit_price` is denormalised when the variant is first added
/// and expressed in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
  pub variant_id: Uuid,
  pub quantity: i32,
  pub unit_price: i64,
  pub added_at: DateTime<Utc>,
}

impl CartItem {
  pub fn line_total(&self) -> i64 {
    self.unit_price.saturating_mul(i64::from(self.quantity))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
  pub id: Uuid,
  pub owner_id: Uuid,
  pub status: CartStatus,
  /// Set iff `status == CheckoutPending`.
  pub checkout_order_id: Option<Uuid>,
  pub items: Vec<CartItem>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Cart {
  pub fn new_active(owner_id: Uuid) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4(),
      owner_id,
      status: CartStatus::Active,
      checkout_order_id: None,
      items: Vec::new(),
      created_at: now,
      updated_at: now,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn total(&self) -> i64 {
    self.items.iter().fold(0i64, |acc, item| acc.saturating_add(item.line_total()))
  }

  pub fn item(&self, variant_id: Uuid) -> Option<&CartItem> {
    self.items.iter().find(|i| i.variant_id == variant_id)
  }

  /// Whether the checkout-lock invariant holds for this row.
  pub fn lock_is_consistent(&self) -> bool {
    (self.status == CartStatus::CheckoutPending) == self.checkout_order_id.is_some()
  }
}
