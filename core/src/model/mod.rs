// core/src/model/mod.rs

//! Aggregates and their closed status enumerations.
//!
//! Every status enum round-trips through `as_str()` / `FromStr` so storage can
//! keep it as plain text, and through serde with the same snake_case names.

/// A stored or submitted status string did not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a valid {kind}")]
pub struct ParseStatusError {
  pub kind: &'static str,
  pub value: String,
}

macro_rules! text_enum {
  (
    $(#[$meta:meta])*
    pub enum $name:ident {
      $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)?
    }
  ) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub enum $name {
      $($(#[$vmeta])* #[serde(rename = $text)] $variant),+
    }

    impl $name {
      pub const ALL: &'static [$name] = &[$($name::$variant),+];

      pub fn as_str(&self) -> &'static str {
        match self {
          $($name::$variant => $text),+
        }
      }
    }

    impl std::fmt::Display for $name {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl std::str::FromStr for $name {
      type Err = $crate::model::ParseStatusError;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
          $($text => Ok($name::$variant),)+
          other => Err($crate::model::ParseStatusError {
            kind: stringify!($name),
            value: other.to_string(),
          }),
        }
      }
    }
  };
}

pub(crate) use text_enum;

pub mod audit;
pub mod cart;
pub mod order;
pub mod payment;

pub use audit::{AuditEntry, AuditStage};
pub use cart::{Cart, CartItem, CartStatus};
pub use order::{Order, OrderItem, OrderPatch, OrderPaymentStatus, OrderStatus, PaymentMethod, ShippingDetails};
pub use payment::{Payment, PaymentStatus};
