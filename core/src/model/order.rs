// core/src/model/order.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{text_enum, Cart, ParseStatusError};

text_enum! {
  pub enum OrderStatus {
    /// Cash-on-delivery order waiting for fulfilment.
    Pending => "pending",
    AwaitingPayment => "awaiting_payment",
    Processing => "processing",
    Shipped => "shipped",
    Delivered => "delivered",
    Cancelled => "cancelled",
    Refunded => "refunded",
    PaymentFailed => "payment_failed",
  }
}

impl OrderStatus {
  /// Allowed status moves. Staying in the same status is always allowed.
  ///
  /// Reconciliation moves among `awaiting_payment`, `payment_failed` and `processing`;
  /// fulfilment moves forward from `processing`; cancellation is possible until shipping;
  /// refunds only once money was taken or goods went out.
  pub fn can_transition_to(self, next: OrderStatus) -> bool {
    use OrderStatus::*;
    if self == next {
      return true;
    }
    matches!(
      (self, next),
      (Pending, Processing | Cancelled)
        | (AwaitingPayment, Processing | PaymentFailed | Cancelled)
        | (PaymentFailed, AwaitingPayment | Processing | Cancelled)
        | (Processing, Shipped | Cancelled | Refunded)
        | (Shipped, Delivered | Refunded)
        | (Delivered, Refunded)
    )
  }

  /// Statuses in which a fresh payment attempt may be opened.
  pub fn accepts_payment_attempt(self) -> bool {
    matches!(self, OrderStatus::AwaitingPayment | OrderStatus::PaymentFailed)
  }
}

text_enum! {
  /// Payment summary carried on the order itself.
  pub enum OrderPaymentStatus {
    Unpaid => "unpaid",
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
  }
}

/// How the customer pays: cash on delivery, or through a named gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PaymentMethod {
  CashOnDelivery,
  Gateway(String),
}

impl PaymentMethod {
  pub const COD: &'static str = "cod";

  pub fn parse(raw: &str) -> Result<Self, ParseStatusError> {
    let normalized = raw.trim().to_ascii_lowercase();
    let invalid = || ParseStatusError {
      kind: "PaymentMethod",
      value: raw.to_string(),
    };
    match normalized.as_str() {
      "" => Err(invalid()),
      Self::COD | "cash_on_delivery" => Ok(PaymentMethod::CashOnDelivery),
      name if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') => {
        Ok(PaymentMethod::Gateway(name.to_string()))
      }
      _ => Err(invalid()),
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      PaymentMethod::CashOnDelivery => Self::COD,
      PaymentMethod::Gateway(provider) => provider,
    }
  }

  /// The gateway provider name, `None` for cash on delivery.
  pub fn provider(&self) -> Option<&str> {
    match self {
      PaymentMethod::CashOnDelivery => None,
      PaymentMethod::Gateway(provider) => Some(provider),
    }
  }

  pub fn is_online(&self) -> bool {
    matches!(self, PaymentMethod::Gateway(_))
  }
}

impl std::fmt::Display for PaymentMethod {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for PaymentMethod {
  type Err = ParseStatusError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    PaymentMethod::parse(s)
  }
}

impl TryFrom<String> for PaymentMethod {
  type Error = ParseStatusError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    PaymentMethod::parse(&value)
  }
}

impl From<PaymentMethod> for String {
  fn from(method: PaymentMethod) -> Self {
    method.as_str().to_string()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
  pub recipient_name: String,
  pub phone: String,
  pub address_line: String,
  pub city: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub landmark: Option<String>,
}

impl ShippingDetails {
  /// Returns the name of the first blank required field.
  pub fn first_missing_field(&self) -> Option<&'static str> {
    [
      ("recipient_name", &self.recipient_name),
      ("phone", &self.phone),
      ("address_line", &self.address_line),
      ("city", &self.city),
    ]
    .into_iter()
    .find(|(_, value)| value.trim().is_empty())
    .map(|(name, _)| name)
  }
}

/// Snapshot of one cart line at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
  pub variant_id: Uuid,
  pub quantity: i32,
  pub unit_price: i64,
  pub line_total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
  pub id: Uuid,
  pub owner_id: Uuid,
  /// Externally visible number, generated once.
  pub order_number: String,
  pub items: Vec<OrderItem>,
  pub total_amount: i64,
  pub currency: String,
  pub payment_method: PaymentMethod,
  pub shipping: ShippingDetails,
  pub status: OrderStatus,
  pub payment_status: OrderPaymentStatus,
  pub paid_at: Option<DateTime<Utc>>,
  /// The most recent payment attempt.
  pub primary_payment_id: Option<Uuid>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Order {
  /// Whether `cart` still holds exactly the lines this order was snapshotted from.
  /// Prices are ignored; a line keeps its price once added.
  pub fn matches_cart(&self, cart: &Cart) -> bool {
    let mut ordered: Vec<(Uuid, i32)> = self.items.iter().map(|i| (i.variant_id, i.quantity)).collect();
    let mut in_cart: Vec<(Uuid, i32)> = cart.items.iter().map(|i| (i.variant_id, i.quantity)).collect();
    ordered.sort_unstable();
    in_cart.sort_unstable();
    ordered == in_cart
  }
}

/// The mutable part of an order. Line items and amount are never patched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderPatch {
  pub status: Option<OrderStatus>,
  pub payment_status: Option<OrderPaymentStatus>,
  pub paid_at: Option<DateTime<Utc>>,
  pub primary_payment_id: Option<Uuid>,
}

impl OrderPatch {
  pub fn status(status: OrderStatus) -> Self {
    Self {
      status: Some(status),
      ..Default::default()
    }
  }

  pub fn with_payment_status(mut self, payment_status: OrderPaymentStatus) -> Self {
    self.payment_status = Some(payment_status);
    self
  }

  pub fn is_empty(&self) -> bool {
    self == &OrderPatch::default()
  }

  /// Applies the patch to an in-memory order.
  pub fn apply_to(&self, order: &mut Order) {
    if let Some(status) = self.status {
      order.status = status;
    }
    if let Some(payment_status) = self.payment_status {
      order.payment_status = payment_status;
    }
    if let Some(paid_at) = self.paid_at {
      order.paid_at = Some(paid_at);
    }
    if let Some(payment_id) = self.primary_payment_id {
      order.primary_payment_id = Some(payment_id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn payment_method_parses_cod_and_gateways() {
    assert_eq!(PaymentMethod::parse(" COD ").unwrap(), PaymentMethod::CashOnDelivery);
    assert_eq!(
      PaymentMethod::parse("Khalti").unwrap(),
      PaymentMethod::Gateway("khalti".to_string())
    );
    assert!(PaymentMethod::parse("").is_err());
    assert!(PaymentMethod::parse("pay pal").is_err());
  }

  #[test]
  fn paid_orders_cannot_fall_back_to_payment_failed() {
    assert!(OrderStatus::AwaitingPayment.can_transition_to(OrderStatus::PaymentFailed));
    assert!(OrderStatus::PaymentFailed.can_transition_to(OrderStatus::Processing));
    assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::PaymentFailed));
    assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Processing));
    assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::AwaitingPayment));
  }

  #[test]
  fn cart_match_ignores_line_order_but_not_quantities() {
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let now = Utc::now();
    let line = |variant_id, quantity| crate::model::CartItem {
      variant_id,
      quantity,
      unit_price: 500,
      added_at: now,
    };
    let mut cart = Cart::new_active(Uuid::new_v4());
    cart.items = vec![line(b, 1), line(a, 2)];
    let order = Order {
      id: Uuid::new_v4(),
      owner_id: cart.owner_id,
      order_number: "ORD-20260101-ABCDEF12".into(),
      items: vec![
        OrderItem { variant_id: a, quantity: 2, unit_price: 500, line_total: 1000 },
        OrderItem { variant_id: b, quantity: 1, unit_price: 500, line_total: 500 },
      ],
      total_amount: 1500,
      currency: "NPR".into(),
      payment_method: PaymentMethod::Gateway("khalti".into()),
      shipping: ShippingDetails {
        recipient_name: "Sita".into(),
        phone: "9800000000".into(),
        address_line: "Thamel".into(),
        city: "Kathmandu".into(),
        landmark: None,
      },
      status: OrderStatus::AwaitingPayment,
      payment_status: OrderPaymentStatus::Pending,
      paid_at: None,
      primary_payment_id: None,
      created_at: now,
      updated_at: now,
    };
    assert!(order.matches_cart(&cart));

    cart.items[1].quantity = 3;
    assert!(!order.matches_cart(&cart));
    cart.items[1].quantity = 2;
    cart.items.push(line(Uuid::new_v4(), 1));
    assert!(!order.matches_cart(&cart));
  }

  #[test]
  fn shipping_reports_first_blank_field() {
    let shipping = ShippingDetails {
      recipient_name: "Sita".into(),
      phone: " ".into(),
      address_line: "Thamel".into(),
      city: "Kathmandu".into(),
      landmark: None,
    };
    assert_eq!(shipping.first_missing_field(), Some("phone"));
  }
}
