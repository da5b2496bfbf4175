// tests/ledger_tests.rs
mod common;

use checkout_core::ledger::{self, MarkPaid};
use checkout_core::model::{Cart, CartItem, Order, OrderPaymentStatus, OrderStatus, PaymentStatus};
use checkout_core::{orders, CheckoutError, MemoryStore, Store};
use chrono::Utc;
use common::{online, setup_tracing, shipping};
use serde_json::json;
use uuid::Uuid;

async fn seeded_order(store: &MemoryStore) -> Order {
  let mut cart = Cart::new_active(Uuid::new_v4());
  cart.items.push(CartItem {
    variant_id: Uuid::new_v4(),
    quantity: 3,
    unit_price: 700,
    added_at: Utc::now(),
  });
  let mut tx = store.begin().await.unwrap();
  let order = orders::create_from_cart(tx.as_mut(), &cart, &shipping(), &online(), "NPR").await.unwrap();
  tx.commit().await.unwrap();
  order
}

#[tokio::test]
async fn snapshot_copies_lines_and_total() {
  setup_tracing();
  let store = MemoryStore::new();
  let order = seeded_order(&store).await;

  assert_eq!(order.total_amount, 2100);
  assert_eq!(order.items.len(), 1);
  assert_eq!(order.items[0].line_total, 2100);
  assert_eq!(order.status, OrderStatus::AwaitingPayment);
  assert_eq!(order.payment_status, OrderPaymentStatus::Pending);
  assert!(order.order_number.starts_with("ORD-"));
  assert_eq!(order.order_number.len(), "ORD-20260101-ABCDEF12".len());
}

#[tokio::test]
async fn empty_cart_cannot_be_snapshotted() {
  setup_tracing();
  let store = MemoryStore::new();
  let mut tx = store.begin().await.unwrap();
  let err = orders::create_from_cart(tx.as_mut(), &Cart::new_active(Uuid::new_v4()), &shipping(), &online(), "NPR")
    .await
    .unwrap_err();
  assert!(matches!(err, CheckoutError::EmptyCart));
}

#[tokio::test]
async fn provider_reference_links_and_is_unique_per_provider() {
  setup_tracing();
  let store = MemoryStore::new();
  let order = seeded_order(&store).await;

  let mut tx = store.begin().await.unwrap();
  let first = ledger::create(tx.as_mut(), order.id, "khalti", order.total_amount, "NPR").await.unwrap();
  let second = ledger::create(tx.as_mut(), order.id, "khalti", order.total_amount, "NPR").await.unwrap();
  assert_eq!(first.status, PaymentStatus::Pending);

  ledger::set_provider_ref(tx.as_mut(), first.id, "pidx-1", &json!({"pidx": "pidx-1"})).await.unwrap();
  let found = ledger::get_by_provider_ref(tx.as_mut(), "khalti", "pidx-1").await.unwrap().unwrap();
  assert_eq!(found.id, first.id);
  assert!(ledger::get_by_provider_ref(tx.as_mut(), "esewa", "pidx-1").await.unwrap().is_none());

  let err = ledger::set_provider_ref(tx.as_mut(), second.id, "pidx-1", &json!({})).await.unwrap_err();
  assert!(matches!(err, CheckoutError::Conflict(_)));
}

#[tokio::test]
async fn mark_paid_is_idempotent_and_settles_the_order() {
  setup_tracing();
  let store = MemoryStore::new();
  let order = seeded_order(&store).await;

  let mut tx = store.begin().await.unwrap();
  let payment = ledger::create(tx.as_mut(), order.id, "khalti", order.total_amount, "NPR").await.unwrap();
  assert_eq!(ledger::mark_paid(tx.as_mut(), payment.id).await.unwrap(), MarkPaid::Marked);
  assert_eq!(ledger::mark_paid(tx.as_mut(), payment.id).await.unwrap(), MarkPaid::AlreadyPaid);
  tx.commit().await.unwrap();

  let state = store.snapshot().await;
  let paid = &state.payments[&payment.id];
  assert_eq!(paid.status, PaymentStatus::Paid);
  assert!(paid.paid_at.is_some());
  let settled = &state.orders[&order.id];
  assert_eq!(settled.status, OrderStatus::Processing);
  assert_eq!(settled.payment_status, OrderPaymentStatus::Paid);
  assert_eq!(settled.paid_at, paid.paid_at);
}

#[tokio::test]
async fn paid_is_terminal_for_set_status() {
  setup_tracing();
  let store = MemoryStore::new();
  let order = seeded_order(&store).await;

  let mut tx = store.begin().await.unwrap();
  let payment = ledger::create(tx.as_mut(), order.id, "khalti", order.total_amount, "NPR").await.unwrap();

  let err = ledger::set_status(tx.as_mut(), payment.id, PaymentStatus::Paid).await.unwrap_err();
  assert!(matches!(err, CheckoutError::InvalidInput(_)));

  ledger::mark_paid(tx.as_mut(), payment.id).await.unwrap();
  assert!(!ledger::set_status(tx.as_mut(), payment.id, PaymentStatus::Failed).await.unwrap());
  assert_eq!(ledger::get_by_id(tx.as_mut(), payment.id).await.unwrap().status, PaymentStatus::Paid);
}

#[tokio::test]
async fn mark_paid_keeps_a_cancelled_order_cancelled() {
  setup_tracing();
  let store = MemoryStore::new();
  let order = seeded_order(&store).await;

  let mut tx = store.begin().await.unwrap();
  let payment = ledger::create(tx.as_mut(), order.id, "khalti", order.total_amount, "NPR").await.unwrap();
  orders::update_status(tx.as_mut(), order.id, OrderStatus::Cancelled, None).await.unwrap();
  ledger::mark_paid(tx.as_mut(), payment.id).await.unwrap();
  let after = orders::load(tx.as_mut(), order.id).await.unwrap();

  assert_eq!(after.status, OrderStatus::Cancelled);
  assert_eq!(after.payment_status, OrderPaymentStatus::Paid);
}

#[tokio::test]
async fn illegal_order_transition_is_a_conflict() {
  setup_tracing();
  let store = MemoryStore::new();
  let order = seeded_order(&store).await;

  let mut tx = store.begin().await.unwrap();
  let err = orders::update_status(tx.as_mut(), order.id, OrderStatus::Delivered, None).await.unwrap_err();
  assert!(matches!(err, CheckoutError::Conflict(_)));

  let moved = orders::update_status(tx.as_mut(), order.id, OrderStatus::PaymentFailed, Some(OrderPaymentStatus::Failed))
    .await
    .unwrap();
  assert_eq!(moved.status, OrderStatus::PaymentFailed);
  assert_eq!(moved.payment_status, OrderPaymentStatus::Failed);
}
