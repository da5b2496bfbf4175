// server/src/db/pg_store.rs

//! Postgres implementation of the checkout store ports.
//!
//! Runtime-checked queries (`sqlx::query`, not `sqlx::query!`) so the crate builds
//! without a live database. Conditional updates carry their precondition in the
//! `WHERE` clause and report rows affected; uniqueness violations surface as
//! [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use checkout_core::model::{
  AuditEntry, Cart, CartItem, CartStatus, Order, OrderItem, OrderPatch, Payment, PaymentMethod, PaymentStatus,
  ShippingDetails,
};
use checkout_core::{AuditSink, Store, StoreError, StoreResult, StoreTx};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

fn map_db(err: sqlx::Error) -> StoreError {
  if let sqlx::Error::Database(db_err) = &err {
    if db_err.is_unique_violation() {
      return StoreError::Conflict(db_err.message().to_string());
    }
  }
  StoreError::backend(err)
}

fn parse_text<T>(value: &str) -> StoreResult<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  value.parse::<T>().map_err(StoreError::backend)
}

// --- Rows ---

#[derive(Debug, FromRow)]
struct CartRow {
  id: Uuid,
  owner_id: Uuid,
  status: String,
  checkout_order_id: Option<Uuid>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct CartItemRow {
  variant_id: Uuid,
  quantity: i32,
  unit_price: i64,
  added_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct OrderRow {
  id: Uuid,
  owner_id: Uuid,
  order_number: String,
  total_amount: i64,
  currency: String,
  payment_method: String,
  shipping: Json<ShippingDetails>,
  status: String,
  payment_status: String,
  paid_at: Option<DateTime<Utc>>,
  primary_payment_id: Option<Uuid>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct OrderItemRow {
  variant_id: Uuid,
  quantity: i32,
  unit_price: i64,
  line_total: i64,
}

#[derive(Debug, FromRow)]
struct PaymentRow {
  id: Uuid,
  order_id: Uuid,
  provider: String,
  provider_ref: Option<String>,
  amount: i64,
  currency: String,
  status: String,
  raw_response: Option<JsonValue>,
  paid_at: Option<DateTime<Utc>>,
  created_at: DateTime<Utc>,
  updated_at: DateTime<Utc>,
}

impl CartRow {
  fn into_cart(self, items: Vec<CartItemRow>) -> StoreResult<Cart> {
    Ok(Cart {
      id: self.id,
      owner_id: self.owner_id,
      status: parse_text(&self.status)?,
      checkout_order_id: self.checkout_order_id,
      items: items
        .into_iter()
        .map(|i| CartItem {
          variant_id: i.variant_id,
          quantity: i.quantity,
          unit_price: i.unit_price,
          added_at: i.added_at,
        })
        .collect(),
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}

impl OrderRow {
  fn into_order(self, items: Vec<OrderItemRow>) -> StoreResult<Order> {
    Ok(Order {
      id: self.id,
      owner_id: self.owner_id,
      order_number: self.order_number,
      items: items
        .into_iter()
        .map(|i| OrderItem {
          variant_id: i.variant_id,
          quantity: i.quantity,
          unit_price: i.unit_price,
          line_total: i.line_total,
        })
        .collect(),
      total_amount: self.total_amount,
      currency: self.currency,
      payment_method: PaymentMethod::parse(&self.payment_method).map_err(StoreError::backend)?,
      shipping: self.shipping.0,
      status: parse_text(&self.status)?,
      payment_status: parse_text(&self.payment_status)?,
      paid_at: self.paid_at,
      primary_payment_id: self.primary_payment_id,
      created_at: self.created_at,
      updated_at: self.updated_at,
    })
  }
}

impl TryFrom<PaymentRow> for Payment {
  type Error = StoreError;

  fn try_from(row: PaymentRow) -> StoreResult<Self> {
    Ok(Payment {
      id: row.id,
      order_id: row.order_id,
      provider: row.provider,
      provider_ref: row.provider_ref,
      amount: row.amount,
      currency: row.currency,
      status: parse_text(&row.status)?,
      raw_response: row.raw_response,
      paid_at: row.paid_at,
      created_at: row.created_at,
      updated_at: row.updated_at,
    })
  }
}

const CART_COLUMNS: &str = "id, owner_id, status, checkout_order_id, created_at, updated_at";
const ORDER_COLUMNS: &str = "id, owner_id, order_number, total_amount, currency, payment_method, shipping, status, \
                             payment_status, paid_at, primary_payment_id, created_at, updated_at";
const PAYMENT_COLUMNS: &str = "id, order_id, provider, provider_ref, amount, currency, status, raw_response, paid_at, \
                               created_at, updated_at";

// --- Store ---

#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<Self, sqlx::Error> {
    let pool = PgPoolOptions::new()
      .max_connections(10)
      .acquire_timeout(acquire_timeout)
      .connect(database_url)
      .await?;
    info!("Successfully connected to the database.");
    Ok(Self::new(pool))
  }

  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    info!("Database migrations applied.");
    Ok(())
  }
}

#[async_trait]
impl Store for PgStore {
  async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
    let tx = self.pool.begin().await.map_err(map_db)?;
    Ok(Box::new(PgTx { tx }))
  }
}

#[async_trait]
impl AuditSink for PgStore {
  async fn append(&self, entry: AuditEntry) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO payment_audit_logs (id, payment_id, stage, payload, created_at) VALUES ($1, $2, $3, $4, $5)")
      .bind(entry.id)
      .bind(entry.payment_id)
      .bind(entry.stage.as_str())
      .bind(&entry.payload)
      .bind(entry.created_at)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}

pub struct PgTx {
  tx: Transaction<'static, Postgres>,
}

impl PgTx {
  async fn cart_items(&mut self, cart_id: Uuid) -> StoreResult<Vec<CartItemRow>> {
    sqlx::query_as::<_, CartItemRow>(
      "SELECT variant_id, quantity, unit_price, added_at FROM cart_items WHERE cart_id = $1 ORDER BY added_at, variant_id",
    )
    .bind(cart_id)
    .fetch_all(&mut *self.tx)
    .await
    .map_err(map_db)
  }

  async fn hydrate_cart(&mut self, row: Option<CartRow>) -> StoreResult<Option<Cart>> {
    match row {
      None => Ok(None),
      Some(row) => {
        let items = self.cart_items(row.id).await?;
        row.into_cart(items).map(Some)
      }
    }
  }

  async fn fetch_order(&mut self, order_id: Uuid, for_update: bool) -> StoreResult<Option<Order>> {
    let sql = format!(
      "SELECT {} FROM orders WHERE id = $1{}",
      ORDER_COLUMNS,
      if for_update { " FOR UPDATE" } else { "" }
    );
    let Some(row) = sqlx::query_as::<_, OrderRow>(&sql)
      .bind(order_id)
      .fetch_optional(&mut *self.tx)
      .await
      .map_err(map_db)?
    else {
      return Ok(None);
    };
    let items = sqlx::query_as::<_, OrderItemRow>(
      "SELECT variant_id, quantity, unit_price, line_total FROM order_items WHERE order_id = $1 ORDER BY line_no",
    )
    .bind(order_id)
    .fetch_all(&mut *self.tx)
    .await
    .map_err(map_db)?;
    row.into_order(items).map(Some)
  }

  async fn fetch_payment(&mut self, payment_id: Uuid, for_update: bool) -> StoreResult<Option<Payment>> {
    let sql = format!(
      "SELECT {} FROM payments WHERE id = $1{}",
      PAYMENT_COLUMNS,
      if for_update { " FOR UPDATE" } else { "" }
    );
    sqlx::query_as::<_, PaymentRow>(&sql)
      .bind(payment_id)
      .fetch_optional(&mut *self.tx)
      .await
      .map_err(map_db)?
      .map(Payment::try_from)
      .transpose()
  }

  /// Bumps `updated_at` on an active cart, taking its row lock. Zero means not active.
  async fn touch_active_cart(&mut self, cart_id: Uuid) -> StoreResult<u64> {
    let result = sqlx::query("UPDATE carts SET updated_at = now() WHERE id = $1 AND status = 'active'")
      .bind(cart_id)
      .execute(&mut *self.tx)
      .await
      .map_err(map_db)?;
    Ok(result.rows_affected())
  }
}

#[async_trait]
impl StoreTx for PgTx {
  async fn find_cart(&mut self, cart_id: Uuid) -> StoreResult<Option<Cart>> {
    let row = sqlx::query_as::<_, CartRow>(&format!("SELECT {} FROM carts WHERE id = $1", CART_COLUMNS))
      .bind(cart_id)
      .fetch_optional(&mut *self.tx)
      .await
      .map_err(map_db)?;
    self.hydrate_cart(row).await
  }

  async fn find_owner_cart(&mut self, owner_id: Uuid, status: CartStatus) -> StoreResult<Option<Cart>> {
    let row = sqlx::query_as::<_, CartRow>(&format!(
      "SELECT {} FROM carts WHERE owner_id = $1 AND status = $2 ORDER BY updated_at DESC LIMIT 1",
      CART_COLUMNS
    ))
    .bind(owner_id)
    .bind(status.as_str())
    .fetch_optional(&mut *self.tx)
    .await
    .map_err(map_db)?;
    self.hydrate_cart(row).await
  }

  async fn lock_owner_cart(&mut self, owner_id: Uuid, status: CartStatus) -> StoreResult<Option<Cart>> {
    let row = sqlx::query_as::<_, CartRow>(&format!(
      "SELECT {} FROM carts WHERE owner_id = $1 AND status = $2 ORDER BY updated_at DESC LIMIT 1 FOR UPDATE",
      CART_COLUMNS
    ))
    .bind(owner_id)
    .bind(status.as_str())
    .fetch_optional(&mut *self.tx)
    .await
    .map_err(map_db)?;
    self.hydrate_cart(row).await
  }

  async fn find_cart_locked_to(&mut self, order_id: Uuid) -> StoreResult<Option<Cart>> {
    let row = sqlx::query_as::<_, CartRow>(&format!(
      "SELECT {} FROM carts WHERE status = 'checkout_pending' AND checkout_order_id = $1 FOR UPDATE",
      CART_COLUMNS
    ))
    .bind(order_id)
    .fetch_optional(&mut *self.tx)
    .await
    .map_err(map_db)?;
    self.hydrate_cart(row).await
  }

  async fn insert_cart(&mut self, cart: &Cart) -> StoreResult<bool> {
    let inserted = sqlx::query(
      "INSERT INTO carts (id, owner_id, status, checkout_order_id, created_at, updated_at) \
       VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT DO NOTHING",
    )
    .bind(cart.id)
    .bind(cart.owner_id)
    .bind(cart.status.as_str())
    .bind(cart.checkout_order_id)
    .bind(cart.created_at)
    .bind(cart.updated_at)
    .execute(&mut *self.tx)
    .await
    .map_err(map_db)?
    .rows_affected()
      == 1;
    if !inserted {
      debug!(owner_id = %cart.owner_id, "Cart insert skipped, owner already has an active cart.");
      return Ok(false);
    }
    for item in &cart.items {
      self.put_cart_item(cart.id, item).await?;
    }
    Ok(true)
  }

  async fn put_cart_item(&mut self, cart_id: Uuid, item: &CartItem) -> StoreResult<u64> {
    if self.touch_active_cart(cart_id).await? == 0 {
      return Ok(0);
    }
    sqlx::query(
      "INSERT INTO cart_items (cart_id, variant_id, quantity, unit_price, added_at) VALUES ($1, $2, $3, $4, $5) \
       ON CONFLICT (cart_id, variant_id) DO UPDATE SET quantity = EXCLUDED.quantity, unit_price = EXCLUDED.unit_price",
    )
    .bind(cart_id)
    .bind(item.variant_id)
    .bind(item.quantity)
    .bind(item.unit_price)
    .bind(item.added_at)
    .execute(&mut *self.tx)
    .await
    .map_err(map_db)?;
    Ok(1)
  }

  async fn delete_cart_items(&mut self, cart_id: Uuid, variant_id: Option<Uuid>) -> StoreResult<u64> {
    if self.touch_active_cart(cart_id).await? == 0 {
      return Ok(0);
    }
    let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1 AND ($2::uuid IS NULL OR variant_id = $2)")
      .bind(cart_id)
      .bind(variant_id)
      .execute(&mut *self.tx)
      .await
      .map_err(map_db)?;
    Ok(result.rows_affected())
  }

  async fn lock_cart(&mut self, cart_id: Uuid, order_id: Uuid) -> StoreResult<u64> {
    let result = sqlx::query(
      "UPDATE carts SET status = 'checkout_pending', checkout_order_id = $2, updated_at = now() \
       WHERE id = $1 AND status = 'active'",
    )
    .bind(cart_id)
    .bind(order_id)
    .execute(&mut *self.tx)
    .await
    .map_err(map_db)?;
    Ok(result.rows_affected())
  }

  async fn release_checkout_cart(&mut self, order_id: Uuid, to: CartStatus) -> StoreResult<u64> {
    let result = sqlx::query(
      "UPDATE carts SET status = $2, checkout_order_id = NULL, updated_at = now() \
       WHERE status = 'checkout_pending' AND checkout_order_id = $1",
    )
    .bind(order_id)
    .bind(to.as_str())
    .execute(&mut *self.tx)
    .await
    .map_err(map_db)?;
    Ok(result.rows_affected())
  }

  async fn abandon_cart(&mut self, cart_id: Uuid) -> StoreResult<u64> {
    let result = sqlx::query("UPDATE carts SET status = 'abandoned', updated_at = now() WHERE id = $1 AND status = 'active'")
      .bind(cart_id)
      .execute(&mut *self.tx)
      .await
      .map_err(map_db)?;
    Ok(result.rows_affected())
  }

  async fn abandon_idle_carts(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
    let result =
      sqlx::query("UPDATE carts SET status = 'abandoned', updated_at = now() WHERE status = 'active' AND updated_at < $1")
        .bind(cutoff)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db)?;
    Ok(result.rows_affected())
  }

  async fn insert_order(&mut self, order: &Order) -> StoreResult<()> {
    sqlx::query(&format!(
      "INSERT INTO orders ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
      ORDER_COLUMNS
    ))
    .bind(order.id)
    .bind(order.owner_id)
    .bind(&order.order_number)
    .bind(order.total_amount)
    .bind(&order.currency)
    .bind(order.payment_method.as_str())
    .bind(Json(&order.shipping))
    .bind(order.status.as_str())
    .bind(order.payment_status.as_str())
    .bind(order.paid_at)
    .bind(order.primary_payment_id)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *self.tx)
    .await
    .map_err(map_db)?;

    for (line_no, item) in order.items.iter().enumerate() {
      sqlx::query(
        "INSERT INTO order_items (order_id, line_no, variant_id, quantity, unit_price, line_total) \
         VALUES ($1, $2, $3, $4, $5, $6)",
      )
      .bind(order.id)
      .bind(line_no as i32)
      .bind(item.variant_id)
      .bind(item.quantity)
      .bind(item.unit_price)
      .bind(item.line_total)
      .execute(&mut *self.tx)
      .await
      .map_err(map_db)?;
    }
    Ok(())
  }

  async fn find_order(&mut self, order_id: Uuid) -> StoreResult<Option<Order>> {
    self.fetch_order(order_id, false).await
  }

  async fn lock_order(&mut self, order_id: Uuid) -> StoreResult<Option<Order>> {
    self.fetch_order(order_id, true).await
  }

  async fn update_order(&mut self, order_id: Uuid, patch: &OrderPatch) -> StoreResult<u64> {
    let result = sqlx::query(
      "UPDATE orders SET \
         status = COALESCE($2, status), \
         payment_status = COALESCE($3, payment_status), \
         paid_at = COALESCE($4, paid_at), \
         primary_payment_id = COALESCE($5, primary_payment_id), \
         updated_at = now() \
       WHERE id = $1",
    )
    .bind(order_id)
    .bind(patch.status.map(|s| s.as_str()))
    .bind(patch.payment_status.map(|s| s.as_str()))
    .bind(patch.paid_at)
    .bind(patch.primary_payment_id)
    .execute(&mut *self.tx)
    .await
    .map_err(map_db)?;
    Ok(result.rows_affected())
  }

  async fn insert_payment(&mut self, payment: &Payment) -> StoreResult<()> {
    sqlx::query(&format!(
      "INSERT INTO payments ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
      PAYMENT_COLUMNS
    ))
    .bind(payment.id)
    .bind(payment.order_id)
    .bind(&payment.provider)
    .bind(&payment.provider_ref)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(payment.status.as_str())
    .bind(&payment.raw_response)
    .bind(payment.paid_at)
    .bind(payment.created_at)
    .bind(payment.updated_at)
    .execute(&mut *self.tx)
    .await
    .map_err(map_db)?;
    Ok(())
  }

  async fn find_payment(&mut self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
    self.fetch_payment(payment_id, false).await
  }

  async fn lock_payment(&mut self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
    self.fetch_payment(payment_id, true).await
  }

  async fn find_payment_by_provider_ref(&mut self, provider: &str, provider_ref: &str) -> StoreResult<Option<Payment>> {
    sqlx::query_as::<_, PaymentRow>(&format!(
      "SELECT {} FROM payments WHERE provider = $1 AND provider_ref = $2",
      PAYMENT_COLUMNS
    ))
    .bind(provider)
    .bind(provider_ref)
    .fetch_optional(&mut *self.tx)
    .await
    .map_err(map_db)?
    .map(Payment::try_from)
    .transpose()
  }

  async fn list_order_payments(&mut self, order_id: Uuid) -> StoreResult<Vec<Payment>> {
    sqlx::query_as::<_, PaymentRow>(&format!(
      "SELECT {} FROM payments WHERE order_id = $1 ORDER BY created_at",
      PAYMENT_COLUMNS
    ))
    .bind(order_id)
    .fetch_all(&mut *self.tx)
    .await
    .map_err(map_db)?
    .into_iter()
    .map(Payment::try_from)
    .collect()
  }

  async fn set_payment_provider_ref(
    &mut self,
    payment_id: Uuid,
    provider_ref: &str,
    raw_response: &JsonValue,
  ) -> StoreResult<u64> {
    let result =
      sqlx::query("UPDATE payments SET provider_ref = $2, raw_response = $3, updated_at = now() WHERE id = $1")
        .bind(payment_id)
        .bind(provider_ref)
        .bind(raw_response)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db)?;
    Ok(result.rows_affected())
  }

  async fn set_payment_status(&mut self, payment_id: Uuid, status: PaymentStatus) -> StoreResult<u64> {
    let result = sqlx::query(
      "UPDATE payments SET status = $2, \
         paid_at = CASE WHEN $2 = 'paid' THEN now() ELSE paid_at END, \
         updated_at = now() \
       WHERE id = $1 AND status <> 'paid'",
    )
    .bind(payment_id)
    .bind(status.as_str())
    .execute(&mut *self.tx)
    .await
    .map_err(map_db)?;
    Ok(result.rows_affected())
  }

  async fn commit(self: Box<Self>) -> StoreResult<()> {
    self.tx.commit().await.map_err(map_db)
  }
}
