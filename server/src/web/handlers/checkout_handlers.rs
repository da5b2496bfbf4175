// server/src/web/handlers/checkout_handlers.rs

use actix_web::{web, HttpResponse};
use checkout_core::model::PaymentMethod;
use checkout_core::CheckoutRequest;
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::Result;
use crate::state::AppState;
use crate::web::extractors::OwnerId;

#[derive(Deserialize, Debug)]
pub struct RetryPaymentPayload {
  pub payment_method: PaymentMethod,
}

#[instrument(
  name = "handler::checkout",
  skip(app_state, owner, payload),
  fields(owner_id = %owner.0, method = %payload.payment_method)
)]
pub async fn checkout_handler(
  app_state: web::Data<AppState>,
  owner: OwnerId,
  payload: web::Json<CheckoutRequest>,
) -> Result<HttpResponse> {
  let receipt = app_state.engine.checkout(owner.0, payload.into_inner()).await?;
  info!(
    order_id = %receipt.order.id,
    order_number = %receipt.order.order_number,
    has_payment = receipt.payment.is_some(),
    "Checkout accepted."
  );
  Ok(HttpResponse::Created().json(receipt))
}

#[instrument(name = "handler::retry_payment", skip(app_state, owner, payload), fields(owner_id = %owner.0))]
pub async fn retry_payment_handler(
  app_state: web::Data<AppState>,
  owner: OwnerId,
  order_id: web::Path<Uuid>,
  payload: web::Json<RetryPaymentPayload>,
) -> Result<HttpResponse> {
  let receipt = app_state
    .engine
    .retry_payment(owner.0, order_id.into_inner(), payload.into_inner().payment_method)
    .await?;
  Ok(HttpResponse::Created().json(receipt))
}
