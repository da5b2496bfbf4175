// server/src/web/handlers/order_handlers.rs

use actix_web::{web, HttpResponse};
use tracing::instrument;
use uuid::Uuid;

use crate::errors::Result;
use crate::state::AppState;
use crate::web::extractors::OwnerId;

#[instrument(name = "handler::get_order", skip(app_state, owner), fields(owner_id = %owner.0))]
pub async fn get_order_handler(
  app_state: web::Data<AppState>,
  owner: OwnerId,
  order_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
  let view = app_state.engine.orders().order_for_owner(owner.0, order_id.into_inner()).await?;
  Ok(HttpResponse::Ok().json(view))
}

#[instrument(name = "handler::get_payment", skip(app_state, owner), fields(owner_id = %owner.0))]
pub async fn get_payment_handler(
  app_state: web::Data<AppState>,
  owner: OwnerId,
  payment_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
  let payment = app_state
    .engine
    .orders()
    .payment_for_owner(owner.0, payment_id.into_inner())
    .await?;
  Ok(HttpResponse::Ok().json(payment))
}
