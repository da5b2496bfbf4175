// server/src/web/handlers/cart_handlers.rs

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::Result;
use crate::state::AppState;
use crate::web::extractors::OwnerId;

#[derive(Deserialize, Debug)]
pub struct AddItemPayload {
  pub variant_id: Uuid,
  pub quantity: i32,
  /// Minor units, denormalised from the catalog at add time.
  pub unit_price: i64,
}

#[derive(Deserialize, Debug)]
pub struct UpdateItemPayload {
  pub quantity: i32,
}

#[instrument(name = "handler::get_cart", skip(app_state, owner), fields(owner_id = %owner.0))]
pub async fn get_cart_handler(app_state: web::Data<AppState>, owner: OwnerId) -> Result<HttpResponse> {
  let cart = app_state.engine.carts().get(owner.0).await?;
  Ok(HttpResponse::Ok().json(cart))
}

#[instrument(
  name = "handler::add_cart_item",
  skip(app_state, owner, payload),
  fields(owner_id = %owner.0, variant_id = %payload.variant_id, quantity = payload.quantity)
)]
pub async fn add_item_handler(
  app_state: web::Data<AppState>,
  owner: OwnerId,
  payload: web::Json<AddItemPayload>,
) -> Result<HttpResponse> {
  let AddItemPayload {
    variant_id,
    quantity,
    unit_price,
  } = payload.into_inner();
  let cart = app_state
    .engine
    .carts()
    .add_item(owner.0, variant_id, quantity, unit_price)
    .await?;
  info!(cart_id = %cart.id, items = cart.items.len(), "Item added to cart.");
  Ok(HttpResponse::Ok().json(cart))
}

#[instrument(name = "handler::update_cart_item", skip(app_state, owner, payload), fields(owner_id = %owner.0))]
pub async fn update_item_handler(
  app_state: web::Data<AppState>,
  owner: OwnerId,
  variant_id: web::Path<Uuid>,
  payload: web::Json<UpdateItemPayload>,
) -> Result<HttpResponse> {
  let cart = app_state
    .engine
    .carts()
    .update_item(owner.0, variant_id.into_inner(), payload.quantity)
    .await?;
  Ok(HttpResponse::Ok().json(cart))
}

#[instrument(name = "handler::remove_cart_item", skip(app_state, owner), fields(owner_id = %owner.0))]
pub async fn remove_item_handler(
  app_state: web::Data<AppState>,
  owner: OwnerId,
  variant_id: web::Path<Uuid>,
) -> Result<HttpResponse> {
  let cart = app_state.engine.carts().remove_item(owner.0, variant_id.into_inner()).await?;
  Ok(HttpResponse::Ok().json(cart))
}

#[instrument(name = "handler::clear_cart", skip(app_state, owner), fields(owner_id = %owner.0))]
pub async fn clear_cart_handler(app_state: web::Data<AppState>, owner: OwnerId) -> Result<HttpResponse> {
  let cart = app_state.engine.carts().clear(owner.0).await?;
  Ok(HttpResponse::Ok().json(cart))
}
