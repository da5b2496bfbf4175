// server/src/web/handlers/admin_handlers.rs

use actix_web::{web, HttpResponse};
use checkout_core::model::OrderStatus;
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::Result;
use crate::state::AppState;

#[derive(Deserialize, Debug)]
pub struct StatusPayload {
  pub status: OrderStatus,
}

// Admin authorization is enforced upstream of this service.
#[instrument(name = "handler::admin_update_order_status", skip(app_state, payload), fields(status = %payload.status))]
pub async fn update_order_status_handler(
  app_state: web::Data<AppState>,
  order_id: web::Path<Uuid>,
  payload: web::Json<StatusPayload>,
) -> Result<HttpResponse> {
  let order = app_state
    .engine
    .orders()
    .admin_update_status(order_id.into_inner(), payload.status)
    .await?;
  Ok(HttpResponse::Ok().json(order))
}
