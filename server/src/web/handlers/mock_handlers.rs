// server/src/web/handlers/mock_handlers.rs

//! The hosted payment page of the mock gateway. Only mounted when mock gateways are configured.

use actix_web::http::header::LOCATION;
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::{info, instrument};

use super::webhook_handlers::callback_payload;
use crate::errors::{AppError, Result};
use crate::services::MockSettlement;
use crate::state::AppState;

/// Settles the mock transaction (`outcome=completed|failed|pending`, default
/// automatic) and sends the browser to the return endpoint like a real gateway.
#[instrument(name = "handler::mock_pay", skip(app_state, req, body), fields(provider = %provider))]
pub async fn mock_pay_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  provider: web::Path<String>,
  body: web::Bytes,
) -> Result<HttpResponse> {
  let provider = provider.into_inner().to_ascii_lowercase();
  let gateway = app_state
    .mock_gateway(&provider)
    .ok_or_else(|| AppError::Validation(format!("no mock gateway named '{}'", provider)))?;
  let payload = callback_payload(&req, &body)?;

  let key = gateway.reference_key();
  let reference = payload
    .get(key)
    .ok_or_else(|| AppError::Validation(format!("missing '{}'", key)))?;
  let settlement = match payload.get("outcome").map(String::as_str) {
    None | Some("") => MockSettlement::Auto,
    Some("completed") => MockSettlement::Completed,
    Some("failed") => MockSettlement::Failed,
    Some("pending") => MockSettlement::Ambiguous,
    Some(other) => return Err(AppError::Validation(format!("unknown mock outcome '{}'", other))),
  };
  if !gateway.settle(reference, settlement) {
    return Err(AppError::Validation(format!("unknown mock transaction '{}'", reference)));
  }
  info!(%reference, ?settlement, "Mock payment page submitted.");

  let location = format!(
    "{}/api/v1/payments/return/{}?{}={}",
    app_state.config.app_base_url.trim_end_matches('/'),
    provider,
    key,
    reference
  );
  Ok(HttpResponse::SeeOther().insert_header((LOCATION, location)).finish())
}
