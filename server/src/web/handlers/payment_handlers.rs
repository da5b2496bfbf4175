// server/src/web/handlers/payment_handlers.rs

use actix_web::http::header::LOCATION;
use actix_web::{web, HttpRequest, HttpResponse};
use checkout_core::{ReconcileOutcome, ReconcileReport};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::webhook_handlers::callback_payload;
use crate::errors::Result;
use crate::state::AppState;
use crate::web::extractors::OwnerId;

#[derive(Deserialize, Debug)]
pub struct VerifyPayload {
  pub payment_id: Uuid,
  pub method: String,
  #[serde(default)]
  pub gateway_data: JsonValue,
}

#[instrument(
  name = "handler::verify_payment",
  skip(app_state, owner, payload),
  fields(owner_id = %owner.0, payment_id = %payload.payment_id, method = %payload.method)
)]
pub async fn verify_payment_handler(
  app_state: web::Data<AppState>,
  owner: OwnerId,
  payload: web::Json<VerifyPayload>,
) -> Result<HttpResponse> {
  let VerifyPayload {
    payment_id,
    method,
    gateway_data,
  } = payload.into_inner();
  let report = app_state
    .engine
    .verify_payment(owner.0, payment_id, &method, gateway_data)
    .await?;
  Ok(HttpResponse::Ok().json(report))
}

fn redirect_status(report: &ReconcileReport) -> &'static str {
  match report.outcome {
    ReconcileOutcome::Paid | ReconcileOutcome::AlreadyPaid => "success",
    ReconcileOutcome::Pending => "pending",
    ReconcileOutcome::Failed | ReconcileOutcome::UnknownReference => "failed",
  }
}

pub(crate) fn frontend_redirect(base: &str, status: &str, order_id: Option<Uuid>) -> String {
  let separator = if base.contains('?') { '&' } else { '?' };
  match order_id {
    Some(order_id) => format!("{}{}status={}&order_id={}", base, separator, status, order_id),
    None => format!("{}{}status={}", base, separator, status),
  }
}

/// The customer's browser returning from the gateway. Always answers with a
/// redirect; the outcome travels in the query string.
#[instrument(name = "handler::payment_return", skip(app_state, req, body), fields(provider = %provider))]
pub async fn payment_return_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  provider: web::Path<String>,
  body: web::Bytes,
) -> HttpResponse {
  let provider = provider.into_inner();
  let (status, order_id) = match callback_payload(&req, &body) {
    Err(e) => {
      warn!(error = %e, "Undecodable return redirect.");
      ("failed", None)
    }
    Ok(payload) => match app_state.engine.handle_return(&provider, payload).await {
      Ok(report) => {
        info!(outcome = ?report.outcome, order_id = ?report.order_id, "Return redirect reconciled.");
        (redirect_status(&report), report.order_id)
      }
      Err(e) if e.is_retryable() => {
        warn!(error = %e, "Return redirect could not be verified now.");
        ("pending", None)
      }
      Err(e) => {
        warn!(error = %e, "Return redirect rejected.");
        ("failed", None)
      }
    },
  };

  let location = frontend_redirect(&app_state.config.frontend_return_url, status, order_id);
  HttpResponse::SeeOther().insert_header((LOCATION, location)).finish()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn redirect_keeps_existing_query() {
    let id = Uuid::nil();
    assert_eq!(
      frontend_redirect("http://shop/result", "success", Some(id)),
      format!("http://shop/result?status=success&order_id={}", id)
    );
    assert_eq!(frontend_redirect("http://shop/r?lang=en", "failed", None), "http://shop/r?lang=en&status=failed");
  }
}
