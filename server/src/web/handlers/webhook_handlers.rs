// server/src/web/handlers/webhook_handlers.rs

use actix_web::http::header::CONTENT_TYPE;
use actix_web::{web, HttpRequest, HttpResponse};
use checkout_core::{CallbackPayload, CheckoutError};
use serde_json::{json, Value as JsonValue};
use tracing::{error, info, instrument, warn};

use crate::errors::{AppError, Result};
use crate::state::AppState;

fn scalar_text(value: &JsonValue) -> Option<String> {
  match value {
    JsonValue::String(s) => Some(s.clone()),
    JsonValue::Number(n) => Some(n.to_string()),
    JsonValue::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

/// Merges the query string and a JSON or form body into one flat field map.
/// Body fields win over query fields with the same name.
pub(crate) fn callback_payload(req: &HttpRequest, body: &[u8]) -> Result<CallbackPayload> {
  let mut payload = web::Query::<CallbackPayload>::from_query(req.query_string())
    .map(|q| q.into_inner())
    .map_err(|e| AppError::Validation(format!("malformed query string: {}", e)))?;
  if body.is_empty() {
    return Ok(payload);
  }

  let content_type = req
    .headers()
    .get(CONTENT_TYPE)
    .and_then(|h| h.to_str().ok())
    .unwrap_or_default()
    .to_ascii_lowercase();

  if content_type.starts_with("application/json") {
    let value: JsonValue =
      serde_json::from_slice(body).map_err(|e| AppError::Validation(format!("malformed JSON body: {}", e)))?;
    if let JsonValue::Object(fields) = value {
      for (key, value) in fields {
        if let Some(text) = scalar_text(&value) {
          payload.insert(key, text);
        }
      }
    }
  } else if content_type.starts_with("application/x-www-form-urlencoded") {
    let raw = std::str::from_utf8(body).map_err(|_| AppError::Validation("form body is not UTF-8".to_string()))?;
    let form = web::Query::<CallbackPayload>::from_query(raw)
      .map_err(|e| AppError::Validation(format!("malformed form body: {}", e)))?;
    payload.extend(form.into_inner());
  }
  Ok(payload)
}

/// Gateways retry on any non-2xx answer, so only failures a retry can fix get one.
#[instrument(name = "handler::webhook", skip(app_state, req, body), fields(provider = %provider))]
pub async fn webhook_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  provider: web::Path<String>,
  body: web::Bytes,
) -> HttpResponse {
  let provider = provider.into_inner();
  let payload = match callback_payload(&req, &body) {
    Ok(payload) => payload,
    Err(e) => {
      warn!(error = %e, "Undecodable webhook acknowledged.");
      return HttpResponse::Ok().json(json!({ "status": "ignored", "reason": e.to_string() }));
    }
  };

  match app_state.engine.handle_webhook(&provider, payload).await {
    Ok(report) => {
      info!(outcome = ?report.outcome, payment_id = ?report.payment_id, "Webhook reconciled.");
      HttpResponse::Ok().json(json!({ "status": "ok", "outcome": report.outcome }))
    }
    Err(e) if e.is_retryable() => {
      error!(error = %e, "Webhook could not be reconciled now, asking the gateway to retry.");
      HttpResponse::ServiceUnavailable().json(json!({ "status": "retry", "detail": e.to_string() }))
    }
    Err(e @ CheckoutError::UnknownProvider(_)) => {
      warn!(error = %e, "Webhook for an unregistered provider acknowledged.");
      HttpResponse::Ok().json(json!({ "status": "ignored", "reason": e.to_string() }))
    }
    Err(e) => {
      warn!(error = %e, "Webhook rejected, acknowledged without retry.");
      HttpResponse::Ok().json(json!({ "status": "ignored", "reason": e.to_string() }))
    }
  }
}
