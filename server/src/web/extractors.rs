// server/src/web/extractors.rs

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};
use tracing::warn;
use uuid::Uuid;

use crate::errors::AppError;

pub const OWNER_HEADER: &str = "X-Owner-Id";

/// The caller's identity. Stands in for real authentication: an upstream gateway
/// is expected to have verified the caller and set `X-Owner-Id`.
#[derive(Debug, Clone, Copy)]
pub struct OwnerId(pub Uuid);

impl FromRequest for OwnerId {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
    let parsed = req
      .headers()
      .get(OWNER_HEADER)
      .and_then(|value| value.to_str().ok())
      .and_then(|raw| Uuid::parse_str(raw.trim()).ok());
    match parsed {
      Some(owner_id) => ready(Ok(OwnerId(owner_id))),
      None => {
        warn!("Missing or invalid {} header.", OWNER_HEADER);
        ready(Err(AppError::Auth(format!("missing or invalid {} header", OWNER_HEADER))))
      }
    }
  }
}
