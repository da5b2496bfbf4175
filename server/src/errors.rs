// server/src/errors.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use checkout_core::{CheckoutError, ErrorKind};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Authentication Failed: {0}")]
  Auth(String),

  #[error(transparent)]
  Checkout(#[from] CheckoutError),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Migration Error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    match err.downcast::<sqlx::Error>() {
      Ok(sqlx_err) => AppError::Sqlx(sqlx_err),
      Err(other) => AppError::Internal(other.to_string()),
    }
  }
}

impl AppError {
  fn label(&self) -> &'static str {
    match self {
      AppError::Validation(_) => "invalid_request",
      AppError::Auth(_) => "unauthorized",
      AppError::Checkout(e) => match e {
        CheckoutError::EmptyCart => "empty_cart",
        CheckoutError::CartNotActive { .. } => "cart_not_active",
        CheckoutError::ProviderMismatch { .. } => "provider_mismatch",
        CheckoutError::UnknownProvider(_) => "unknown_provider",
        CheckoutError::GatewayInitiate { .. } => "gateway_initiate_failed",
        CheckoutError::GatewayVerify { .. } => "gateway_verify_failed",
        _ => match e.kind() {
          ErrorKind::InvalidInput => "invalid_request",
          ErrorKind::NotFound => "not_found",
          ErrorKind::Conflict => "conflict",
          ErrorKind::Gateway => "gateway_error",
          ErrorKind::Timeout => "timeout",
          ErrorKind::Internal => "internal_error",
        },
      },
      AppError::Config(_) => "configuration_error",
      AppError::Sqlx(_) | AppError::Migrate(_) => "database_error",
      AppError::Internal(_) => "internal_error",
    }
  }

  /// Storage and internal details stay in the logs.
  fn public_detail(&self) -> String {
    match self.status_code() {
      StatusCode::INTERNAL_SERVER_ERROR => "An internal error occurred".to_string(),
      _ => self.to_string(),
    }
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    match self {
      AppError::Validation(_) => StatusCode::BAD_REQUEST,
      AppError::Auth(_) => StatusCode::UNAUTHORIZED,
      AppError::Checkout(e) => match e.kind() {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Gateway => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
      },
      AppError::Config(_) | AppError::Sqlx(_) | AppError::Migrate(_) | AppError::Internal(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }

  fn error_response(&self) -> HttpResponse {
    let status = self.status_code();
    if status.is_server_error() {
      tracing::error!(application_error = %self, status = status.as_u16(), "Responding with error");
    } else {
      tracing::warn!(application_error = %self, status = status.as_u16(), "Responding with error");
    }
    HttpResponse::build(status).json(json!({ "error": self.label(), "detail": self.public_detail() }))
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
