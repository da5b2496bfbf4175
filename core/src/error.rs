// core/src/error.rs

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the flow engine itself rather than by a handler.
#[derive(Debug, Error)]
pub enum FlowError {
  #[error("flow '{flow}': required step '{step_name}' has no handlers")]
  HandlerMissing { flow: &'static str, step_name: String },

  #[error("flow '{flow}': step '{step_name}' finished without producing {missing}")]
  IncompleteState {
    flow: &'static str,
    step_name: String,
    missing: &'static str,
  },
}

/// Errors surfaced by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
  /// A uniqueness or state constraint rejected the write.
  #[error("storage conflict: {0}")]
  Conflict(String),

  #[error("storage backend error: {0}")]
  Backend(#[source] anyhow::Error),
}

impl StoreError {
  pub fn backend(err: impl Into<anyhow::Error>) -> Self {
    StoreError::Backend(err.into())
  }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors returned by a [`GatewayAdapter`](crate::gateway::GatewayAdapter).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
  /// The gateway could not be reached or answered with a transport-level failure.
  #[error("gateway network error: {0}")]
  Network(String),

  #[error("gateway call timed out")]
  Timeout,

  /// The gateway understood the request and refused it.
  #[error("gateway rejected the request: {0}")]
  Rejected(String),

  /// The inbound callback or gateway response could not be decoded.
  #[error("invalid gateway payload: {0}")]
  Invalid(String),
}

impl GatewayError {
  /// Network errors and timeouts may succeed when asked again.
  pub fn is_transient(&self) -> bool {
    matches!(self, GatewayError::Network(_) | GatewayError::Timeout)
  }
}

/// Broad class of a [`CheckoutError`], used by transports to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  InvalidInput,
  NotFound,
  Conflict,
  Gateway,
  Timeout,
  Internal,
}

/// The checkout domain error taxonomy.
#[derive(Debug, Error)]
pub enum CheckoutError {
  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("{0} not found")]
  NotFound(String),

  #[error("cart is empty")]
  EmptyCart,

  #[error("cart {cart_id} is not active")]
  CartNotActive { cart_id: Uuid },

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("payment {payment_id} belongs to provider '{expected}', not '{got}'")]
  ProviderMismatch {
    payment_id: Uuid,
    expected: String,
    got: String,
  },

  #[error("unknown payment provider '{0}'")]
  UnknownProvider(String),

  #[error("payment initiation with '{provider}' failed: {source}")]
  GatewayInitiate {
    provider: String,
    #[source]
    source: GatewayError,
  },

  #[error("payment verification with '{provider}' failed: {source}")]
  GatewayVerify {
    provider: String,
    #[source]
    source: GatewayError,
  },

  #[error("{0} timed out")]
  Timeout(&'static str),

  #[error(transparent)]
  Store(StoreError),

  #[error(transparent)]
  Flow(#[from] FlowError),
}

impl From<StoreError> for CheckoutError {
  fn from(err: StoreError) -> Self {
    match err {
      StoreError::Conflict(msg) => CheckoutError::Conflict(msg),
      other => CheckoutError::Store(other),
    }
  }
}

impl CheckoutError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      CheckoutError::InvalidInput(_)
      | CheckoutError::EmptyCart
      | CheckoutError::ProviderMismatch { .. }
      | CheckoutError::UnknownProvider(_) => ErrorKind::InvalidInput,
      CheckoutError::NotFound(_) => ErrorKind::NotFound,
      CheckoutError::CartNotActive { .. } | CheckoutError::Conflict(_) => ErrorKind::Conflict,
      CheckoutError::GatewayInitiate { .. } | CheckoutError::GatewayVerify { .. } => ErrorKind::Gateway,
      CheckoutError::Timeout(_) => ErrorKind::Timeout,
      CheckoutError::Store(_) | CheckoutError::Flow(_) => ErrorKind::Internal,
    }
  }

  /// Whether repeating the same trigger later can succeed without any other change.
  pub fn is_retryable(&self) -> bool {
    match self {
      CheckoutError::GatewayVerify { source, .. } => source.is_transient(),
      CheckoutError::Timeout(_) | CheckoutError::Store(StoreError::Backend(_)) => true,
      _ => false,
    }
  }

  pub fn not_found(what: impl std::fmt::Display) -> Self {
    CheckoutError::NotFound(what.to_string())
  }
}

pub type Result<T, E = CheckoutError> = std::result::Result<T, E>;
