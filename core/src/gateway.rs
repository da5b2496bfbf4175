// core/src/gateway.rs

//! The contract every payment gateway adapter satisfies, and the registry the
//! reconciliation engine resolves adapters from.
//!
//! Adapters decode their provider-specific callback payloads into typed values
//! at this boundary. The engine only ever sees a provider reference and a
//! normalized [`VerifyOutcome`].

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::GatewayError;

/// Everything an adapter needs to open a payment with its provider.
#[derive(Debug, Clone, Serialize)]
pub struct InitiateRequest {
  pub payment_id: Uuid,
  pub order_id: Uuid,
  pub order_number: String,
  /// Minor currency units.
  pub amount: i64,
  pub currency: String,
  /// Our idempotency/transaction reference, unique per payment attempt.
  pub transaction_ref: String,
  pub return_url: String,
  pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitiateResponse {
  /// Where to send the customer, for redirect-style providers.
  pub payment_url: Option<String>,
  /// Fields to auto-post, for form-style providers.
  #[serde(default)]
  pub form_fields: BTreeMap<String, String>,
  /// The gateway's identifier for this transaction.
  pub provider_ref: String,
  #[serde(default)]
  pub raw: JsonValue,
}

/// What the gateway says about a transaction right now.
///
/// `success = false, terminal = false` means "ask again later".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyOutcome {
  pub success: bool,
  pub terminal: bool,
  /// Provider-specific state label (`Completed`, `AMBIGUOUS`, ...).
  pub state: String,
  #[serde(default)]
  pub raw: JsonValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  Success,
  TerminalFailure,
  Pending,
}

impl VerifyOutcome {
  pub fn classify(&self) -> Verdict {
    match (self.success, self.terminal) {
      (true, _) => Verdict::Success,
      (false, true) => Verdict::TerminalFailure,
      (false, false) => Verdict::Pending,
    }
  }
}

/// Inbound webhook / return-redirect fields, merged from query, JSON and form bodies.
pub type CallbackPayload = BTreeMap<String, String>;

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
  /// Lowercase provider name this adapter answers for.
  fn provider(&self) -> &str;

  async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse, GatewayError>;

  /// `context` is caller-supplied gateway data (client verify) or the decoded callback.
  async fn verify(&self, provider_ref: &str, context: &JsonValue) -> Result<VerifyOutcome, GatewayError>;

  /// Extracts the provider reference from an inbound callback.
  fn callback_reference(&self, payload: &CallbackPayload) -> Result<String, GatewayError>;
}

/// Provider name → adapter, injected into the engine at construction.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
  adapters: Arc<RwLock<HashMap<String, Arc<dyn GatewayAdapter>>>>,
}

impl GatewayRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers `adapter` under its provider name, replacing any previous adapter.
  pub fn register(&self, adapter: Arc<dyn GatewayAdapter>) {
    let provider = adapter.provider().to_ascii_lowercase();
    let previous = self.adapters.write().insert(provider.clone(), adapter);
    if previous.is_some() {
      warn!(%provider, "Replaced an already registered gateway adapter.");
    } else {
      debug!(%provider, "Registered gateway adapter.");
    }
  }

  pub fn get(&self, provider: &str) -> Option<Arc<dyn GatewayAdapter>> {
    self.adapters.read().get(&provider.to_ascii_lowercase()).cloned()
  }

  pub fn contains(&self, provider: &str) -> bool {
    self.adapters.read().contains_key(&provider.to_ascii_lowercase())
  }

  pub fn providers(&self) -> Vec<String> {
    let mut names: Vec<String> = self.adapters.read().keys().cloned().collect();
    names.sort();
    names
  }
}

impl std::fmt::Debug for GatewayRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GatewayRegistry").field("providers", &self.providers()).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classify_covers_the_three_verdicts() {
    let outcome = |success, terminal| VerifyOutcome {
      success,
      terminal,
      state: "x".into(),
      raw: JsonValue::Null,
    };
    assert_eq!(outcome(true, true).classify(), Verdict::Success);
    assert_eq!(outcome(true, false).classify(), Verdict::Success);
    assert_eq!(outcome(false, true).classify(), Verdict::TerminalFailure);
    assert_eq!(outcome(false, false).classify(), Verdict::Pending);
  }
}
