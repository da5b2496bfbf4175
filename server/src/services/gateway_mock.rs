// server/src/services/gateway_mock.rs

//! A local stand-in for real payment gateways.
//!
//! Registered once per name in `MOCK_GATEWAYS`. Each instance remembers the
//! transactions it opened and answers verify calls from that memory, so a
//! developer can drive the full checkout → callback → verify loop without a
//! provider sandbox.

use async_trait::async_trait;
use checkout_core::{CallbackPayload, GatewayAdapter, GatewayError, InitiateRequest, InitiateResponse, VerifyOutcome};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Gateway-side state of a mock transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSettlement {
  /// Settles on the next verify: completed, unless the amount ends in `123`.
  Auto,
  Completed,
  Failed,
  /// The gateway cannot tell yet.
  Ambiguous,
}

#[derive(Debug, Clone)]
struct MockTransaction {
  amount: i64,
  settlement: MockSettlement,
}

/// How the provider names its transaction reference in callbacks and how it
/// expects the customer to be sent over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Style {
  /// Redirect URL, `pidx` reference.
  Khalti,
  /// Auto-posted form, `transaction_uuid` reference.
  Esewa,
  /// Redirect URL, `ref` reference.
  Generic,
}

impl Style {
  fn for_provider(provider: &str) -> Self {
    match provider {
      "khalti" => Style::Khalti,
      "esewa" => Style::Esewa,
      _ => Style::Generic,
    }
  }

  fn reference_key(self) -> &'static str {
    match self {
      Style::Khalti => "pidx",
      Style::Esewa => "transaction_uuid",
      Style::Generic => "ref",
    }
  }
}

pub struct MockGateway {
  provider: String,
  style: Style,
  base_url: String,
  latency: Duration,
  transactions: Mutex<HashMap<String, MockTransaction>>,
  fail_next_initiate: AtomicBool,
  fail_next_verify: AtomicBool,
}

impl MockGateway {
  pub fn new(provider: &str, base_url: &str) -> Self {
    let provider = provider.trim().to_ascii_lowercase();
    Self {
      style: Style::for_provider(&provider),
      provider,
      base_url: base_url.trim_end_matches('/').to_string(),
      latency: Duration::from_millis(50),
      transactions: Mutex::new(HashMap::new()),
      fail_next_initiate: AtomicBool::new(false),
      fail_next_verify: AtomicBool::new(false),
    }
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = latency;
    self
  }

  /// Forces the gateway-side state of `provider_ref`. Returns false for an unknown reference.
  pub fn settle(&self, provider_ref: &str, settlement: MockSettlement) -> bool {
    match self.transactions.lock().get_mut(provider_ref) {
      Some(txn) => {
        txn.settlement = settlement;
        true
      }
      None => false,
    }
  }

  /// The next initiate call fails with a network error.
  pub fn fail_next_initiate(&self) {
    self.fail_next_initiate.store(true, Ordering::SeqCst);
  }

  /// The next verify call fails with a network error.
  pub fn fail_next_verify(&self) {
    self.fail_next_verify.store(true, Ordering::SeqCst);
  }

  pub fn reference_key(&self) -> &'static str {
    self.style.reference_key()
  }

  /// References issued so far, for tests and the dev console.
  pub fn issued_refs(&self) -> Vec<String> {
    self.transactions.lock().keys().cloned().collect()
  }

  fn new_reference(&self, request: &InitiateRequest) -> String {
    match self.style {
      // eSewa echoes back the merchant's own transaction id.
      Style::Esewa => request.transaction_ref.clone(),
      _ => format!("mock_{}_{}", self.provider, Uuid::new_v4().simple()),
    }
  }
}

#[async_trait]
impl GatewayAdapter for MockGateway {
  fn provider(&self) -> &str {
    &self.provider
  }

  #[instrument(name = "MockGateway::initiate", skip(self, request), fields(provider = %self.provider, payment_id = %request.payment_id, amount = request.amount))]
  async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse, GatewayError> {
    tokio::time::sleep(self.latency).await;
    if self.fail_next_initiate.swap(false, Ordering::SeqCst) {
      warn!("Mock gateway simulating an initiate outage.");
      return Err(GatewayError::Network("mock gateway unavailable".to_string()));
    }
    if request.amount <= 0 {
      return Err(GatewayError::Rejected("amount must be greater than zero".to_string()));
    }

    let provider_ref = self.new_reference(request);
    self.transactions.lock().insert(
      provider_ref.clone(),
      MockTransaction {
        amount: request.amount,
        settlement: MockSettlement::Auto,
      },
    );

    let pay_url = format!("{}/mock/{}/pay", self.base_url, self.provider);
    let raw = json!({
      "provider": self.provider,
      "reference": provider_ref,
      "amount": request.amount,
      "currency": request.currency,
    });
    let response = match self.style {
      Style::Esewa => {
        let mut form_fields = BTreeMap::new();
        form_fields.insert("amount".to_string(), request.amount.to_string());
        form_fields.insert("total_amount".to_string(), request.amount.to_string());
        form_fields.insert("transaction_uuid".to_string(), provider_ref.clone());
        form_fields.insert("product_code".to_string(), "MOCK_MERCHANT".to_string());
        form_fields.insert("success_url".to_string(), request.return_url.clone());
        form_fields.insert("failure_url".to_string(), request.return_url.clone());
        InitiateResponse {
          payment_url: Some(pay_url),
          form_fields,
          provider_ref: provider_ref.clone(),
          raw,
        }
      }
      Style::Khalti | Style::Generic => InitiateResponse {
        payment_url: Some(format!("{}?{}={}", pay_url, self.style.reference_key(), provider_ref)),
        form_fields: BTreeMap::new(),
        provider_ref: provider_ref.clone(),
        raw,
      },
    };
    info!(%provider_ref, "Mock payment opened.");
    Ok(response)
  }

  #[instrument(name = "MockGateway::verify", skip(self, _context), fields(provider = %self.provider))]
  async fn verify(&self, provider_ref: &str, _context: &JsonValue) -> Result<VerifyOutcome, GatewayError> {
    tokio::time::sleep(self.latency).await;
    if self.fail_next_verify.swap(false, Ordering::SeqCst) {
      warn!("Mock gateway simulating a verify outage.");
      return Err(GatewayError::Network("mock gateway unavailable".to_string()));
    }

    let txn = self
      .transactions
      .lock()
      .get(provider_ref)
      .cloned()
      .ok_or_else(|| GatewayError::Rejected(format!("unknown transaction '{}'", provider_ref)))?;

    let settlement = match txn.settlement {
      MockSettlement::Auto if txn.amount % 1000 == 123 => MockSettlement::Failed,
      MockSettlement::Auto => MockSettlement::Completed,
      other => other,
    };
    let (success, terminal, state) = match settlement {
      MockSettlement::Completed | MockSettlement::Auto => (true, true, "Completed"),
      MockSettlement::Failed => (false, true, "Failed"),
      MockSettlement::Ambiguous => (false, false, "AMBIGUOUS"),
    };
    info!(%provider_ref, state, "Mock verification answered.");
    Ok(VerifyOutcome {
      success,
      terminal,
      state: state.to_string(),
      raw: json!({ "reference": provider_ref, "status": state, "total_amount": txn.amount }),
    })
  }

  fn callback_reference(&self, payload: &CallbackPayload) -> Result<String, GatewayError> {
    let key = self.style.reference_key();
    payload
      .get(key)
      .map(|v| v.trim())
      .filter(|v| !v.is_empty())
      .map(str::to_string)
      .ok_or_else(|| GatewayError::Invalid(format!("callback is missing '{}'", key)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request(amount: i64) -> InitiateRequest {
    InitiateRequest {
      payment_id: Uuid::new_v4(),
      order_id: Uuid::new_v4(),
      order_number: "ORD-20260101-ABCDEF12".to_string(),
      amount,
      currency: "NPR".to_string(),
      transaction_ref: Uuid::new_v4().to_string(),
      return_url: "http://localhost/return".to_string(),
      metadata: BTreeMap::new(),
    }
  }

  #[tokio::test]
  async fn khalti_style_redirects_with_pidx() {
    let gateway = MockGateway::new("Khalti", "http://localhost:8080").with_latency(Duration::ZERO);
    let response = gateway.initiate(&request(2250)).await.unwrap();
    assert!(response.form_fields.is_empty());
    assert!(response.payment_url.unwrap().contains(&format!("pidx={}", response.provider_ref)));

    let mut payload = CallbackPayload::new();
    payload.insert("pidx".to_string(), response.provider_ref.clone());
    assert_eq!(gateway.callback_reference(&payload).unwrap(), response.provider_ref);
  }

  #[tokio::test]
  async fn esewa_style_posts_a_form_keyed_by_our_reference() {
    let gateway = MockGateway::new("esewa", "http://localhost:8080").with_latency(Duration::ZERO);
    let req = request(2250);
    let response = gateway.initiate(&req).await.unwrap();
    assert_eq!(response.provider_ref, req.transaction_ref);
    assert_eq!(response.form_fields.get("transaction_uuid"), Some(&req.transaction_ref));
    assert!(gateway.callback_reference(&CallbackPayload::new()).is_err());
  }

  #[tokio::test]
  async fn verify_reports_settlement_and_outages() {
    let gateway = MockGateway::new("fakepay", "http://localhost").with_latency(Duration::ZERO);
    let ok = gateway.initiate(&request(2250)).await.unwrap();
    let declined = gateway.initiate(&request(1123)).await.unwrap();

    assert_eq!(gateway.verify(&ok.provider_ref, &JsonValue::Null).await.unwrap().state, "Completed");
    let failed = gateway.verify(&declined.provider_ref, &JsonValue::Null).await.unwrap();
    assert!(!failed.success && failed.terminal);

    assert!(gateway.settle(&ok.provider_ref, MockSettlement::Ambiguous));
    let pending = gateway.verify(&ok.provider_ref, &JsonValue::Null).await.unwrap();
    assert!(!pending.success && !pending.terminal);

    gateway.fail_next_verify();
    let err = gateway.verify(&ok.provider_ref, &JsonValue::Null).await.unwrap_err();
    assert!(err.is_transient());
    assert!(gateway.verify("missing", &JsonValue::Null).await.is_err());
  }
}
