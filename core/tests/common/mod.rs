// tests/common/mod.rs
#![allow(dead_code)] // Not every test binary uses every helper.

use async_trait::async_trait;
use checkout_core::model::{PaymentMethod, ShippingDetails};
use checkout_core::{
  AuditLog, CallbackPayload, CheckoutRequest, EngineConfig, GatewayAdapter, GatewayError, GatewayRegistry, InitiateRequest,
  InitiateResponse, MemoryStore, Reconciler, VerifyOutcome,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::Level;
use uuid::Uuid;

pub const PROVIDER: &str = "fakepay";

// --- Tracing, once per test binary ---
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Verify outcomes ---
pub fn completed() -> VerifyOutcome {
  VerifyOutcome {
    success: true,
    terminal: true,
    state: "Completed".into(),
    raw: json!({ "status": "Completed" }),
  }
}

pub fn ambiguous() -> VerifyOutcome {
  VerifyOutcome {
    success: false,
    terminal: false,
    state: "AMBIGUOUS".into(),
    raw: json!({ "status": "AMBIGUOUS" }),
  }
}

pub fn expired() -> VerifyOutcome {
  VerifyOutcome {
    success: false,
    terminal: true,
    state: "Expired".into(),
    raw: json!({ "status": "Expired" }),
  }
}

/// Parks one gateway call until the test lets it go.
#[derive(Default)]
pub struct CallHold {
  entered: Notify,
  release: Notify,
}

impl CallHold {
  /// Resolves once the held call has reached the gateway.
  pub async fn entered(&self) {
    self.entered.notified().await;
  }

  pub fn release(&self) {
    self.release.notify_one();
  }

  async fn park(&self) {
    self.entered.notify_one();
    self.release.notified().await;
  }
}

/// A scripted gateway. Verify answers are popped from a queue; an empty queue
/// answers `ambiguous()`. Every call checks that no store transaction is open.
pub struct FakeGateway {
  name: String,
  store: MemoryStore,
  verify_script: Mutex<VecDeque<Result<VerifyOutcome, GatewayError>>>,
  hold: Mutex<Option<Arc<CallHold>>>,
  fail_initiate: AtomicBool,
  pub initiate_calls: AtomicUsize,
  pub verify_calls: AtomicUsize,
  pub calls_inside_tx: AtomicUsize,
  pub issued_refs: Mutex<Vec<String>>,
}

impl FakeGateway {
  pub fn new(name: &str, store: MemoryStore) -> Self {
    Self {
      name: name.to_string(),
      store,
      verify_script: Mutex::new(VecDeque::new()),
      hold: Mutex::new(None),
      fail_initiate: AtomicBool::new(false),
      initiate_calls: AtomicUsize::new(0),
      verify_calls: AtomicUsize::new(0),
      calls_inside_tx: AtomicUsize::new(0),
      issued_refs: Mutex::new(Vec::new()),
    }
  }

  pub fn script_verify(&self, answer: Result<VerifyOutcome, GatewayError>) {
    self.verify_script.lock().push_back(answer);
  }

  /// The next initiate or verify call waits on the returned hold before answering.
  /// Script answers are taken after the hold is released.
  pub fn hold_next_call(&self) -> Arc<CallHold> {
    let hold = Arc::new(CallHold::default());
    *self.hold.lock() = Some(hold.clone());
    hold
  }

  pub fn fail_next_initiate(&self) {
    self.fail_initiate.store(true, Ordering::SeqCst);
  }

  pub fn last_ref(&self) -> String {
    self.issued_refs.lock().last().cloned().unwrap_or_default()
  }

  fn check_no_transaction(&self) {
    if self.store.in_transaction() {
      self.calls_inside_tx.fetch_add(1, Ordering::SeqCst);
    }
  }

  async fn wait_if_held(&self) {
    let hold = self.hold.lock().take();
    if let Some(hold) = hold {
      hold.park().await;
    }
  }
}

#[async_trait]
impl GatewayAdapter for FakeGateway {
  fn provider(&self) -> &str {
    &self.name
  }

  async fn initiate(&self, request: &InitiateRequest) -> Result<InitiateResponse, GatewayError> {
    self.check_no_transaction();
    self.initiate_calls.fetch_add(1, Ordering::SeqCst);
    self.wait_if_held().await;
    if self.fail_initiate.swap(false, Ordering::SeqCst) {
      return Err(GatewayError::Network("connection reset".into()));
    }
    let provider_ref = format!("ref-{}", request.transaction_ref);
    self.issued_refs.lock().push(provider_ref.clone());
    Ok(InitiateResponse {
      payment_url: Some(format!("https://pay.test/{}", provider_ref)),
      form_fields: BTreeMap::new(),
      provider_ref,
      raw: json!({ "amount": request.amount }),
    })
  }

  async fn verify(&self, _provider_ref: &str, _context: &JsonValue) -> Result<VerifyOutcome, GatewayError> {
    self.check_no_transaction();
    self.verify_calls.fetch_add(1, Ordering::SeqCst);
    self.wait_if_held().await;
    self.verify_script.lock().pop_front().unwrap_or_else(|| Ok(ambiguous()))
  }

  fn callback_reference(&self, payload: &CallbackPayload) -> Result<String, GatewayError> {
    payload
      .get("ref")
      .cloned()
      .ok_or_else(|| GatewayError::Invalid("missing 'ref'".into()))
  }
}

pub struct Harness {
  pub store: MemoryStore,
  pub gateway: Arc<FakeGateway>,
  pub engine: Reconciler,
}

pub fn harness() -> Harness {
  harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
  setup_tracing();
  let store = MemoryStore::new();
  let gateway = Arc::new(FakeGateway::new(PROVIDER, store.clone()));
  let registry = GatewayRegistry::new();
  registry.register(gateway.clone());
  let engine = Reconciler::new(Arc::new(store.clone()), registry, AuditLog::disabled(), config);
  Harness { store, gateway, engine }
}

impl Harness {
  /// Gives `owner` an active cart with two lines (2 x 500 + 1 x 1250).
  pub async fn seed_cart(&self, owner: Uuid) {
    let carts = self.engine.carts();
    carts.add_item(owner, Uuid::new_v4(), 2, 500).await.unwrap();
    carts.add_item(owner, Uuid::new_v4(), 1, 1250).await.unwrap();
  }

  pub fn callback(&self, provider_ref: &str) -> CallbackPayload {
    BTreeMap::from([("ref".to_string(), provider_ref.to_string())])
  }
}

pub fn shipping() -> ShippingDetails {
  ShippingDetails {
    recipient_name: "Sita Sharma".into(),
    phone: "9800000000".into(),
    address_line: "Lakeside Road 4".into(),
    city: "Pokhara".into(),
    landmark: None,
  }
}

pub fn online() -> PaymentMethod {
  PaymentMethod::Gateway(PROVIDER.to_string())
}

pub fn checkout_request(method: PaymentMethod) -> CheckoutRequest {
  CheckoutRequest {
    payment_method: method,
    shipping: shipping(),
  }
}
