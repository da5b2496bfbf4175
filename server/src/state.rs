// server/src/state.rs

use crate::config::AppConfig;
use crate::services::gateway_mock::MockGateway;
use checkout_core::Reconciler;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
  pub engine: Reconciler,
  pub config: Arc<AppConfig>,
  /// Mock adapters by provider name, also registered with the engine.
  pub mock_gateways: Arc<HashMap<String, Arc<MockGateway>>>,
}

impl AppState {
  pub fn new(engine: Reconciler, config: Arc<AppConfig>, mock_gateways: HashMap<String, Arc<MockGateway>>) -> Self {
    Self {
      engine,
      config,
      mock_gateways: Arc::new(mock_gateways),
    }
  }

  pub fn mock_gateway(&self, provider: &str) -> Option<&Arc<MockGateway>> {
    self.mock_gateways.get(&provider.to_ascii_lowercase())
  }
}
