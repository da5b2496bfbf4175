// server/src/lib.rs

//! HTTP surface, Postgres storage and bootstrap for the checkout reconciliation engine.

pub mod config;
pub mod db;
pub mod errors;
pub mod services;
pub mod state;
pub mod web;

use checkout_core::{AuditLog, AuditSink, GatewayRegistry, Reconciler, Store};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::AppConfig;
use crate::services::MockGateway;
use crate::state::AppState;

/// Wires the engine over `store`, registers the configured mock gateways and
/// starts the audit writer. The returned handle ends once every [`AuditLog`]
/// clone is dropped.
pub fn build_state(
  config: Arc<AppConfig>,
  store: Arc<dyn Store>,
  audit_sink: Arc<dyn AuditSink>,
) -> (AppState, JoinHandle<()>) {
  let gateways = GatewayRegistry::new();
  let mut mocks = HashMap::new();
  for provider in &config.mock_gateways {
    let mock = Arc::new(MockGateway::new(provider, &config.app_base_url));
    gateways.register(mock.clone());
    mocks.insert(provider.to_ascii_lowercase(), mock);
  }
  info!(providers = ?gateways.providers(), "Payment gateways registered.");

  let (audit, audit_task) = AuditLog::spawn(audit_sink, config.audit_queue_capacity);
  let engine = Reconciler::new(store, gateways, audit, config.engine_config());
  (AppState::new(engine, config, mocks), audit_task)
}
