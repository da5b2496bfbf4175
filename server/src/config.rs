// server/src/config.rs

use crate::errors::{AppError, Result};
use checkout_core::{EngineConfig, VerifyErrorPolicy};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  /// Absent means the in-memory store (local development only).
  pub database_url: Option<String>,
  pub run_migrations: bool,
  pub app_base_url: String,
  /// Where the return endpoint sends the customer's browser.
  pub frontend_return_url: String,

  pub payment_currency: String,
  pub store_timeout: Duration,
  pub gateway_timeout: Duration,
  pub verify_error_policy: VerifyErrorPolicy,
  pub audit_queue_capacity: usize,

  pub cart_idle_abandon: Duration,
  pub cart_sweep_interval: Duration,

  /// Providers served by the mock gateway adapter.
  pub mock_gateways: Vec<String>,

  pub log_json: bool,
}

fn parse_var<T>(name: &str, raw: Option<String>, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match raw {
    None => Ok(default),
    Some(value) => value
      .trim()
      .parse::<T>()
      .map_err(|e| AppError::Config(format!("Invalid {} value '{}': {}", name, value, e))),
  }
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();
    Self::from_lookup(|name| env::var(name).ok())
  }

  /// Builds the config from any variable source; `from_env` passes the process environment.
  pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
    let server_host = get("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
    let server_port = parse_var("SERVER_PORT", get("SERVER_PORT"), 8080u16)?;
    let database_url = get("DATABASE_URL").filter(|url| !url.trim().is_empty());
    let run_migrations = parse_var("RUN_MIGRATIONS", get("RUN_MIGRATIONS"), true)?;
    let app_base_url = get("APP_BASE_URL").unwrap_or_else(|| format!("http://{}:{}", server_host, server_port));
    let frontend_return_url =
      get("FRONTEND_RETURN_URL").unwrap_or_else(|| format!("{}/checkout/result", app_base_url.trim_end_matches('/')));

    let payment_currency = get("PAYMENT_CURRENCY").unwrap_or_else(|| "NPR".to_string());
    let store_timeout = Duration::from_secs(parse_var("STORE_TIMEOUT_SECS", get("STORE_TIMEOUT_SECS"), 10u64)?);
    let gateway_timeout = Duration::from_secs(parse_var("GATEWAY_TIMEOUT_SECS", get("GATEWAY_TIMEOUT_SECS"), 20u64)?);
    let verify_error_policy = match get("VERIFY_ERROR_POLICY") {
      None => VerifyErrorPolicy::default(),
      Some(raw) => raw.parse::<VerifyErrorPolicy>().map_err(AppError::Config)?,
    };
    let audit_queue_capacity = parse_var("AUDIT_QUEUE_CAPACITY", get("AUDIT_QUEUE_CAPACITY"), 1024usize)?;

    let idle_hours = parse_var("CART_IDLE_ABANDON_HOURS", get("CART_IDLE_ABANDON_HOURS"), 72u64)?;
    let sweep_secs = parse_var("CART_SWEEP_INTERVAL_SECS", get("CART_SWEEP_INTERVAL_SECS"), 900u64)?;
    if sweep_secs == 0 {
      return Err(AppError::Config("CART_SWEEP_INTERVAL_SECS must be positive".to_string()));
    }

    let mock_gateways = get("MOCK_GATEWAYS")
      .unwrap_or_else(|| "khalti,esewa".to_string())
      .split(',')
      .map(|name| name.trim().to_ascii_lowercase())
      .filter(|name| !name.is_empty())
      .collect();

    let log_json = get("LOG_FORMAT").map(|f| f.eq_ignore_ascii_case("json")).unwrap_or(false);

    Ok(Self {
      server_host,
      server_port,
      database_url,
      run_migrations,
      app_base_url,
      frontend_return_url,
      payment_currency,
      store_timeout,
      gateway_timeout,
      verify_error_policy,
      audit_queue_capacity,
      cart_idle_abandon: Duration::from_secs(idle_hours * 3600),
      cart_sweep_interval: Duration::from_secs(sweep_secs),
      mock_gateways,
      log_json,
    })
  }

  pub fn engine_config(&self) -> EngineConfig {
    EngineConfig {
      currency: self.payment_currency.clone(),
      store_timeout: self.store_timeout,
      gateway_timeout: self.gateway_timeout,
      verify_error_policy: self.verify_error_policy,
      return_url_base: format!("{}/api/v1/payments/return", self.app_base_url.trim_end_matches('/')),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |name| vars.get(name).cloned()
  }

  #[test]
  fn defaults_apply_without_any_variable() {
    let config = AppConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(config.server_port, 8080);
    assert!(config.database_url.is_none());
    assert_eq!(config.mock_gateways, vec!["khalti", "esewa"]);
    assert_eq!(config.verify_error_policy, VerifyErrorPolicy::ReleaseCart);
    assert_eq!(
      config.engine_config().return_url_base,
      "http://127.0.0.1:8080/api/v1/payments/return"
    );
  }

  #[test]
  fn invalid_values_are_config_errors() {
    let err = AppConfig::from_lookup(lookup(&[("SERVER_PORT", "eighty")])).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
    let err = AppConfig::from_lookup(lookup(&[("VERIFY_ERROR_POLICY", "shrug")])).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
  }

  #[test]
  fn overrides_are_read() {
    let config = AppConfig::from_lookup(lookup(&[
      ("DATABASE_URL", "postgres://localhost/shop"),
      ("VERIFY_ERROR_POLICY", "keep_locked"),
      ("MOCK_GATEWAYS", " Khalti , ,fonepay"),
      ("GATEWAY_TIMEOUT_SECS", "3"),
    ]))
    .unwrap();
    assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/shop"));
    assert_eq!(config.verify_error_policy, VerifyErrorPolicy::KeepLocked);
    assert_eq!(config.mock_gateways, vec!["khalti", "fonepay"]);
    assert_eq!(config.gateway_timeout, Duration::from_secs(3));
  }
}
