// core/src/config.rs

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::CheckoutError;

/// What a verification that failed for transport reasons does to an unpaid order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyErrorPolicy {
  /// Payment stays pending, the order is flagged `payment_failed` and the cart is unlocked.
  #[default]
  ReleaseCart,
  /// Nothing changes; the next verify decides.
  KeepLocked,
}

impl std::str::FromStr for VerifyErrorPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "release_cart" => Ok(VerifyErrorPolicy::ReleaseCart),
      "keep_locked" => Ok(VerifyErrorPolicy::KeepLocked),
      other => Err(format!("unknown verify error policy '{}'", other)),
    }
  }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub currency: String,
  /// Deadline for each transactional unit of work.
  pub store_timeout: Duration,
  /// Deadline for a single gateway call.
  pub gateway_timeout: Duration,
  pub verify_error_policy: VerifyErrorPolicy,
  /// Base URL handed to gateways as the customer return target; the provider name is appended.
  pub return_url_base: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      currency: "NPR".to_string(),
      store_timeout: Duration::from_secs(10),
      gateway_timeout: Duration::from_secs(20),
      verify_error_policy: VerifyErrorPolicy::default(),
      return_url_base: "http://localhost:8080/api/v1/payments/return".to_string(),
    }
  }
}

impl EngineConfig {
  pub fn return_url_for(&self, provider: &str) -> String {
    format!("{}/{}", self.return_url_base.trim_end_matches('/'), provider)
  }
}

/// Runs `fut` under `limit`, mapping an elapsed deadline to [`CheckoutError::Timeout`].
pub async fn with_deadline<T, F>(what: &'static str, limit: Duration, fut: F) -> Result<T, CheckoutError>
where
  F: Future<Output = Result<T, CheckoutError>>,
{
  match tokio::time::timeout(limit, fut).await {
    Ok(result) => result,
    Err(_) => {
      tracing::warn!(operation = what, limit_ms = limit.as_millis() as u64, "Operation exceeded its deadline.");
      Err(CheckoutError::Timeout(what))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn policy_parses_env_spelling() {
    assert_eq!("keep_locked".parse::<VerifyErrorPolicy>().unwrap(), VerifyErrorPolicy::KeepLocked);
    assert_eq!(" Release_Cart ".parse::<VerifyErrorPolicy>().unwrap(), VerifyErrorPolicy::ReleaseCart);
    assert!("escalate".parse::<VerifyErrorPolicy>().is_err());
  }

  #[tokio::test]
  async fn deadline_maps_to_timeout() {
    let err = with_deadline("slow op", Duration::from_millis(5), async {
      tokio::time::sleep(Duration::from_millis(200)).await;
      Ok::<_, CheckoutError>(())
    })
    .await
    .unwrap_err();
    assert!(matches!(err, CheckoutError::Timeout("slow op")));
  }

  #[test]
  fn return_url_appends_provider() {
    let config = EngineConfig {
      return_url_base: "https://shop.test/api/v1/payments/return/".into(),
      ..Default::default()
    };
    assert_eq!(config.return_url_for("khalti"), "https://shop.test/api/v1/payments/return/khalti");
  }
}
