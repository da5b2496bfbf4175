// server/src/services/cart_sweeper.rs

use chrono::Utc;
use checkout_core::CartBook;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Marks active carts idle for longer than `idle_after` as abandoned, every `every`.
pub fn spawn_cart_sweeper(carts: CartBook, idle_after: Duration, every: Duration) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(idle_after_secs = idle_after.as_secs(), every_secs = every.as_secs(), "Cart sweeper started.");
    loop {
      ticker.tick().await;
      let cutoff = match chrono::Duration::from_std(idle_after) {
        Ok(idle) => Utc::now() - idle,
        Err(e) => {
          error!(error = %e, "Cart idle window out of range, sweeper stopping.");
          return;
        }
      };
      match carts.abandon_idle(cutoff).await {
        Ok(0) => debug!("No idle carts to abandon."),
        Ok(swept) => info!(swept, %cutoff, "Abandoned idle carts."),
        Err(e) => error!(error = %e, "Cart sweep failed."),
      }
    }
  })
}
