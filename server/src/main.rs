// server/src/main.rs

use actix_web::{web as actix_data, App, HttpServer};
use checkout_core::{AuditSink, MemoryStore, Store};
use checkout_server::config::AppConfig;
use checkout_server::db::PgStore;
use checkout_server::errors::Result as AppResult;
use checkout_server::services::spawn_cart_sweeper;
use checkout_server::{build_state, web};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_span_events(FmtSpan::CLOSE);
  if json {
    builder.json().init();
  } else {
    builder.init();
  }
}

async fn open_store(config: &AppConfig) -> AppResult<(Arc<dyn Store>, Arc<dyn AuditSink>)> {
  match &config.database_url {
    Some(url) => {
      let store = PgStore::connect(url, config.store_timeout).await?;
      if config.run_migrations {
        store.migrate().await?;
      }
      let store = Arc::new(store);
      let sink: Arc<dyn AuditSink> = store.clone();
      let store: Arc<dyn Store> = store;
      Ok((store, sink))
    }
    None => {
      tracing::warn!("DATABASE_URL not set, using the in-memory store. State is lost on restart.");
      let store = Arc::new(MemoryStore::new());
      let sink: Arc<dyn AuditSink> = store.clone();
      let store: Arc<dyn Store> = store;
      Ok((store, sink))
    }
  }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  let app_config = match AppConfig::from_env() {
    Ok(cfg) => Arc::new(cfg),
    Err(e) => {
      eprintln!("Configuration error: {}", e);
      std::process::exit(1);
    }
  };
  init_tracing(app_config.log_json);
  tracing::info!("Starting checkout server...");

  let (store, audit_sink) = match open_store(&app_config).await {
    Ok(pair) => pair,
    Err(e) => {
      tracing::error!(error = %e, "Failed to open the store.");
      return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
    }
  };

  let (app_state, audit_task) = build_state(app_config.clone(), store, audit_sink);
  let sweeper = spawn_cart_sweeper(
    app_state.engine.carts(),
    app_config.cart_idle_abandon,
    app_config.cart_sweep_interval,
  );
  let with_mocks = !app_state.mock_gateways.is_empty();

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  tracing::info!("Attempting to bind server to {}...", server_address);

  let server_state = app_state.clone();
  let result = HttpServer::new(move || {
    let app = App::new()
      .app_data(actix_data::Data::new(server_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(web::configure_app_routes);
    if with_mocks {
      app.configure(web::configure_mock_routes)
    } else {
      app
    }
  })
  .bind(&server_address)?
  .run()
  .await;

  sweeper.abort();
  // Dropping the last engine handle closes the audit queue so pending entries flush.
  drop(app_state);
  match tokio::time::timeout(Duration::from_secs(5), audit_task).await {
    Ok(Ok(())) => {}
    Ok(Err(e)) => tracing::warn!(error = %e, "Audit writer did not shut down cleanly."),
    Err(_) => tracing::warn!("Audit writer still busy at shutdown, remaining entries dropped."),
  }
  tracing::info!("Checkout server stopped.");
  result
}
