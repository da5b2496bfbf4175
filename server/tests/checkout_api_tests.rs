// server/tests/checkout_api_tests.rs

use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use checkout_core::MemoryStore;
use checkout_server::config::AppConfig;
use checkout_server::services::MockSettlement;
use checkout_server::state::AppState;
use checkout_server::{build_state, web as routes};
use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::Level;
use uuid::Uuid;

static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

fn test_state() -> AppState {
  Lazy::force(&TRACING_INIT);
  let config = AppConfig::from_lookup(|name| match name {
    "APP_BASE_URL" => Some("http://shop.test".to_string()),
    "FRONTEND_RETURN_URL" => Some("http://front.test/result".to_string()),
    _ => None,
  })
  .unwrap();
  let store = Arc::new(MemoryStore::new());
  let (state, _audit_task) = build_state(Arc::new(config), store.clone(), store);
  state
}

macro_rules! app {
  ($state:expr) => {
    test::init_service(
      App::new()
        .app_data(web::Data::new($state.clone()))
        .configure(routes::configure_app_routes)
        .configure(routes::configure_mock_routes),
    )
    .await
  };
}

fn shipping() -> JsonValue {
  json!({
    "recipient_name": "Sita Sharma",
    "phone": "9800000000",
    "address_line": "Lazimpat 12",
    "city": "Kathmandu"
  })
}

#[actix_web::test]
async fn health_is_public() {
  let state = test_state();
  let app = app!(state);
  let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/health").to_request()).await;
  assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn owner_header_is_required() {
  let state = test_state();
  let app = app!(state);
  let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/cart").to_request()).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  let body: JsonValue = test::read_body_json(resp).await;
  assert_eq!(body["error"], "unauthorized");
}

#[actix_web::test]
async fn checkout_then_webhook_settles_order() {
  let state = test_state();
  let app = app!(state);
  let owner = Uuid::new_v4().to_string();

  let add = test::TestRequest::post()
    .uri("/api/v1/cart/items")
    .insert_header(("X-Owner-Id", owner.as_str()))
    .set_json(json!({ "variant_id": Uuid::new_v4(), "quantity": 2, "unit_price": 500 }))
    .to_request();
  assert_eq!(test::call_service(&app, add).await.status(), StatusCode::OK);

  let checkout = test::TestRequest::post()
    .uri("/api/v1/checkout")
    .insert_header(("X-Owner-Id", owner.as_str()))
    .set_json(json!({ "payment_method": "khalti", "shipping": shipping() }))
    .to_request();
  let resp = test::call_service(&app, checkout).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let receipt: JsonValue = test::read_body_json(resp).await;
  assert_eq!(receipt["order"]["status"], "awaiting_payment");
  assert_eq!(receipt["order"]["total_amount"], 1000);
  let pidx = receipt["payment"]["provider_ref"].as_str().unwrap().to_string();
  assert!(receipt["payment_url"].as_str().unwrap().contains(&pidx));
  let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

  let webhook = test::TestRequest::post()
    .uri("/api/v1/webhooks/khalti")
    .set_json(json!({ "pidx": pidx, "status": "Completed" }))
    .to_request();
  let resp = test::call_service(&app, webhook).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let ack: JsonValue = test::read_body_json(resp).await;
  assert_eq!(ack["outcome"], "paid");

  // A replayed webhook changes nothing.
  let replay = test::TestRequest::get()
    .uri(&format!("/api/v1/webhooks/khalti?pidx={}", pidx))
    .to_request();
  let ack: JsonValue = test::read_body_json(test::call_service(&app, replay).await).await;
  assert_eq!(ack["outcome"], "already_paid");

  let get_order = test::TestRequest::get()
    .uri(&format!("/api/v1/orders/{}", order_id))
    .insert_header(("X-Owner-Id", owner.as_str()))
    .to_request();
  let view: JsonValue = test::read_body_json(test::call_service(&app, get_order).await).await;
  assert_eq!(view["status"], "processing");
  assert_eq!(view["payment_status"], "paid");
  assert_eq!(view["payments"][0]["status"], "paid");

  // Someone else cannot read it.
  let foreign = test::TestRequest::get()
    .uri(&format!("/api/v1/orders/{}", order_id))
    .insert_header(("X-Owner-Id", Uuid::new_v4().to_string().as_str()))
    .to_request();
  assert_eq!(test::call_service(&app, foreign).await.status(), StatusCode::NOT_FOUND);
}

/// Adds one line for `owner` and checks out with `method`, returning the receipt JSON.
macro_rules! checkout_with {
  ($app:expr, $owner:expr, $method:expr) => {{
    let add = test::TestRequest::post()
      .uri("/api/v1/cart/items")
      .insert_header(("X-Owner-Id", $owner))
      .set_json(json!({ "variant_id": Uuid::new_v4(), "quantity": 1, "unit_price": 1250 }))
      .to_request();
    test::call_service(&$app, add).await;
    let checkout = test::TestRequest::post()
      .uri("/api/v1/checkout")
      .insert_header(("X-Owner-Id", $owner))
      .set_json(json!({ "payment_method": $method, "shipping": shipping() }))
      .to_request();
    let receipt: JsonValue = test::read_body_json(test::call_service(&$app, checkout).await).await;
    receipt
  }};
}

#[actix_web::test]
async fn return_redirect_reports_failure_and_unlocks_cart() {
  let state = test_state();
  let app = app!(state);
  let owner = Uuid::new_v4().to_string();
  let receipt = checkout_with!(app, owner.as_str(), "khalti");
  let pidx = receipt["payment"]["provider_ref"].as_str().unwrap().to_string();
  let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

  let gateway = state.mock_gateway("khalti").unwrap();
  assert!(gateway.settle(&pidx, MockSettlement::Failed));

  let ret = test::TestRequest::get()
    .uri(&format!("/api/v1/payments/return/khalti?pidx={}", pidx))
    .to_request();
  let resp = test::call_service(&app, ret).await;
  assert_eq!(resp.status(), StatusCode::SEE_OTHER);
  let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap().to_string();
  assert_eq!(location, format!("http://front.test/result?status=failed&order_id={}", order_id));

  let cart = test::TestRequest::get()
    .uri("/api/v1/cart")
    .insert_header(("X-Owner-Id", owner.as_str()))
    .to_request();
  let cart: JsonValue = test::read_body_json(test::call_service(&app, cart).await).await;
  assert_eq!(cart["status"], "active");
  assert_eq!(cart["items"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn mock_pay_page_redirects_to_return_endpoint() {
  let state = test_state();
  let app = app!(state);
  let owner = Uuid::new_v4().to_string();
  let receipt = checkout_with!(app, owner.as_str(), "khalti");
  let pidx = receipt["payment"]["provider_ref"].as_str().unwrap().to_string();

  let pay = test::TestRequest::get()
    .uri(&format!("/mock/khalti/pay?pidx={}&outcome=pending", pidx))
    .to_request();
  let resp = test::call_service(&app, pay).await;
  assert_eq!(resp.status(), StatusCode::SEE_OTHER);
  let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap().to_string();
  assert_eq!(location, format!("http://shop.test/api/v1/payments/return/khalti?pidx={}", pidx));

  let ret = test::TestRequest::get()
    .uri(&format!("/api/v1/payments/return/khalti?pidx={}", pidx))
    .to_request();
  let resp = test::call_service(&app, ret).await;
  let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap().to_string();
  assert!(location.starts_with("http://front.test/result?status=pending"));
}

#[actix_web::test]
async fn webhook_acks_unknowns_and_asks_for_retry_on_outage() {
  let state = test_state();
  let app = app!(state);

  let unknown_provider = test::TestRequest::post()
    .uri("/api/v1/webhooks/paypal")
    .set_form([("ref", "abc")])
    .to_request();
  let resp = test::call_service(&app, unknown_provider).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let ack: JsonValue = test::read_body_json(resp).await;
  assert_eq!(ack["status"], "ignored");

  let unknown_ref = test::TestRequest::post()
    .uri("/api/v1/webhooks/esewa")
    .set_form([("transaction_uuid", "never-issued")])
    .to_request();
  let ack: JsonValue = test::read_body_json(test::call_service(&app, unknown_ref).await).await;
  assert_eq!(ack["outcome"], "unknown_reference");

  let owner = Uuid::new_v4().to_string();
  let receipt = checkout_with!(app, owner.as_str(), "esewa");
  let reference = receipt["payment"]["provider_ref"].as_str().unwrap().to_string();
  assert_eq!(receipt["form_fields"]["transaction_uuid"], reference.as_str());

  state.mock_gateway("esewa").unwrap().fail_next_verify();
  let webhook = test::TestRequest::post()
    .uri("/api/v1/webhooks/esewa")
    .set_form([("transaction_uuid", reference.as_str())])
    .to_request();
  assert_eq!(test::call_service(&app, webhook).await.status(), StatusCode::SERVICE_UNAVAILABLE);

  let payment_id = receipt["payment"]["id"].as_str().unwrap();
  let payment = test::TestRequest::get()
    .uri(&format!("/api/v1/payments/{}", payment_id))
    .insert_header(("X-Owner-Id", owner.as_str()))
    .to_request();
  let payment: JsonValue = test::read_body_json(test::call_service(&app, payment).await).await;
  assert_eq!(payment["status"], "pending");
}

#[actix_web::test]
async fn client_verify_checks_provider() {
  let state = test_state();
  let app = app!(state);
  let owner = Uuid::new_v4().to_string();
  let receipt = checkout_with!(app, owner.as_str(), "khalti");
  let payment_id = receipt["payment"]["id"].as_str().unwrap().to_string();

  let wrong = test::TestRequest::post()
    .uri("/api/v1/payments/verify")
    .insert_header(("X-Owner-Id", owner.as_str()))
    .set_json(json!({ "payment_id": payment_id, "method": "esewa", "gateway_data": {} }))
    .to_request();
  let resp = test::call_service(&app, wrong).await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  let body: JsonValue = test::read_body_json(resp).await;
  assert_eq!(body["error"], "provider_mismatch");

  let right = test::TestRequest::post()
    .uri("/api/v1/payments/verify")
    .insert_header(("X-Owner-Id", owner.as_str()))
    .set_json(json!({ "payment_id": payment_id, "method": "khalti" }))
    .to_request();
  let report: JsonValue = test::read_body_json(test::call_service(&app, right).await).await;
  assert_eq!(report["outcome"], "paid");
}

#[actix_web::test]
async fn checkout_errors_map_to_statuses() {
  let state = test_state();
  let app = app!(state);
  let owner = Uuid::new_v4().to_string();

  let empty = test::TestRequest::post()
    .uri("/api/v1/checkout")
    .insert_header(("X-Owner-Id", owner.as_str()))
    .set_json(json!({ "payment_method": "khalti", "shipping": shipping() }))
    .to_request();
  let resp = test::call_service(&app, empty).await;
  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  let body: JsonValue = test::read_body_json(resp).await;
  assert_eq!(body["error"], "empty_cart");

  let receipt = checkout_with!(app, owner.as_str(), "cod");
  assert_eq!(receipt["order"]["status"], "pending");
  assert!(receipt.get("payment").is_none());
  let order_id = receipt["order"]["id"].as_str().unwrap().to_string();

  let illegal = test::TestRequest::patch()
    .uri(&format!("/api/v1/admin/orders/{}/status", order_id))
    .set_json(json!({ "status": "delivered" }))
    .to_request();
  assert_eq!(test::call_service(&app, illegal).await.status(), StatusCode::CONFLICT);

  let cancel = test::TestRequest::patch()
    .uri(&format!("/api/v1/admin/orders/{}/status", order_id))
    .set_json(json!({ "status": "cancelled" }))
    .to_request();
  let order: JsonValue = test::read_body_json(test::call_service(&app, cancel).await).await;
  assert_eq!(order["status"], "cancelled");
}
