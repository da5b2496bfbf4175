// server/src/web/routes.rs

use actix_web::web;

use crate::web::handlers::{
  admin_handlers, cart_handlers, checkout_handlers, mock_handlers, order_handlers, payment_handlers, webhook_handlers,
};

async fn health_check_handler() -> actix_web::HttpResponse {
  actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/cart")
          .route("", web::get().to(cart_handlers::get_cart_handler))
          .route("", web::delete().to(cart_handlers::clear_cart_handler))
          .route("/items", web::post().to(cart_handlers::add_item_handler))
          .route("/items/{variant_id}", web::patch().to(cart_handlers::update_item_handler))
          .route("/items/{variant_id}", web::delete().to(cart_handlers::remove_item_handler)),
      )
      .route("/checkout", web::post().to(checkout_handlers::checkout_handler))
      .service(
        web::scope("/orders")
          .route("/{order_id}", web::get().to(order_handlers::get_order_handler))
          .route(
            "/{order_id}/retry-payment",
            web::post().to(checkout_handlers::retry_payment_handler),
          ),
      )
      .service(
        web::scope("/payments")
          .route("/verify", web::post().to(payment_handlers::verify_payment_handler))
          .route("/return/{provider}", web::get().to(payment_handlers::payment_return_handler))
          .route("/return/{provider}", web::post().to(payment_handlers::payment_return_handler))
          .route("/{payment_id}", web::get().to(order_handlers::get_payment_handler)),
      )
      .service(
        web::scope("/webhooks")
          .route("/{provider}", web::get().to(webhook_handlers::webhook_handler))
          .route("/{provider}", web::post().to(webhook_handlers::webhook_handler)),
      )
      .service(web::scope("/admin").route(
        "/orders/{order_id}/status",
        web::patch().to(admin_handlers::update_order_status_handler),
      )),
  );
}

/// The mock gateway's payment page, outside the API scope like a real provider's site.
pub fn configure_mock_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::resource("/mock/{provider}/pay")
      .route(web::get().to(mock_handlers::mock_pay_handler))
      .route(web::post().to(mock_handlers::mock_pay_handler)),
  );
}
