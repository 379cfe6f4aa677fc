/*!
Storefront backend: cart pricing, coupon validation, order creation, and
payment webhook reconciliation.

The crate is organized as a thin HTTP layer (`handlers`) over domain services
(`services`) persisted through SeaORM entities (`entities`). Pricing and
coupon evaluation are pure functions; all webhook-driven state transitions
are conditional updates so duplicate and reordered deliveries are safe.
*/

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use services::{
    cart::{CartService, CartStore},
    catalog::ProductCatalog,
    coupons::CouponService,
    orders::OrderService,
    payment_gateway::PaymentGateway,
    pricing::ShippingPolicy,
    reconciliation::ReconciliationService,
};

/// Domain services used by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub carts: CartService,
    pub coupons: CouponService,
    pub orders: OrderService,
    pub reconciliation: ReconciliationService,
}

impl AppServices {
    pub fn build(
        db: Arc<DatabaseConnection>,
        cfg: &config::AppConfig,
        event_sender: Arc<events::EventSender>,
        store: Arc<dyn CartStore>,
        catalog: Arc<dyn ProductCatalog>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let policy = shipping_policy(cfg);
        let coupons = CouponService::new(db.clone(), event_sender.clone());

        let carts = CartService::new(
            store,
            catalog.clone(),
            coupons.clone(),
            event_sender.clone(),
            policy,
            cfg.max_quantity_per_line,
        );

        let orders = OrderService::new(
            db.clone(),
            catalog,
            coupons.clone(),
            gateway,
            event_sender.clone(),
            policy,
            cfg.currency.clone(),
            cfg.gateway_max_retries,
        );

        let reconciliation = ReconciliationService::new(db, coupons.clone(), event_sender);

        Self {
            carts,
            coupons,
            orders,
            reconciliation,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: AppServices,
}

/// Shipping policy from configuration. The config values are plain floats;
/// money math happens in `Decimal` from here on.
pub fn shipping_policy(cfg: &config::AppConfig) -> ShippingPolicy {
    ShippingPolicy {
        free_shipping_threshold: Decimal::from_f64_retain(cfg.free_shipping_threshold)
            .unwrap_or(dec!(1999)),
        base_fee: Decimal::from_f64_retain(cfg.base_shipping_fee).unwrap_or(dec!(99)),
    }
}

/// All v1 API routes, mounted by `main` (and tests) under `/api/v1`.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .nest("/carts", handlers::carts::carts_routes())
        .nest("/coupons", handlers::coupons::coupons_routes())
        .nest("/orders", handlers::checkout::orders_routes())
        .nest("/payments", handlers::payment_webhooks::payments_routes())
}

/// Full application router over a prepared state. Extracted from `main` so
/// integration tests drive the exact router the binary serves.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "storefront-api up" }))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "ok", "database": "up" })),
        ),
        Err(e) => {
            tracing::error!("Health check database ping failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "degraded", "database": "down" })),
            )
        }
    }
}
