#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};
use serde_json::Value;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tower::util::ServiceExt;
use uuid::Uuid;

use storefront_api as api;
use storefront_api::{
    config::AppConfig,
    entities::{coupon, product_variant},
    errors::ServiceError,
    services::payment_gateway::{PaymentGateway, ProviderOrder},
};

pub const TEST_WEBHOOK_SECRET: &str = "test_webhook_secret_0123456789abcdef";

/// Gateway double with programmable failures. Successful calls hand out
/// provider order ids `order_abc`, `order_def`, ... in sequence.
pub struct StubGateway {
    successes: AtomicU32,
    fail_remaining: AtomicU32,
}

impl StubGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            successes: AtomicU32::new(0),
            fail_remaining: AtomicU32::new(0),
        })
    }

    /// The next `n` calls fail with a gateway error.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn calls_succeeded(&self) -> u32 {
        self.successes.load(Ordering::SeqCst)
    }
}

const PROVIDER_IDS: &[&str] = &["order_abc", "order_def", "order_ghi", "order_jkl"];

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_payment_order(
        &self,
        _amount: Decimal,
        _currency: &str,
        _metadata: Value,
    ) -> Result<ProviderOrder, ServiceError> {
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(ServiceError::GatewayError("stubbed 503".to_string()));
        }

        let n = self.successes.fetch_add(1, Ordering::SeqCst) as usize;
        let id = PROVIDER_IDS
            .get(n)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("order_{:03}", n));
        Ok(ProviderOrder { id })
    }
}

pub struct TestApp {
    pub state: Arc<api::AppState>,
    pub gateway: Arc<StubGateway>,
}

impl TestApp {
    pub fn router(&self) -> Router {
        api::app(self.state.clone())
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "debug".to_string(),
        log_json: false,
        auto_migrate: true,
        cors_allowed_origins: None,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        currency: "USD".to_string(),
        free_shipping_threshold: 1999.0,
        base_shipping_fee: 99.0,
        max_quantity_per_line: 10,
        payment_webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
        gateway_base_url: "http://localhost:0".to_string(),
        gateway_key_id: "key".to_string(),
        gateway_key_secret: "secret".to_string(),
        gateway_max_retries: 3,
        event_channel_capacity: 64,
    }
}

/// Full application wired against a fresh in-memory database.
pub async fn spawn_app() -> TestApp {
    let cfg = test_config();

    // A single pooled connection keeps every handle on the same in-memory
    // database.
    let mut options = ConnectOptions::new(cfg.database_url.clone());
    options.max_connections(1).sqlx_logging(false);
    let db = Arc::new(
        Database::connect(options)
            .await
            .expect("connect to in-memory sqlite"),
    );
    api::db::run_migrations(&db).await.expect("run migrations");

    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    tokio::spawn(api::events::process_events(event_rx));

    let gateway = StubGateway::new();
    let services = api::AppServices::build(
        db.clone(),
        &cfg,
        event_sender.clone(),
        Arc::new(api::services::cart::InMemoryCartStore::new()),
        Arc::new(api::services::catalog::DbProductCatalog::new(db.clone())),
        gateway.clone(),
    );

    let state = Arc::new(api::AppState {
        db,
        config: cfg,
        event_sender,
        services,
    });

    TestApp { state, gateway }
}

pub async fn seed_variant(
    app: &TestApp,
    sku: &str,
    price: Decimal,
    stock: i32,
) -> product_variant::Model {
    let now = Utc::now();
    product_variant::ActiveModel {
        id: Set(Uuid::new_v4()),
        sku: Set(sku.to_string()),
        name: Set(format!("Variant {}", sku)),
        price: Set(price),
        stock: Set(stock),
        color: Set(None),
        size: Set(None),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("seed variant")
}

pub async fn seed_coupon(
    app: &TestApp,
    code: &str,
    kind: coupon::CouponKind,
    value: Decimal,
    min_order_value: Decimal,
) -> coupon::Model {
    seed_coupon_full(app, code, kind, value, min_order_value, None, 100, true, 30).await
}

#[allow(clippy::too_many_arguments)]
pub async fn seed_coupon_full(
    app: &TestApp,
    code: &str,
    kind: coupon::CouponKind,
    value: Decimal,
    min_order_value: Decimal,
    max_discount: Option<Decimal>,
    usage_limit: i32,
    is_active: bool,
    expires_in_days: i64,
) -> coupon::Model {
    let now = Utc::now();
    coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set(code.to_uppercase()),
        kind: Set(kind),
        value: Set(value),
        min_order_value: Set(min_order_value),
        max_discount: Set(max_discount),
        expires_at: Set(now + Duration::days(expires_in_days)),
        usage_limit: Set(usage_limit),
        used_count: Set(0),
        is_active: Set(is_active),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("seed coupon")
}

/// Sends a JSON request through the router and returns (status, parsed body).
pub async fn request_json(
    router: Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            builder.body(Body::from(json.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.oneshot(request).await.unwrap();
    parse_response(response).await
}

/// Sends a signed webhook delivery. `secret` defaults to the app's secret;
/// pass a different one to simulate tampering.
pub async fn send_webhook(router: Router, body: &Value, secret: &str) -> (StatusCode, Value) {
    let raw = body.to_string();
    let signature = api::handlers::payment_webhooks::sign_payload(secret, raw.as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/payments/webhook")
        .header("content-type", "application/json")
        .header(api::handlers::payment_webhooks::SIGNATURE_HEADER, signature)
        .body(Body::from(raw))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    parse_response(response).await
}

async fn parse_response(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}
