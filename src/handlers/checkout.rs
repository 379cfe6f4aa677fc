use crate::handlers::common::{created_response, success_response};
use crate::{
    errors::ServiceError,
    services::orders::CreateOrderInput,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_order))
        .route("/:id", get(get_order))
}

/// Create an order from a cart. The cart's prices are treated as a client
/// snapshot only; the factory re-resolves and re-prices everything.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created", body = crate::services::orders::OrderConfirmation),
        (status = 422, description = "Price changed or stock unavailable", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state.services.carts.get_cart(payload.cart_id).await?;

    let confirmation = state
        .services
        .orders
        .create_order(
            &cart,
            CreateOrderInput {
                customer_id: payload.customer_id,
                shipping_address_id: payload.shipping_address_id,
                idempotency_key: payload.idempotency_key,
            },
        )
        .await?;

    // The order is committed; a failure to drop the session cart is not
    // worth failing the checkout over.
    if let Err(e) = state.services.carts.clear_cart(payload.cart_id).await {
        warn!(cart_id = %payload.cart_id, "Failed to clear cart after checkout: {}", e);
    }

    Ok(created_response(confirmation))
}

/// Get an order with its items and payment record
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    responses(
        (status = 200, description = "Order found", body = crate::services::orders::OrderWithPayment),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(id).await?;
    Ok(success_response(order))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub cart_id: Uuid,
    pub customer_id: Uuid,
    pub shipping_address_id: Uuid,
    pub idempotency_key: Option<String>,
}
