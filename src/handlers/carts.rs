use crate::handlers::common::{
    created_response, no_content_response, success_response, validate_input,
};
use crate::{errors::ServiceError, services::cart::AddItemInput, AppState};
use axum::{
    extract::{Json, Path, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_cart))
        .route("/:id", get(get_cart))
        .route("/:id/items", post(add_item))
        .route("/:id/items/:sku", put(update_quantity))
        .route("/:id/items/:sku", delete(remove_item))
        .route("/:id/coupon", post(apply_coupon))
        .route("/:id/coupon", delete(remove_coupon))
        .route("/:id/clear", post(clear_cart))
}

/// Create a new, empty cart
#[utoipa::path(
    post,
    path = "/api/v1/carts",
    responses((status = 201, description = "Cart created")),
    tag = "Carts"
)]
pub async fn create_cart(
    State(state): State<Arc<AppState>>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state.services.carts.create_cart().await?;
    Ok(created_response(cart))
}

/// Get a cart with its current totals
#[utoipa::path(
    get,
    path = "/api/v1/carts/{id}",
    responses(
        (status = 200, description = "Cart found"),
        (status = 404, description = "Cart not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state.services.carts.get_cart(id).await?;
    Ok(success_response(cart))
}

/// Add an item to a cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/{id}/items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Item added, cart repriced"),
        (status = 404, description = "Cart or SKU not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Carts"
)]
pub async fn add_item(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart = state
        .services
        .carts
        .add_item(
            cart_id,
            AddItemInput {
                sku: payload.sku,
                quantity: payload.quantity,
            },
        )
        .await?;

    Ok(success_response(cart))
}

/// Set a cart line's quantity; zero removes the line
#[utoipa::path(
    put,
    path = "/api/v1/carts/{id}/items/{sku}",
    request_body = UpdateQuantityRequest,
    responses((status = 200, description = "Quantity updated, cart repriced")),
    tag = "Carts"
)]
pub async fn update_quantity(
    State(state): State<Arc<AppState>>,
    Path((cart_id, sku)): Path<(Uuid, String)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state
        .services
        .carts
        .set_quantity(cart_id, &sku, payload.quantity)
        .await?;

    Ok(success_response(cart))
}

/// Remove a line from a cart
#[utoipa::path(
    delete,
    path = "/api/v1/carts/{id}/items/{sku}",
    responses((status = 200, description = "Line removed, cart repriced")),
    tag = "Carts"
)]
pub async fn remove_item(
    State(state): State<Arc<AppState>>,
    Path((cart_id, sku)): Path<(Uuid, String)>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state.services.carts.remove_item(cart_id, &sku).await?;
    Ok(success_response(cart))
}

/// Apply a coupon code to a cart
#[utoipa::path(
    post,
    path = "/api/v1/carts/{id}/coupon",
    request_body = ApplyCouponRequest,
    responses((status = 200, description = "Coupon evaluated", body = CartWithDecision)),
    tag = "Carts"
)]
pub async fn apply_coupon(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let (cart, decision) = state
        .services
        .carts
        .apply_coupon(cart_id, &payload.code)
        .await?;

    Ok(success_response(CartWithDecision { cart, decision }))
}

/// Remove the applied coupon from a cart
#[utoipa::path(
    delete,
    path = "/api/v1/carts/{id}/coupon",
    responses((status = 200, description = "Coupon removed, cart repriced")),
    tag = "Carts"
)]
pub async fn remove_coupon(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let cart = state.services.carts.remove_coupon(cart_id).await?;
    Ok(success_response(cart))
}

/// Drop a cart and all its lines
#[utoipa::path(
    post,
    path = "/api/v1/carts/{id}/clear",
    responses((status = 204, description = "Cart cleared")),
    tag = "Carts"
)]
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    state.services.carts.clear_cart(cart_id).await?;
    Ok(no_content_response())
}

// Request/response DTOs

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    #[validate(length(min = 1))]
    pub sku: String,
    #[validate(range(min = 1))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateQuantityRequest {
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1))]
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartWithDecision {
    pub cart: crate::services::cart::CartAggregate,
    pub decision: crate::services::coupons::CouponDecision,
}
