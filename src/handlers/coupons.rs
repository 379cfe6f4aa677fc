use crate::handlers::common::{created_response, success_response, validate_input};
use crate::{
    errors::ServiceError,
    services::coupons::CreateCouponInput,
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

/// Creates the router for coupon endpoints
pub fn coupons_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_coupon))
        .route("/validate", post(validate_coupon))
        .route("/:code/deactivate", post(deactivate_coupon))
}

/// Validate a coupon code against a subtotal. Read-only; repeated calls never
/// consume usage.
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    request_body = ValidateCouponRequest,
    responses((status = 200, description = "Decision", body = crate::services::coupons::CouponDecision)),
    tag = "Coupons"
)]
pub async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let decision = state
        .services
        .coupons
        .validate(&payload.code, payload.subtotal)
        .await?;

    Ok(success_response(decision))
}

/// Create a coupon (admin)
#[utoipa::path(
    post,
    path = "/api/v1/coupons",
    request_body = CreateCouponInput,
    responses((status = 201, description = "Coupon created")),
    tag = "Coupons"
)]
pub async fn create_coupon(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCouponInput>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let coupon = state.services.coupons.create_coupon(payload).await?;
    Ok(created_response(coupon))
}

/// Deactivate a coupon (admin)
#[utoipa::path(
    post,
    path = "/api/v1/coupons/{code}/deactivate",
    responses(
        (status = 200, description = "Coupon deactivated"),
        (status = 404, description = "Coupon not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn deactivate_coupon(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<impl axum::response::IntoResponse, ServiceError> {
    let coupon = state.services.coupons.deactivate(&code).await?;
    Ok(success_response(coupon))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1))]
    pub code: String,
    #[schema(value_type = String, example = "2000.00")]
    pub subtotal: Decimal,
}
