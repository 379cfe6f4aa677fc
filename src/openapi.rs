use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Order & Payment API

Order pricing and payment reconciliation for a retail storefront.

## Features

- **Carts**: session carts with server-side repricing on every mutation
- **Coupons**: percentage, fixed, and free-shipping codes with usage limits
- **Checkout**: price and stock re-verification, transactional order creation
- **Payments**: provider payment sessions with bounded retries
- **Webhooks**: HMAC-verified, idempotent payment reconciliation

## Error Handling

Errors use a consistent response format:

```json
{
  "error": "Not Found",
  "message": "Order 123 not found",
  "timestamp": "2026-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    paths(
        // Carts
        crate::handlers::carts::create_cart,
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_quantity,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::apply_coupon,
        crate::handlers::carts::remove_coupon,
        crate::handlers::carts::clear_cart,

        // Coupons
        crate::handlers::coupons::validate_coupon,
        crate::handlers::coupons::create_coupon,
        crate::handlers::coupons::deactivate_coupon,

        // Orders
        crate::handlers::checkout::create_order,
        crate::handlers::checkout::get_order,

        // Payments
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::handlers::carts::AddItemRequest,
        crate::handlers::carts::UpdateQuantityRequest,
        crate::handlers::carts::ApplyCouponRequest,
        crate::handlers::carts::CartWithDecision,
        crate::handlers::coupons::ValidateCouponRequest,
        crate::handlers::checkout::CheckoutRequest,
        crate::services::cart::CartAggregate,
        crate::services::coupons::CouponDecision,
        crate::services::coupons::CouponRejection,
        crate::services::coupons::CreateCouponInput,
        crate::services::orders::CreateOrderInput,
        crate::services::orders::OrderConfirmation,
        crate::services::pricing::LineItem,
        crate::services::pricing::CartTotals,
    )),
    tags(
        (name = "Carts", description = "Cart management endpoints"),
        (name = "Coupons", description = "Coupon validation and administration"),
        (name = "Orders", description = "Checkout and order read endpoints"),
        (name = "Payments", description = "Payment provider callbacks")
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
