use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::services::coupons::CouponDecision;

/// One cart line. `unit_price` is the snapshot taken when the line was added;
/// catalog price changes never alter it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LineItem {
    pub sku: String,
    #[schema(value_type = String, example = "499.00")]
    pub unit_price: Decimal,
    pub quantity: u32,
    pub color: Option<String>,
    pub size: Option<String>,
}

impl LineItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Shipping cost policy: free at or above the threshold, flat fee below it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShippingPolicy {
    pub free_shipping_threshold: Decimal,
    pub base_fee: Decimal,
}

/// Computed money breakdown for a cart or order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct CartTotals {
    #[schema(value_type = String, example = "2000.00")]
    pub subtotal: Decimal,
    #[schema(value_type = String, example = "300.00")]
    pub discount: Decimal,
    #[schema(value_type = String, example = "0.00")]
    pub shipping: Decimal,
    #[schema(value_type = String, example = "1700.00")]
    pub total: Decimal,
}

/// Prices a set of line items under a coupon decision and shipping policy.
///
/// Pure and deterministic: totals shown to the user are recomputed from the
/// same inputs the server charges against, never cached. The discount is
/// already capped by the coupon validator; the total is still clamped at zero
/// as a last line of defense.
pub fn price(items: &[LineItem], decision: &CouponDecision, policy: &ShippingPolicy) -> CartTotals {
    let subtotal: Decimal = items.iter().map(LineItem::line_total).sum();

    let discount = decision.discount_amount.min(subtotal);

    let shipping = if decision.shipping_waived || subtotal >= policy.free_shipping_threshold {
        Decimal::ZERO
    } else if subtotal > Decimal::ZERO {
        policy.base_fee
    } else {
        Decimal::ZERO
    };

    let total = (subtotal - discount).max(Decimal::ZERO) + shipping;

    CartTotals {
        subtotal,
        discount,
        shipping,
        total,
    }
}
