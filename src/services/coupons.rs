use crate::{
    entities::coupon::{self, CouponKind, Entity as Coupon},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Why a coupon was not applicable. Ordering of the checks is part of the
/// contract: the first failing rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CouponRejection {
    InvalidCode,
    Inactive,
    Expired,
    UsageExhausted,
    BelowMinimum,
}

impl CouponRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCode => "invalid_code",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
            Self::UsageExhausted => "usage_exhausted",
            Self::BelowMinimum => "below_minimum",
        }
    }
}

/// Result of validating a coupon against a subtotal. Validation never mutates
/// usage counters; `used_count` moves only when an order completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CouponDecision {
    pub applicable: bool,
    #[schema(value_type = String, example = "300.00")]
    pub discount_amount: Decimal,
    pub shipping_waived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CouponRejection>,
}

impl CouponDecision {
    /// Decision for a cart with no coupon applied.
    pub fn none() -> Self {
        Self {
            applicable: false,
            discount_amount: Decimal::ZERO,
            shipping_waived: false,
            reason: None,
        }
    }

    pub fn fixed_discount(amount: Decimal) -> Self {
        Self {
            applicable: true,
            discount_amount: amount,
            shipping_waived: false,
            reason: None,
        }
    }

    fn rejected(reason: CouponRejection) -> Self {
        Self {
            applicable: false,
            discount_amount: Decimal::ZERO,
            shipping_waived: false,
            reason: Some(reason),
        }
    }
}

/// Normalized form used for storage and lookup; makes code matching
/// case-insensitive.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Evaluates the coupon rule chain. Rules run in order; the first failure
/// wins: unknown code, inactive, expired, usage exhausted, below minimum.
pub fn evaluate(
    coupon: Option<&coupon::Model>,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> CouponDecision {
    let coupon = match coupon {
        Some(c) => c,
        None => return CouponDecision::rejected(CouponRejection::InvalidCode),
    };

    if !coupon.is_active {
        return CouponDecision::rejected(CouponRejection::Inactive);
    }
    if now > coupon.expires_at {
        return CouponDecision::rejected(CouponRejection::Expired);
    }
    if coupon.used_count >= coupon.usage_limit {
        return CouponDecision::rejected(CouponRejection::UsageExhausted);
    }
    if subtotal < coupon.min_order_value {
        return CouponDecision::rejected(CouponRejection::BelowMinimum);
    }

    match coupon.kind {
        CouponKind::Percentage => {
            let raw = (subtotal * coupon.value / Decimal::from(100))
                .round_dp_with_strategy(2, RoundingStrategy::ToZero);
            let capped = match coupon.max_discount {
                Some(max) => raw.min(max),
                None => raw,
            };
            CouponDecision {
                applicable: true,
                discount_amount: capped.min(subtotal),
                shipping_waived: false,
                reason: None,
            }
        }
        CouponKind::Fixed => CouponDecision {
            applicable: true,
            discount_amount: coupon.value.min(subtotal),
            shipping_waived: false,
            reason: None,
        },
        CouponKind::FreeShipping => CouponDecision {
            applicable: true,
            discount_amount: Decimal::ZERO,
            shipping_waived: true,
            reason: None,
        },
    }
}

/// Input for creating a coupon (admin operation).
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateCouponInput {
    pub code: String,
    #[schema(value_type = String, example = "percentage")]
    pub kind: CouponKind,
    #[schema(value_type = String, example = "20")]
    pub value: Decimal,
    #[schema(value_type = String, example = "1000")]
    pub min_order_value: Decimal,
    #[schema(value_type = Option<String>)]
    pub max_discount: Option<Decimal>,
    pub expires_at: DateTime<Utc>,
    pub usage_limit: i32,
}

/// Coupon lookup, validation, and lifecycle service.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .one(&*self.db)
            .await?;
        Ok(coupon)
    }

    /// Validates a coupon code against a subtotal. Read-only: repeated calls
    /// from the coupon box never consume usage.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Decimal,
    ) -> Result<CouponDecision, ServiceError> {
        let coupon = self.find_by_code(code).await?;
        Ok(evaluate(coupon.as_ref(), subtotal, Utc::now()))
    }

    /// Creates a coupon (admin operation).
    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(
        &self,
        input: CreateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        if input.usage_limit < 1 {
            return Err(ServiceError::ValidationError(
                "usage_limit must be at least 1".to_string(),
            ));
        }
        if input.value < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "value must not be negative".to_string(),
            ));
        }

        let now = Utc::now();
        let code = normalize_code(&input.code);
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            kind: Set(input.kind),
            value: Set(input.value),
            min_order_value: Set(input.min_order_value),
            max_discount: Set(input.max_discount),
            expires_at: Set(input.expires_at),
            usage_limit: Set(input.usage_limit),
            used_count: Set(0),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let coupon = model.insert(&*self.db).await?;
        self.event_sender
            .send_or_log(Event::CouponCreated(code))
            .await;
        info!("Created coupon: {}", coupon.code);
        Ok(coupon)
    }

    /// Deactivates a coupon (admin operation).
    #[instrument(skip(self))]
    pub async fn deactivate(&self, code: &str) -> Result<coupon::Model, ServiceError> {
        let coupon = self
            .find_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", code)))?;

        let code = coupon.code.clone();
        let mut active: coupon::ActiveModel = coupon.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CouponDeactivated(code))
            .await;
        Ok(updated)
    }

    /// Increments `used_count`, guarded by the usage limit. Called exactly
    /// once per order, on the first successful `pending -> paid` transition.
    #[instrument(skip(self))]
    pub async fn record_usage(&self, code: &str) -> Result<bool, ServiceError> {
        let result = Coupon::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Code.eq(normalize_code(code)))
            .filter(
                Expr::col(coupon::Column::UsedCount).lt(Expr::col(coupon::Column::UsageLimit)),
            )
            .exec(&*self.db)
            .await?;

        let recorded = result.rows_affected == 1;
        if recorded {
            self.event_sender
                .send_or_log(Event::CouponRedeemed(normalize_code(code)))
                .await;
        }
        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon_fixture() -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE20".to_string(),
            kind: CouponKind::Fixed,
            value: dec!(300),
            min_order_value: dec!(1000),
            max_discount: None,
            expires_at: Utc::now() + Duration::days(30),
            usage_limit: 100,
            used_count: 0,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn unknown_code_is_invalid() {
        let decision = evaluate(None, dec!(5000), Utc::now());
        assert!(!decision.applicable);
        assert_eq!(decision.reason, Some(CouponRejection::InvalidCode));
        assert_eq!(decision.discount_amount, Decimal::ZERO);
    }

    #[test]
    fn inactive_wins_over_expired() {
        let mut coupon = coupon_fixture();
        coupon.is_active = false;
        coupon.expires_at = Utc::now() - Duration::days(1);
        let decision = evaluate(Some(&coupon), dec!(5000), Utc::now());
        assert_eq!(decision.reason, Some(CouponRejection::Inactive));
    }

    #[test]
    fn expired_coupon_yields_zero_discount() {
        let mut coupon = coupon_fixture();
        coupon.code = "EXPIRED1".to_string();
        coupon.expires_at = Utc::now() - Duration::days(1);
        let decision = evaluate(Some(&coupon), dec!(5000), Utc::now());
        assert!(!decision.applicable);
        assert_eq!(decision.reason, Some(CouponRejection::Expired));
        assert_eq!(decision.discount_amount, Decimal::ZERO);
    }

    #[test]
    fn exhausted_usage_rejected_before_minimum_check() {
        let mut coupon = coupon_fixture();
        coupon.used_count = coupon.usage_limit;
        let decision = evaluate(Some(&coupon), dec!(1), Utc::now());
        assert_eq!(decision.reason, Some(CouponRejection::UsageExhausted));
    }

    #[test]
    fn below_minimum_rejected() {
        let coupon = coupon_fixture();
        let decision = evaluate(Some(&coupon), dec!(999.99), Utc::now());
        assert_eq!(decision.reason, Some(CouponRejection::BelowMinimum));
    }

    #[test]
    fn fixed_discount_capped_at_subtotal() {
        let mut coupon = coupon_fixture();
        coupon.min_order_value = Decimal::ZERO;
        let decision = evaluate(Some(&coupon), dec!(200), Utc::now());
        assert!(decision.applicable);
        assert_eq!(decision.discount_amount, dec!(200));
    }

    #[test]
    fn percentage_rounds_down_to_smallest_unit() {
        let mut coupon = coupon_fixture();
        coupon.kind = CouponKind::Percentage;
        coupon.value = dec!(10);
        coupon.min_order_value = Decimal::ZERO;
        // 10% of 10.99 = 1.099 -> rounds down to 1.09
        let decision = evaluate(Some(&coupon), dec!(10.99), Utc::now());
        assert_eq!(decision.discount_amount, dec!(1.09));
    }

    #[test]
    fn percentage_respects_max_discount() {
        let mut coupon = coupon_fixture();
        coupon.kind = CouponKind::Percentage;
        coupon.value = dec!(20);
        coupon.min_order_value = Decimal::ZERO;
        coupon.max_discount = Some(dec!(50));
        let decision = evaluate(Some(&coupon), dec!(1000), Utc::now());
        assert_eq!(decision.discount_amount, dec!(50));
    }

    #[test]
    fn percentage_never_exceeds_subtotal() {
        let mut coupon = coupon_fixture();
        coupon.kind = CouponKind::Percentage;
        coupon.value = dec!(100);
        coupon.min_order_value = Decimal::ZERO;
        coupon.max_discount = None;
        let decision = evaluate(Some(&coupon), dec!(42), Utc::now());
        assert_eq!(decision.discount_amount, dec!(42));
    }

    #[test]
    fn free_shipping_waives_without_discount() {
        let mut coupon = coupon_fixture();
        coupon.kind = CouponKind::FreeShipping;
        coupon.min_order_value = Decimal::ZERO;
        let decision = evaluate(Some(&coupon), dec!(10), Utc::now());
        assert!(decision.applicable);
        assert!(decision.shipping_waived);
        assert_eq!(decision.discount_amount, Decimal::ZERO);
    }

    #[test]
    fn codes_normalize_case_insensitively() {
        assert_eq!(normalize_code("  save20 "), "SAVE20");
        assert_eq!(normalize_code("Save20"), "SAVE20");
    }
}
