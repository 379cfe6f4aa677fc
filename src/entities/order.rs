use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-of-record purchase request. Line items are a priced snapshot frozen
/// at checkout; after creation only `status` (reconciliation engine) and
/// `tracking_number` (fulfillment) change. Orders are never deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub shipping_address_id: Uuid,
    #[sea_orm(nullable)]
    pub coupon_code: Option<String>,
    pub currency: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub discount_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_total: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    pub status: OrderStatus,
    #[sea_orm(nullable)]
    pub tracking_number: Option<String>,
    #[sea_orm(unique, nullable)]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(has_one = "super::payment_record::Entity")]
    PaymentRecord,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::payment_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order status enumeration.
///
/// `pending → {paid, failed}` is driven by the reconciliation engine;
/// `paid → shipped → {delivered, cancelled}` by fulfillment collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// True once payment-level events can no longer move this order.
    pub fn is_payment_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    /// The full legal transition table. The reconciliation engine only drives
    /// the pending edges; the rest belong to fulfillment.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Paid, Shipped)
                | (Paid, Cancelled)
                | (Shipped, Delivered)
                | (Shipped, Cancelled)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;

    #[test]
    fn payment_events_only_move_pending_orders() {
        assert!(!Pending.is_payment_terminal());
        for status in [Paid, Failed, Shipped, Delivered, Cancelled] {
            assert!(status.is_payment_terminal());
        }
    }

    #[test]
    fn transition_table_rejects_regressions() {
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Failed));
        assert!(Paid.can_transition_to(Shipped));
        assert!(!Paid.can_transition_to(Failed));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Paid));
        assert!(!Delivered.can_transition_to(Cancelled));
    }
}
