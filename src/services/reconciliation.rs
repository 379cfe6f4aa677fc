use crate::{
    entities::{
        order::{self, Entity as Order, OrderStatus},
        payment_record::{self, Entity as PaymentRecord, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::CouponService,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A verified, typed webhook notification. Parsing is strict for known event
/// types (missing entity fields are malformed input) and permissive for
/// unknown ones, which are acknowledged and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentCaptured {
        provider_payment_id: String,
        provider_order_id: String,
    },
    PaymentFailed {
        provider_order_id: String,
    },
    OrderPaid {
        provider_order_id: String,
    },
    Unknown {
        event: String,
    },
}

impl WebhookEvent {
    pub fn parse(json: &Value) -> Result<Self, ServiceError> {
        let event = json
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::BadRequest("missing event field".to_string()))?;

        let payment_entity = || json.pointer("/payload/payment/entity");
        let order_entity = || json.pointer("/payload/order/entity");

        match event {
            "payment.captured" => {
                let entity = payment_entity().ok_or_else(|| {
                    ServiceError::BadRequest("missing payment entity".to_string())
                })?;
                Ok(Self::PaymentCaptured {
                    provider_payment_id: require_str(entity, "id")?,
                    provider_order_id: require_str(entity, "order_id")?,
                })
            }
            "payment.failed" => {
                let entity = payment_entity().ok_or_else(|| {
                    ServiceError::BadRequest("missing payment entity".to_string())
                })?;
                Ok(Self::PaymentFailed {
                    provider_order_id: require_str(entity, "order_id")?,
                })
            }
            "order.paid" => {
                let entity = order_entity().ok_or_else(|| {
                    ServiceError::BadRequest("missing order entity".to_string())
                })?;
                Ok(Self::OrderPaid {
                    provider_order_id: require_str(entity, "id")?,
                })
            }
            other => Ok(Self::Unknown {
                event: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::PaymentCaptured { .. } => "payment.captured",
            Self::PaymentFailed { .. } => "payment.failed",
            Self::OrderPaid { .. } => "order.paid",
            Self::Unknown { event } => event,
        }
    }
}

fn require_str(entity: &Value, field: &str) -> Result<String, ServiceError> {
    entity
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ServiceError::BadRequest(format!("missing {} field", field)))
}

/// What a reconciliation pass did. Everything here is an acknowledged
/// outcome; only transport-level failures bubble up as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The transition was applied for the first time.
    Applied,
    /// Replay of an already-applied event; state unchanged.
    AlreadyApplied,
    /// Event references nothing we track, or its type is unknown.
    Ignored,
    /// Event would have regressed a settled state; recorded, not applied.
    Anomaly,
}

/// Maps verified webhook events onto order/payment transitions. Every write
/// is a conditional update ("set status X where status = Y"), which makes the
/// handler safe under concurrent, duplicate, and reordered deliveries of
/// events for the same order without any locking.
#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    coupons: CouponService,
    event_sender: Arc<EventSender>,
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        coupons: CouponService,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            coupons,
            event_sender,
        }
    }

    #[instrument(skip(self, payload), fields(event = %event.name()))]
    pub async fn apply(
        &self,
        event: WebhookEvent,
        payload: Value,
    ) -> Result<ReconcileOutcome, ServiceError> {
        match event {
            WebhookEvent::PaymentCaptured {
                provider_payment_id,
                provider_order_id,
            } => {
                self.apply_captured(&provider_payment_id, &provider_order_id, payload)
                    .await
            }
            WebhookEvent::PaymentFailed { provider_order_id } => {
                self.apply_failed(&provider_order_id, payload).await
            }
            WebhookEvent::OrderPaid { provider_order_id } => {
                self.apply_order_paid(&provider_order_id, payload).await
            }
            WebhookEvent::Unknown { event } => {
                info!("Ignoring unknown webhook event type: {}", event);
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    async fn apply_captured(
        &self,
        provider_payment_id: &str,
        provider_order_id: &str,
        payload: Value,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let record = match self.record_for(provider_order_id).await? {
            Some(record) => record,
            None => return Ok(ReconcileOutcome::Ignored),
        };

        if let Some(existing) = &record.provider_payment_id {
            if existing != provider_payment_id {
                self.emit_anomaly(
                    Some(record.order_id),
                    "payment.captured",
                    format!(
                        "payment {} captured but record already holds {}",
                        provider_payment_id, existing
                    ),
                )
                .await;
                return Ok(ReconcileOutcome::Anomaly);
            }
        }

        // Idempotent capture: only a non-captured record is updated.
        let updated = PaymentRecord::update_many()
            .col_expr(
                payment_record::Column::ProviderPaymentId,
                Expr::value(provider_payment_id),
            )
            .col_expr(
                payment_record::Column::Status,
                Expr::value(PaymentStatus::Captured),
            )
            .col_expr(
                payment_record::Column::LastWebhookPayload,
                Expr::value(payload),
            )
            .col_expr(payment_record::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment_record::Column::OrderId.eq(record.order_id))
            .filter(payment_record::Column::Status.ne(PaymentStatus::Captured))
            .exec(&*self.db)
            .await?;

        let order_outcome = self.transition_to_paid(record.order_id).await?;

        if updated.rows_affected == 1 {
            self.event_sender
                .send_or_log(Event::PaymentCaptured {
                    order_id: record.order_id,
                    provider_payment_id: provider_payment_id.to_string(),
                })
                .await;
            Ok(ReconcileOutcome::Applied)
        } else {
            Ok(order_outcome)
        }
    }

    async fn apply_failed(
        &self,
        provider_order_id: &str,
        payload: Value,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let record = match self.record_for(provider_order_id).await? {
            Some(record) => record,
            None => return Ok(ReconcileOutcome::Ignored),
        };

        // A failure never regresses a captured payment; only the initial
        // `created` state can move to `failed`.
        PaymentRecord::update_many()
            .col_expr(
                payment_record::Column::Status,
                Expr::value(PaymentStatus::Failed),
            )
            .col_expr(
                payment_record::Column::LastWebhookPayload,
                Expr::value(payload),
            )
            .col_expr(payment_record::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment_record::Column::OrderId.eq(record.order_id))
            .filter(payment_record::Column::Status.eq(PaymentStatus::Created))
            .exec(&*self.db)
            .await?;

        let transitioned = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Failed))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(record.order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&*self.db)
            .await?;

        if transitioned.rows_affected == 1 {
            self.event_sender
                .send_or_log(Event::OrderFailed(record.order_id))
                .await;
            self.event_sender
                .send_or_log(Event::PaymentFailed(record.order_id))
                .await;
            return Ok(ReconcileOutcome::Applied);
        }

        match self.order_status(record.order_id).await? {
            Some(OrderStatus::Failed) => Ok(ReconcileOutcome::AlreadyApplied),
            Some(OrderStatus::Paid) | Some(OrderStatus::Shipped) | Some(OrderStatus::Delivered) => {
                // Out-of-order delivery: the order already settled as paid.
                self.emit_anomaly(
                    Some(record.order_id),
                    "payment.failed",
                    "failure event arrived after successful payment".to_string(),
                )
                .await;
                Ok(ReconcileOutcome::Anomaly)
            }
            _ => Ok(ReconcileOutcome::AlreadyApplied),
        }
    }

    async fn apply_order_paid(
        &self,
        provider_order_id: &str,
        payload: Value,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let record = match self.record_for(provider_order_id).await? {
            Some(record) => record,
            None => return Ok(ReconcileOutcome::Ignored),
        };

        let outcome = self.transition_to_paid(record.order_id).await?;

        if outcome == ReconcileOutcome::Applied {
            // Keep the last payload for audit; the record's payment status is
            // owned by payment.captured.
            PaymentRecord::update_many()
                .col_expr(
                    payment_record::Column::LastWebhookPayload,
                    Expr::value(payload),
                )
                .col_expr(payment_record::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(payment_record::Column::OrderId.eq(record.order_id))
                .exec(&*self.db)
                .await?;
        }

        Ok(outcome)
    }

    /// The single `pending -> paid` edge. On the first success the coupon's
    /// usage counter moves, exactly once per order.
    async fn transition_to_paid(&self, order_id: Uuid) -> Result<ReconcileOutcome, ServiceError> {
        let transitioned = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Paid))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .exec(&*self.db)
            .await?;

        if transitioned.rows_affected == 1 {
            self.event_sender.send_or_log(Event::OrderPaid(order_id)).await;
            self.redeem_coupon(order_id).await?;
            return Ok(ReconcileOutcome::Applied);
        }

        match self.order_status(order_id).await? {
            Some(OrderStatus::Paid) => Ok(ReconcileOutcome::AlreadyApplied),
            Some(status) => {
                self.emit_anomaly(
                    Some(order_id),
                    "payment.captured",
                    format!("capture arrived while order is {:?}", status),
                )
                .await;
                Ok(ReconcileOutcome::Anomaly)
            }
            None => Ok(ReconcileOutcome::Ignored),
        }
    }

    async fn redeem_coupon(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let order = Order::find_by_id(order_id).one(&*self.db).await?;
        if let Some(code) = order.and_then(|o| o.coupon_code) {
            if !self.coupons.record_usage(&code).await? {
                warn!(order_id = %order_id, coupon = %code, "Coupon usage limit already reached at redemption");
            }
        }
        Ok(())
    }

    async fn record_for(
        &self,
        provider_order_id: &str,
    ) -> Result<Option<payment_record::Model>, ServiceError> {
        let record = PaymentRecord::find()
            .filter(payment_record::Column::ProviderOrderId.eq(provider_order_id))
            .one(&*self.db)
            .await?;
        if record.is_none() {
            warn!(
                provider_order_id = %provider_order_id,
                "Webhook references unknown provider order; acknowledging"
            );
        }
        Ok(record)
    }

    async fn order_status(&self, order_id: Uuid) -> Result<Option<OrderStatus>, ServiceError> {
        Ok(Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .map(|o| o.status))
    }

    async fn emit_anomaly(&self, order_id: Option<Uuid>, event: &str, detail: String) {
        warn!(?order_id, event = %event, detail = %detail, "webhook anomaly");
        self.event_sender
            .send_or_log(Event::WebhookAnomaly {
                order_id,
                event: event.to_string(),
                detail,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_payment_captured() {
        let body = json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": "payment_xyz", "order_id": "order_abc", "amount": 170000}}}
        });
        let event = WebhookEvent::parse(&body).unwrap();
        assert_eq!(
            event,
            WebhookEvent::PaymentCaptured {
                provider_payment_id: "payment_xyz".to_string(),
                provider_order_id: "order_abc".to_string(),
            }
        );
    }

    #[test]
    fn parses_order_paid() {
        let body = json!({
            "event": "order.paid",
            "payload": {"order": {"entity": {"id": "order_abc"}}}
        });
        let event = WebhookEvent::parse(&body).unwrap();
        assert_eq!(
            event,
            WebhookEvent::OrderPaid {
                provider_order_id: "order_abc".to_string(),
            }
        );
    }

    #[test]
    fn unknown_event_types_are_preserved_not_errors() {
        let body = json!({"event": "refund.created", "payload": {}});
        let event = WebhookEvent::parse(&body).unwrap();
        assert_eq!(
            event,
            WebhookEvent::Unknown {
                event: "refund.created".to_string()
            }
        );
    }

    #[test]
    fn missing_event_field_is_malformed() {
        let body = json!({"payload": {}});
        assert!(matches!(
            WebhookEvent::parse(&body),
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[test]
    fn captured_without_entity_is_malformed() {
        let body = json!({"event": "payment.captured", "payload": {}});
        assert!(matches!(
            WebhookEvent::parse(&body),
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[test]
    fn failed_requires_order_reference() {
        let body = json!({
            "event": "payment.failed",
            "payload": {"payment": {"entity": {"id": "payment_xyz"}}}
        });
        assert!(matches!(
            WebhookEvent::parse(&body),
            Err(ServiceError::BadRequest(_))
        ));
    }
}
