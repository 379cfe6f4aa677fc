use crate::{
    entities::{
        order::{self, Entity as Order, OrderStatus},
        order_item,
        payment_record::{self, Entity as PaymentRecord, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::CartAggregate,
        catalog::ProductCatalog,
        coupons::{CouponDecision, CouponService},
        payment_gateway::{self, PaymentGateway},
        pricing::{self, CartTotals, LineItem, ShippingPolicy},
    },
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Input for creating an order from a cart snapshot.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateOrderInput {
    pub customer_id: Uuid,
    pub shipping_address_id: Uuid,
    /// Client-supplied token making order creation retry-safe. Without one,
    /// a retried checkout creates a new order.
    pub idempotency_key: Option<String>,
}

/// Result of a successful checkout.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub order_number: String,
    pub provider_order_id: String,
    pub totals: CartTotals,
}

/// Order plus its payment record, for read endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithPayment {
    #[schema(value_type = Object)]
    pub order: order::Model,
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<order_item::Model>,
    #[schema(value_type = Option<Object>)]
    pub payment: Option<payment_record::Model>,
}

/// A cart line re-resolved against the live catalog at checkout time.
struct ResolvedLine {
    line: LineItem,
    name: String,
}

/// Order factory: turns a priced cart into a persisted `pending` order with a
/// remote payment session. Client-supplied prices are never trusted; every
/// line re-resolves against the catalog and the totals are recomputed
/// server-side before anything is written.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    catalog: Arc<dyn ProductCatalog>,
    coupons: CouponService,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    policy: ShippingPolicy,
    currency: String,
    gateway_max_retries: u32,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        catalog: Arc<dyn ProductCatalog>,
        coupons: CouponService,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        policy: ShippingPolicy,
        currency: String,
        gateway_max_retries: u32,
    ) -> Self {
        Self {
            db,
            catalog,
            coupons,
            gateway,
            event_sender,
            policy,
            currency,
            gateway_max_retries,
        }
    }

    /// Creates an order from a cart snapshot.
    ///
    /// Steps: re-resolve catalog price/stock per line, re-run coupon
    /// validation and pricing, persist order + items in one transaction, then
    /// create the remote payment session and persist the payment record. A
    /// gateway failure leaves the order `pending` with no payment record; the
    /// same call (with the same idempotency key) resumes it.
    #[instrument(skip(self, cart), fields(cart_id = %cart.id, customer_id = %input.customer_id))]
    pub async fn create_order(
        &self,
        cart: &CartAggregate,
        input: CreateOrderInput,
    ) -> Result<OrderConfirmation, ServiceError> {
        if cart.items.is_empty() {
            return Err(ServiceError::InvalidOperation("Cart is empty".to_string()));
        }

        if let Some(key) = &input.idempotency_key {
            if let Some(existing) = self.find_by_idempotency_key(key).await? {
                info!(order_id = %existing.id, "Resuming order for idempotency key");
                return self.resume_payment(existing).await;
            }
        }

        let resolved = self.resolve_lines(cart).await?;
        let items: Vec<LineItem> = resolved.iter().map(|r| r.line.clone()).collect();
        let decision = self.server_side_decision(cart, &items).await?;
        let totals = pricing::price(&items, &decision, &self.policy);

        let order = self
            .persist_pending_order(cart, &input, &resolved, &totals)
            .await?;

        self.event_sender
            .send_or_log(Event::OrderCreated(order.id))
            .await;
        self.event_sender
            .send_or_log(Event::CheckoutCompleted {
                cart_id: cart.id,
                order_id: order.id,
            })
            .await;

        let confirmation = self.open_payment_session(order).await?;
        info!(
            order_id = %confirmation.order_id,
            provider_order_id = %confirmation.provider_order_id,
            "Order created"
        );
        Ok(confirmation)
    }

    /// Re-resolves each cart line against the catalog. A price drifted from
    /// the client's snapshot fails with `PriceChanged`; a stock shortfall
    /// fails with `InsufficientStock`.
    async fn resolve_lines(&self, cart: &CartAggregate) -> Result<Vec<ResolvedLine>, ServiceError> {
        let mut resolved = Vec::with_capacity(cart.items.len());
        for line in &cart.items {
            let item = self
                .catalog
                .resolve(&line.sku)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("SKU {} not found", line.sku)))?;

            if item.price != line.unit_price {
                return Err(ServiceError::PriceChanged(line.sku.clone()));
            }
            if item.stock < line.quantity as i32 {
                return Err(ServiceError::InsufficientStock(line.sku.clone()));
            }

            resolved.push(ResolvedLine {
                line: LineItem {
                    sku: item.sku,
                    unit_price: item.price,
                    quantity: line.quantity,
                    color: line.color.clone(),
                    size: line.size.clone(),
                },
                name: item.name,
            });
        }
        Ok(resolved)
    }

    async fn server_side_decision(
        &self,
        cart: &CartAggregate,
        items: &[LineItem],
    ) -> Result<CouponDecision, ServiceError> {
        let code = match &cart.applied_coupon_code {
            Some(code) => code,
            None => return Ok(CouponDecision::none()),
        };

        let subtotal = items.iter().map(LineItem::line_total).sum();
        let decision = self.coupons.validate(code, subtotal).await?;
        if !decision.applicable {
            let reason = decision
                .reason
                .map(|r| r.as_str())
                .unwrap_or("not_applicable");
            return Err(ServiceError::ValidationError(format!(
                "Coupon {} rejected: {}",
                code, reason
            )));
        }
        Ok(decision)
    }

    async fn persist_pending_order(
        &self,
        cart: &CartAggregate,
        input: &CreateOrderInput,
        resolved: &[ResolvedLine],
        totals: &CartTotals,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(format!(
                "ORD-{}",
                order_id.to_string()[..8].to_uppercase()
            )),
            customer_id: Set(input.customer_id),
            shipping_address_id: Set(input.shipping_address_id),
            coupon_code: Set(cart.applied_coupon_code.clone()),
            currency: Set(self.currency.clone()),
            subtotal: Set(totals.subtotal),
            discount_total: Set(totals.discount),
            shipping_total: Set(totals.shipping),
            total_amount: Set(totals.total),
            status: Set(OrderStatus::Pending),
            tracking_number: Set(None),
            idempotency_key: Set(input.idempotency_key.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let order = order.insert(&txn).await?;

        // Copy the resolved lines as an immutable snapshot; the order never
        // refers back to the live cart.
        for resolved_line in resolved {
            let line = &resolved_line.line;
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                sku: Set(line.sku.clone()),
                name: Set(resolved_line.name.clone()),
                quantity: Set(line.quantity as i32),
                unit_price: Set(line.unit_price),
                line_total: Set(line.line_total()),
                color: Set(line.color.clone()),
                size: Set(line.size.clone()),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        txn.commit().await?;
        Ok(order)
    }

    /// Creates the remote payment session and persists the payment record.
    /// Invoked both on first creation and when resuming a pending order that
    /// has no payment record yet.
    async fn open_payment_session(
        &self,
        order: order::Model,
    ) -> Result<OrderConfirmation, ServiceError> {
        let metadata = json!({
            "order_id": order.id,
            "order_number": order.order_number,
        });

        let provider_order = payment_gateway::create_with_retry(
            self.gateway.as_ref(),
            order.total_amount,
            &order.currency,
            metadata,
            self.gateway_max_retries,
        )
        .await
        .map_err(|e| {
            warn!(order_id = %order.id, "Payment session creation failed; order left pending: {}", e);
            e
        })?;

        let now = Utc::now();
        payment_record::ActiveModel {
            order_id: Set(order.id),
            provider_order_id: Set(provider_order.id.clone()),
            provider_payment_id: Set(None),
            status: Set(PaymentStatus::Created),
            last_webhook_payload: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        Ok(OrderConfirmation {
            order_id: order.id,
            order_number: order.order_number,
            provider_order_id: provider_order.id,
            totals: CartTotals {
                subtotal: order.subtotal,
                discount: order.discount_total,
                shipping: order.shipping_total,
                total: order.total_amount,
            },
        })
    }

    async fn resume_payment(&self, order: order::Model) -> Result<OrderConfirmation, ServiceError> {
        if let Some(record) = PaymentRecord::find_by_id(order.id).one(&*self.db).await? {
            // Fully created previously; return the same confirmation.
            return Ok(OrderConfirmation {
                order_id: order.id,
                order_number: order.order_number,
                provider_order_id: record.provider_order_id,
                totals: CartTotals {
                    subtotal: order.subtotal,
                    discount: order.discount_total,
                    shipping: order.shipping_total,
                    total: order.total_amount,
                },
            });
        }
        self.open_payment_session(order).await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        let existing = Order::find()
            .filter(order::Column::IdempotencyKey.eq(key))
            .one(&*self.db)
            .await?;
        Ok(existing)
    }

    /// Fetches an order with its items and payment record.
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderWithPayment, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        let payment = PaymentRecord::find_by_id(order_id).one(&*self.db).await?;

        Ok(OrderWithPayment {
            order,
            items,
            payment,
        })
    }
}
