use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::ProductCatalog,
        coupons::{CouponDecision, CouponService},
        pricing::{self, CartTotals, LineItem, ShippingPolicy},
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// One shopping session's cart: line items plus the active coupon code.
/// Totals are recomputed from scratch after every mutation; there is no
/// cached figure that can go stale.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartAggregate {
    pub id: Uuid,
    pub items: Vec<LineItem>,
    pub applied_coupon_code: Option<String>,
    pub totals: CartTotals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartAggregate {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            items: Vec::new(),
            applied_coupon_code: None,
            totals: CartTotals::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sum of line totals before discount and shipping.
    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(LineItem::line_total).sum()
    }

    fn position_of(&self, sku: &str) -> Option<usize> {
        self.items.iter().position(|l| l.sku == sku)
    }

    /// Adds a line or merges quantity into an existing line for the same SKU.
    /// The unit price is snapshotted by the caller at add time.
    pub fn add_item(&mut self, line: LineItem, max_quantity: u32) {
        match self.position_of(&line.sku) {
            Some(idx) => {
                let merged = self.items[idx].quantity.saturating_add(line.quantity);
                self.items[idx].quantity = merged.clamp(1, max_quantity);
            }
            None => {
                let mut line = line;
                line.quantity = line.quantity.clamp(1, max_quantity);
                self.items.push(line);
            }
        }
        self.touch();
    }

    /// Sets a line's quantity, clamped to `[1, max_quantity]`; zero removes
    /// the line.
    pub fn set_quantity(
        &mut self,
        sku: &str,
        quantity: u32,
        max_quantity: u32,
    ) -> Result<(), ServiceError> {
        let idx = self
            .position_of(sku)
            .ok_or_else(|| ServiceError::NotFound(format!("Cart line {} not found", sku)))?;

        if quantity == 0 {
            self.items.remove(idx);
        } else {
            self.items[idx].quantity = quantity.clamp(1, max_quantity);
        }
        self.touch();
        Ok(())
    }

    pub fn remove_item(&mut self, sku: &str) -> Result<(), ServiceError> {
        let idx = self
            .position_of(sku)
            .ok_or_else(|| ServiceError::NotFound(format!("Cart line {} not found", sku)))?;
        self.items.remove(idx);
        self.touch();
        Ok(())
    }

    pub fn apply_coupon(&mut self, code: String) {
        self.applied_coupon_code = Some(code);
        self.touch();
    }

    pub fn remove_coupon(&mut self) {
        self.applied_coupon_code = None;
        self.touch();
    }

    /// Recomputes totals via the pricing engine. Must follow every mutation.
    pub fn reprice(&mut self, decision: &CouponDecision, policy: &ShippingPolicy) {
        self.totals = pricing::price(&self.items, decision, policy);
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Durable cart persistence seam. Loss of this store only degrades UX: the
/// order factory re-validates and re-prices server-side before anything is
/// committed, so saves are best-effort.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn load(&self, id: Uuid) -> Result<Option<CartAggregate>, ServiceError>;
    async fn save(&self, cart: &CartAggregate) -> Result<(), ServiceError>;
    async fn delete(&self, id: Uuid) -> Result<(), ServiceError>;
}

/// Process-local cart store.
#[derive(Default)]
pub struct InMemoryCartStore {
    carts: DashMap<Uuid, CartAggregate>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn load(&self, id: Uuid) -> Result<Option<CartAggregate>, ServiceError> {
        Ok(self.carts.get(&id).map(|entry| entry.clone()))
    }

    async fn save(&self, cart: &CartAggregate) -> Result<(), ServiceError> {
        self.carts.insert(cart.id, cart.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        self.carts.remove(&id);
        Ok(())
    }
}

/// Input for adding an item to a cart.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AddItemInput {
    pub sku: String,
    pub quantity: u32,
}

/// Orchestrates cart mutations: resolve catalog snapshots, mutate the
/// aggregate, re-run coupon validation and pricing, persist best-effort.
#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn CartStore>,
    catalog: Arc<dyn ProductCatalog>,
    coupons: CouponService,
    event_sender: Arc<EventSender>,
    policy: ShippingPolicy,
    max_quantity_per_line: u32,
}

impl CartService {
    pub fn new(
        store: Arc<dyn CartStore>,
        catalog: Arc<dyn ProductCatalog>,
        coupons: CouponService,
        event_sender: Arc<EventSender>,
        policy: ShippingPolicy,
        max_quantity_per_line: u32,
    ) -> Self {
        Self {
            store,
            catalog,
            coupons,
            event_sender,
            policy,
            max_quantity_per_line,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_cart(&self) -> Result<CartAggregate, ServiceError> {
        let cart = CartAggregate::new(Uuid::new_v4());
        self.save_or_log(&cart).await;
        self.event_sender
            .send_or_log(Event::CartCreated(cart.id))
            .await;
        info!("Created cart: {}", cart.id);
        Ok(cart)
    }

    pub async fn get_cart(&self, cart_id: Uuid) -> Result<CartAggregate, ServiceError> {
        self.store
            .load(cart_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart_id)))
    }

    /// Adds an item, snapshotting the current catalog price for the line.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        input: AddItemInput,
    ) -> Result<CartAggregate, ServiceError> {
        let item = self
            .catalog
            .resolve(&input.sku)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("SKU {} not found", input.sku)))?;

        let mut cart = self.get_cart(cart_id).await?;
        cart.add_item(
            LineItem {
                sku: item.sku,
                unit_price: item.price,
                quantity: input.quantity,
                color: item.color,
                size: item.size,
            },
            self.max_quantity_per_line,
        );

        self.finish_mutation(cart).await
    }

    #[instrument(skip(self))]
    pub async fn set_quantity(
        &self,
        cart_id: Uuid,
        sku: &str,
        quantity: u32,
    ) -> Result<CartAggregate, ServiceError> {
        let mut cart = self.get_cart(cart_id).await?;
        cart.set_quantity(sku, quantity, self.max_quantity_per_line)?;
        self.finish_mutation(cart).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, cart_id: Uuid, sku: &str) -> Result<CartAggregate, ServiceError> {
        let mut cart = self.get_cart(cart_id).await?;
        cart.remove_item(sku)?;
        self.finish_mutation(cart).await
    }

    /// Applies a coupon code. The decision is returned alongside the cart so
    /// the UI can surface the rejection reason; an inapplicable code is not
    /// stored.
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        cart_id: Uuid,
        code: &str,
    ) -> Result<(CartAggregate, CouponDecision), ServiceError> {
        let mut cart = self.get_cart(cart_id).await?;
        let decision = self.coupons.validate(code, cart.subtotal()).await?;

        if decision.applicable {
            cart.apply_coupon(crate::services::coupons::normalize_code(code));
            cart.reprice(&decision, &self.policy);
            self.save_or_log(&cart).await;
            self.event_sender
                .send_or_log(Event::CartUpdated(cart.id))
                .await;
        }

        Ok((cart, decision))
    }

    #[instrument(skip(self))]
    pub async fn remove_coupon(&self, cart_id: Uuid) -> Result<CartAggregate, ServiceError> {
        let mut cart = self.get_cart(cart_id).await?;
        cart.remove_coupon();
        self.finish_mutation(cart).await
    }

    /// Drops the session cart, normally after a successful order.
    pub async fn clear_cart(&self, cart_id: Uuid) -> Result<(), ServiceError> {
        self.store.delete(cart_id).await?;
        self.event_sender
            .send_or_log(Event::CartCleared(cart_id))
            .await;
        info!("Cleared cart: {}", cart_id);
        Ok(())
    }

    /// Revalidates the applied coupon against the post-mutation subtotal
    /// (mutations can cross the coupon's minimum), reprices, and persists.
    async fn finish_mutation(&self, mut cart: CartAggregate) -> Result<CartAggregate, ServiceError> {
        let decision = self.decision_for(&cart).await?;
        cart.reprice(&decision, &self.policy);
        self.save_or_log(&cart).await;
        self.event_sender
            .send_or_log(Event::CartUpdated(cart.id))
            .await;
        Ok(cart)
    }

    async fn decision_for(&self, cart: &CartAggregate) -> Result<CouponDecision, ServiceError> {
        match &cart.applied_coupon_code {
            Some(code) => self.coupons.validate(code, cart.subtotal()).await,
            None => Ok(CouponDecision::none()),
        }
    }

    async fn save_or_log(&self, cart: &CartAggregate) {
        if let Err(e) = self.store.save(cart).await {
            warn!(cart_id = %cart.id, "Cart persistence failed (continuing): {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn policy() -> ShippingPolicy {
        ShippingPolicy {
            free_shipping_threshold: dec!(1999),
            base_fee: dec!(99),
        }
    }

    fn line(sku: &str, unit_price: Decimal, quantity: u32) -> LineItem {
        LineItem {
            sku: sku.to_string(),
            unit_price,
            quantity,
            color: None,
            size: None,
        }
    }

    #[test]
    fn add_merges_existing_sku_and_clamps() {
        let mut cart = CartAggregate::new(Uuid::new_v4());
        cart.add_item(line("A", dec!(100), 6), 10);
        cart.add_item(line("A", dec!(100), 6), 10);
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 10);
    }

    #[test]
    fn snapshot_price_survives_later_adds() {
        let mut cart = CartAggregate::new(Uuid::new_v4());
        cart.add_item(line("A", dec!(100), 1), 10);
        // Same SKU arriving with a newer catalog price merges quantity but
        // keeps the original snapshot.
        cart.add_item(line("A", dec!(120), 1), 10);
        assert_eq!(cart.items[0].unit_price, dec!(100));
        assert_eq!(cart.items[0].quantity, 2);
    }

    #[test]
    fn zero_quantity_removes_line() {
        let mut cart = CartAggregate::new(Uuid::new_v4());
        cart.add_item(line("A", dec!(100), 2), 10);
        cart.set_quantity("A", 0, 10).unwrap();
        assert!(cart.items.is_empty());
    }

    #[test]
    fn quantity_clamped_to_bounds() {
        let mut cart = CartAggregate::new(Uuid::new_v4());
        cart.add_item(line("A", dec!(100), 1), 10);
        cart.set_quantity("A", 50, 10).unwrap();
        assert_eq!(cart.items[0].quantity, 10);
    }

    #[test]
    fn reprice_follows_mutations() {
        let mut cart = CartAggregate::new(Uuid::new_v4());
        cart.add_item(line("A", dec!(500), 1), 10);
        cart.reprice(&CouponDecision::none(), &policy());
        assert_eq!(cart.totals.total, dec!(599));

        cart.add_item(line("B", dec!(750), 2), 10);
        cart.reprice(&CouponDecision::none(), &policy());
        assert_eq!(cart.totals.subtotal, dec!(2000));
        assert_eq!(cart.totals.shipping, Decimal::ZERO);
        assert_eq!(cart.totals.total, dec!(2000));
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryCartStore::new();
        let mut cart = CartAggregate::new(Uuid::new_v4());
        cart.add_item(line("A", dec!(10), 1), 10);
        store.save(&cart).await.unwrap();

        let loaded = store.load(cart.id).await.unwrap().unwrap();
        assert_eq!(loaded.items, cart.items);

        store.delete(cart.id).await.unwrap();
        assert!(store.load(cart.id).await.unwrap().is_none());
    }

    #[test]
    fn removing_missing_line_is_not_found() {
        let mut cart = CartAggregate::new(Uuid::new_v4());
        assert!(matches!(
            cart.remove_item("NOPE"),
            Err(ServiceError::NotFound(_))
        ));
    }
}
