use crate::{
    entities::{product_variant, ProductVariant},
    errors::ServiceError,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;

/// Current catalog view of one SKU.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub sku: String,
    pub name: String,
    pub price: Decimal,
    pub stock: i32,
    pub color: Option<String>,
    pub size: Option<String>,
}

/// Catalog lookup boundary. The storefront core never trusts client-supplied
/// prices; everything money-bearing re-resolves through this trait.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn resolve(&self, sku: &str) -> Result<Option<CatalogItem>, ServiceError>;
}

/// Catalog backed by the `product_variants` table.
#[derive(Clone)]
pub struct DbProductCatalog {
    db: Arc<DatabaseConnection>,
}

impl DbProductCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProductCatalog for DbProductCatalog {
    async fn resolve(&self, sku: &str) -> Result<Option<CatalogItem>, ServiceError> {
        let variant = ProductVariant::find()
            .filter(product_variant::Column::Sku.eq(sku))
            .filter(product_variant::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;

        Ok(variant.map(|v| CatalogItem {
            sku: v.sku,
            name: v.name,
            price: v.price,
            stock: v.stock,
            color: v.color,
            size: v.size,
        }))
    }
}
