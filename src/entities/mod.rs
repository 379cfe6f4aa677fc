pub mod coupon;
pub mod order;
pub mod order_item;
pub mod payment_record;
pub mod product_variant;

pub use coupon::Entity as Coupon;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use payment_record::Entity as PaymentRecord;
pub use product_variant::Entity as ProductVariant;
