pub mod cart;
pub mod catalog;
pub mod coupons;
pub mod orders;
pub mod payment_gateway;
pub mod pricing;
pub mod reconciliation;
