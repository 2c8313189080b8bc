pub mod bank_account;
pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod product_variant;

pub use order::{OrderPaymentStatus, OrderStatus};
pub use payment::{PaymentMethod, PaymentStatus};
