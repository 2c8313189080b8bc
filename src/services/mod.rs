// Variant resolution and stock
pub mod inventory;
pub mod variants;

// Checkout
pub mod cart;
pub mod orders;
pub mod payments;
