pub mod cart;
pub mod health;
pub mod orders;
pub mod payments;
pub mod products;

use crate::{
    config::AppConfig,
    db::DbPool,
    gateways::GatewayError,
    services::{
        cart::CartService, inventory::InventoryService, orders::OrderService,
        payments::PaymentService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub inventory: Arc<InventoryService>,
    pub cart: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, config: &AppConfig) -> Result<Self, GatewayError> {
        let cart = CartService::new(db_pool.clone());
        Ok(Self {
            inventory: Arc::new(InventoryService::new(db_pool.clone())),
            orders: Arc::new(OrderService::new(db_pool.clone(), cart.clone())),
            payments: Arc::new(PaymentService::from_config(db_pool, config)?),
            cart: Arc::new(cart),
        })
    }
}
