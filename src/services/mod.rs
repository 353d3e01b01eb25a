pub mod addresses;
pub mod catalog;
pub mod commerce;
pub mod gateway;
pub mod orders;
pub mod payments;
pub mod storage;

use crate::events::EventSender;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use self::{
    addresses::AddressBook,
    catalog::CatalogService,
    commerce::{CartService, CheckoutService},
    gateway::PaymentGateway,
    orders::OrderService,
    payments::PaymentService,
    storage::FileStore,
};

/// Every service the HTTP layer talks to.
#[derive(Clone)]
pub struct AppServices {
    pub addresses: AddressBook,
    pub catalog: CatalogService,
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub files: Arc<dyn FileStore>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        files: Arc<dyn FileStore>,
        payment_description: String,
    ) -> Self {
        Self {
            addresses: AddressBook::new(db.clone()),
            catalog: CatalogService::new(db.clone()),
            carts: CartService::new(db.clone(), event_sender.clone()),
            checkout: CheckoutService::new(db.clone(), event_sender.clone()),
            orders: OrderService::new(db.clone(), event_sender.clone()),
            payments: PaymentService::new(db, event_sender, gateway, payment_description),
            files,
        }
    }
}
