use crate::{
    auth::UserId,
    entities::{
        commerce::{cart, cart_line, Cart, CartLine, CartModel, CartStatus},
        order, order_line, OrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        addresses::find_owned_address,
        catalog::allocate_stock,
        commerce::cart_service::recalculate_cart_totals,
        orders::{load_order_view, OrderView},
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub const MISSING_ADDRESS_MESSAGE: &str = "Please enter an address for your order";

/// Turns a cart into an order.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Converts the actor's cart into an Unfulfiled order. Either everything
    /// happens (stock allocated, order written, cart removed) or nothing does.
    #[instrument(skip(self))]
    pub async fn create_from_cart(
        &self,
        actor: UserId,
        cart_token: Option<Uuid>,
        address_id: Option<i32>,
    ) -> Result<OrderView, ServiceError> {
        let address_id = require_address(address_id)?;

        let txn = self.db.begin().await?;
        let order = convert_cart(&txn, actor, cart_token, address_id).await?;
        let view = load_order_view(&txn, order).await?;
        txn.commit().await?;

        announce_order(&self.event_sender, &view);
        Ok(view)
    }
}

pub fn require_address(address_id: Option<i32>) -> Result<i32, ServiceError> {
    address_id.ok_or_else(|| ServiceError::ValidationError(MISSING_ADDRESS_MESSAGE.to_string()))
}

pub fn announce_order(event_sender: &EventSender, order: &OrderView) {
    event_sender.send_or_log(Event::OrderCreated {
        order_id: order.id,
        user_id: order.user,
        total: order.total,
    });
    counter!("storefront_checkout.orders_created", 1);
}

/// Conversion steps, run on the caller's transaction.
pub async fn convert_cart(
    conn: &impl ConnectionTrait,
    actor: UserId,
    cart_token: Option<Uuid>,
    address_id: i32,
) -> Result<order::Model, ServiceError> {
    let cart = find_checkout_cart(conn, actor, cart_token).await?;
    find_owned_address(conn, actor, address_id).await?;

    let token = cart.token;
    let checkout_data = cart.checkout_data.clone();
    let cart_view = recalculate_cart_totals(conn, cart.clone()).await?;
    if cart_view.lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "Your cart is empty".to_string(),
        ));
    }

    for line in &cart_view.lines {
        allocate_stock(conn, line.variant.id, line.quantity).await?;
    }

    let now = Utc::now();
    let order = order::ActiveModel {
        status: Set(OrderStatus::Unfulfiled),
        user_id: Set(actor),
        address_id: Set(address_id),
        cart_token: Set(Some(token)),
        total: Set(cart_view.total),
        quantity: Set(cart_view.quantity),
        checkout_data: Set(checkout_data),
        create_time: Set(now),
        last_status_change: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    for line in &cart_view.lines {
        order_line::ActiveModel {
            order_id: Set(order.id),
            variant_id: Set(line.variant.id),
            product_name: Set(line.variant.product.name.clone()),
            variant_name: Set(line.variant.name.clone()),
            sku: Set(line.variant.sku.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.item_price),
            total: Set(line.total),
            data: Set(line.data.canonical()),
            is_shipping_required: Set(line.is_shipping_required),
            ..Default::default()
        }
        .insert(conn)
        .await?;
    }

    CartLine::delete_many()
        .filter(cart_line::Column::CartToken.eq(token))
        .exec(conn)
        .await?;
    cart.delete(conn).await?;

    info!(
        order_id = order.id,
        %token,
        total = order.total,
        "converted cart into order"
    );
    Ok(order)
}

async fn find_checkout_cart(
    conn: &impl ConnectionTrait,
    actor: UserId,
    cart_token: Option<Uuid>,
) -> Result<CartModel, ServiceError> {
    let mut query = Cart::find()
        .filter(cart::Column::UserId.eq(actor))
        .filter(cart::Column::Status.eq(CartStatus::Open));
    if let Some(token) = cart_token {
        query = query.filter(cart::Column::Token.eq(token));
    }

    query
        .order_by_desc(cart::Column::CreateTime)
        .one(conn)
        .await?
        .ok_or_else(|| match cart_token {
            Some(token) => ServiceError::NotFound(format!("Cart {token} not found")),
            None => ServiceError::NotFound("Cart not found".to_string()),
        })
}
