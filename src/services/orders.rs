use crate::{
    auth::UserId,
    entities::{
        address::{self, Entity as Address},
        order::{self, Entity as Order},
        order_line::{self, Entity as OrderLine},
        payment::{self, Entity as Payment},
        OrderStatus, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    models::LineData,
    services::catalog::release_stock,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

pub const DEFAULT_ORDERS_PER_PAGE: u64 = 16;

/// Read access to a user's orders and customer-initiated cancellation.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Newest first. `page` starts at 1.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        actor: UserId,
        page: u64,
        per_page: u64,
    ) -> Result<OrderPage, ServiceError> {
        let per_page = if per_page == 0 {
            DEFAULT_ORDERS_PER_PAGE
        } else {
            per_page
        };
        let paginator = Order::find()
            .filter(order::Column::UserId.eq(actor))
            .order_by_desc(order::Column::CreateTime)
            .order_by_desc(order::Column::Id)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut views = Vec::with_capacity(orders.len());
        for order in orders {
            views.push(load_order_view(&*self.db, order).await?);
        }

        Ok(OrderPage {
            orders: views,
            total,
            page: page.max(1),
            per_page,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, actor: UserId, order_id: i32) -> Result<OrderView, ServiceError> {
        let order = find_owned_order(&*self.db, actor, order_id).await?;
        load_order_view(&*self.db, order).await
    }

    /// Cancels an order that has not shipped and returns its stock.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        actor: UserId,
        order_id: i32,
    ) -> Result<OrderView, ServiceError> {
        let txn = self.db.begin().await?;
        let order = find_owned_order(&txn, actor, order_id).await?;
        if order.status != OrderStatus::Unfulfiled {
            return Err(ServiceError::InvalidTransition(format!(
                "Order {order_id} is {} and can no longer be canceled",
                order.status
            )));
        }

        let lines = OrderLine::find()
            .filter(order_line::Column::OrderId.eq(order.id))
            .all(&txn)
            .await?;
        for line in &lines {
            release_stock(&txn, line.variant_id, line.quantity).await?;
        }

        let failed_payments = fail_pending_payments(&txn, order.id).await?;

        let (order, old_status) = transition_order(&txn, order, OrderStatus::Canceled).await?;
        let view = load_order_view(&txn, order).await?;
        txn.commit().await?;

        for payment_id in failed_payments {
            self.event_sender
                .send_or_log(Event::PaymentFailed { payment_id, order_id });
        }
        self.event_sender.send_or_log(Event::OrderStatusChanged {
            order_id,
            old_status: old_status.to_string(),
            new_status: view.status.to_string(),
        });
        counter!("storefront_orders.canceled", 1);
        info!("Order {} canceled by user {}", order_id, actor);
        Ok(view)
    }
}

/// Closes every open payment attempt of an order so a late gateway callback
/// can no longer settle it.
async fn fail_pending_payments(
    conn: &impl ConnectionTrait,
    order_id: i32,
) -> Result<Vec<i32>, ServiceError> {
    let pending: Vec<i32> = Payment::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .filter(payment::Column::Status.eq(PaymentStatus::Pending))
        .all(conn)
        .await?
        .into_iter()
        .map(|payment| payment.id)
        .collect();
    if pending.is_empty() {
        return Ok(pending);
    }

    let updated = Payment::update_many()
        .set(payment::ActiveModel {
            status: Set(PaymentStatus::Failed),
            update_time: Set(Utc::now()),
            ..Default::default()
        })
        .filter(payment::Column::Id.is_in(pending.clone()))
        .filter(payment::Column::Status.eq(PaymentStatus::Pending))
        .exec(conn)
        .await?
        .rows_affected;
    if updated != pending.len() as u64 {
        // A callback settled one of them between the read and the update.
        return Err(ServiceError::Conflict(format!(
            "A payment for order {order_id} settled while canceling; try again"
        )));
    }
    Ok(pending)
}

/// Another user's order is reported exactly like a missing one.
pub async fn find_owned_order(
    conn: &impl ConnectionTrait,
    actor: UserId,
    order_id: i32,
) -> Result<order::Model, ServiceError> {
    Order::find_by_id(order_id)
        .filter(order::Column::UserId.eq(actor))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Order", order_id))
}

/// The only writer of `orders.status`. Returns the updated order and the
/// status it left.
pub async fn transition_order(
    conn: &impl ConnectionTrait,
    order: order::Model,
    next: OrderStatus,
) -> Result<(order::Model, OrderStatus), ServiceError> {
    let current = order.status;
    if current.is_terminal() {
        return Err(ServiceError::InvalidTransition(format!(
            "Order {} is already {current}",
            order.id
        )));
    }
    if !current.can_transition_to(next) {
        return Err(ServiceError::InvalidTransition(format!(
            "Order {} cannot move from {current} to {next}",
            order.id
        )));
    }

    let mut active: order::ActiveModel = order.into();
    active.status = Set(next);
    active.last_status_change = Set(Utc::now());
    let order = active.update(conn).await?;
    Ok((order, current))
}

pub async fn load_order_view(
    conn: &impl ConnectionTrait,
    order: order::Model,
) -> Result<OrderView, ServiceError> {
    let lines = OrderLine::find()
        .filter(order_line::Column::OrderId.eq(order.id))
        .order_by_asc(order_line::Column::Id)
        .all(conn)
        .await?;
    let address = Address::find_by_id(order.address_id).one(conn).await?;

    Ok(OrderView::new(order, address, lines))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderLineView {
    pub id: i32,
    pub variant_id: i32,
    pub product_name: String,
    pub variant_name: String,
    pub sku: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub total: i64,
    pub data: LineData,
    pub is_shipping_required: bool,
}

impl From<order_line::Model> for OrderLineView {
    fn from(line: order_line::Model) -> Self {
        let data = line.line_data();
        Self {
            id: line.id,
            variant_id: line.variant_id,
            product_name: line.product_name,
            variant_name: line.variant_name,
            sku: line.sku,
            quantity: line.quantity,
            unit_price: line.unit_price,
            total: line.total,
            data,
            is_shipping_required: line.is_shipping_required,
        }
    }
}

/// Wire shape of an order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderView {
    pub id: i32,
    pub status: OrderStatus,
    pub user: UserId,
    pub address: Option<address::Model>,
    pub create_time: DateTime<Utc>,
    pub total: i64,
    pub quantity: i32,
    pub lines: Vec<OrderLineView>,
    pub is_shipping_required: bool,
}

impl OrderView {
    pub fn new(
        order: order::Model,
        address: Option<address::Model>,
        lines: Vec<order_line::Model>,
    ) -> Self {
        let lines: Vec<OrderLineView> = lines.into_iter().map(OrderLineView::from).collect();
        Self {
            id: order.id,
            status: order.status,
            user: order.user_id,
            address,
            create_time: order.create_time,
            total: order.total,
            quantity: order.quantity,
            is_shipping_required: lines.iter().any(|line| line.is_shipping_required),
            lines,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPage {
    pub orders: Vec<OrderView>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}
