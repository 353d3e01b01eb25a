use crate::{
    auth::UserId,
    entities::{
        order::Entity as Order,
        payment::{self, Entity as Payment},
        OrderStatus, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::checkout_service::{announce_order, convert_cart, require_address},
        gateway::{PaymentGateway, PaymentRequest, VerificationOutcome},
        orders::{find_owned_order, load_order_view, transition_order, OrderView},
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Gateway status flag meaning the customer completed the payment page.
pub const STATUS_OK: &str = "OK";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StartPaymentInput {
    #[serde(default)]
    pub cart_token: Option<Uuid>,
    /// Pay for an existing Unfulfiled order instead of converting a cart.
    #[serde(default)]
    pub order_id: Option<i32>,
    #[serde(default)]
    pub address_id: Option<i32>,
    #[validate(url)]
    pub redirect_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartPaymentOutcome {
    pub redirect_url: String,
    pub order: OrderView,
    pub payment: payment::Model,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub payment: payment::Model,
    pub order_status: OrderStatus,
    pub message: String,
}

/// Gateway-backed payment lifecycle for orders.
///
/// A payment settles exactly once: every status write is conditional on the
/// row still being Pending, and settled payments are returned as they are
/// without contacting the gateway again.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    description: String,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        description: String,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            description,
        }
    }

    /// Creates (or reuses) the order's payment and opens a gateway
    /// transaction for it. The order and payment are committed before the
    /// gateway is called, so a gateway failure leaves them Pending for a retry
    /// with `order_id`.
    #[instrument(skip(self, input), fields(order_id = ?input.order_id))]
    pub async fn start_payment(
        &self,
        actor: UserId,
        input: StartPaymentInput,
    ) -> Result<StartPaymentOutcome, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let (order, converted) = match input.order_id {
            Some(order_id) => {
                let order = find_owned_order(&txn, actor, order_id).await?;
                if order.status != OrderStatus::Unfulfiled {
                    return Err(ServiceError::Conflict(format!(
                        "Order {order_id} is {} and cannot be paid",
                        order.status
                    )));
                }
                (order, false)
            }
            None => {
                let address_id = require_address(input.address_id)?;
                let order = convert_cart(&txn, actor, input.cart_token, address_id).await?;
                (order, true)
            }
        };

        let existing = Payment::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(&txn)
            .await?;
        let (payment, created) = match existing {
            Some(payment) if payment.status == PaymentStatus::Succeeded => {
                return Err(ServiceError::Conflict(format!(
                    "Order {} is already paid",
                    order.id
                )))
            }
            Some(payment) if payment.status == PaymentStatus::Failed => {
                return Err(ServiceError::Conflict(format!(
                    "Payment for order {} has failed; please place a new order",
                    order.id
                )))
            }
            Some(payment) => (payment, false),
            None => {
                let now = Utc::now();
                let payment = payment::ActiveModel {
                    order_id: Set(order.id),
                    user_id: Set(actor),
                    status: Set(PaymentStatus::Pending),
                    amount: Set(order.total),
                    authority: Set(None),
                    ref_id: Set(None),
                    description: Set(self.description.clone()),
                    create_time: Set(now),
                    update_time: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
                (payment, true)
            }
        };

        let order = load_order_view(&txn, order).await?;
        txn.commit().await?;

        if converted {
            announce_order(&self.event_sender, &order);
        }
        if created {
            self.event_sender.send_or_log(Event::PaymentCreated {
                payment_id: payment.id,
                order_id: order.id,
                amount: payment.amount,
            });
        }

        let authority = self
            .gateway
            .request_payment(&PaymentRequest {
                amount: payment.amount,
                description: payment.description.clone(),
                callback_url: input.redirect_url,
            })
            .await?;

        let mut active: payment::ActiveModel = payment.into();
        active.authority = Set(Some(authority.clone()));
        active.update_time = Set(Utc::now());
        let payment = active.update(&*self.db).await?;

        info!(
            payment_id = payment.id,
            order_id = order.id,
            amount = payment.amount,
            "payment started"
        );
        Ok(StartPaymentOutcome {
            redirect_url: self.gateway.redirect_url(&authority),
            order,
            payment,
        })
    }

    /// Handles the gateway callback for `authority`.
    #[instrument(skip(self))]
    pub async fn verify(
        &self,
        authority: &str,
        status_flag: &str,
    ) -> Result<VerificationResult, ServiceError> {
        let payment = Payment::find()
            .filter(payment::Column::Authority.eq(authority))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment with authority {authority} does not exist."))
            })?;

        if payment.status.is_terminal() {
            info!(payment_id = payment.id, status = ?payment.status, "payment already settled");
            return self.result_for(payment).await;
        }

        if status_flag != STATUS_OK {
            return self.settle(payment, PaymentStatus::Failed, None).await;
        }

        match self.gateway.verify_payment(authority, payment.amount).await? {
            VerificationOutcome::Confirmed { ref_id } => {
                self.settle(payment, PaymentStatus::Succeeded, Some(ref_id))
                    .await
            }
            VerificationOutcome::Rejected { code } => {
                warn!(payment_id = payment.id, code, "gateway did not confirm payment");
                self.settle(payment, PaymentStatus::Failed, None).await
            }
        }
    }

    async fn settle(
        &self,
        payment: payment::Model,
        next: PaymentStatus,
        ref_id: Option<String>,
    ) -> Result<VerificationResult, ServiceError> {
        if !payment.status.can_transition_to(next) {
            return Err(ServiceError::InvalidTransition(format!(
                "Payment {} cannot move from {:?} to {:?}",
                payment.id, payment.status, next
            )));
        }

        let txn = self.db.begin().await?;
        let updated = Payment::update_many()
            .set(payment::ActiveModel {
                status: Set(next),
                ref_id: Set(ref_id.clone()),
                update_time: Set(Utc::now()),
                ..Default::default()
            })
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .exec(&txn)
            .await?
            .rows_affected;

        if updated == 0 {
            // A concurrent callback settled it first.
            drop(txn);
            let current = Payment::find_by_id(payment.id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::not_found("Payment", payment.id))?;
            return self.result_for(current).await;
        }

        let order = Order::find_by_id(payment.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", payment.order_id))?;
        let mut status_change = None;
        let order_status = if next == PaymentStatus::Succeeded {
            if payment.amount != order.total {
                warn!(
                    payment_id = payment.id,
                    amount = payment.amount,
                    order_total = order.total,
                    "paid amount differs from order total; order left unfulfiled"
                );
                order.status
            } else if order.status.can_transition_to(OrderStatus::Fulfiled) {
                let (order, old) = transition_order(&txn, order, OrderStatus::Fulfiled).await?;
                status_change = Some((old, order.status));
                order.status
            } else {
                warn!(order_id = order.id, status = %order.status, "paid order cannot be fulfiled");
                order.status
            }
        } else {
            order.status
        };

        let payment = Payment::find_by_id(payment.id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Payment", payment.id))?;
        txn.commit().await?;

        match next {
            PaymentStatus::Succeeded => {
                counter!("storefront_payments.succeeded", 1);
                self.event_sender.send_or_log(Event::PaymentSucceeded {
                    payment_id: payment.id,
                    order_id: payment.order_id,
                    ref_id: ref_id.unwrap_or_default(),
                });
            }
            _ => {
                counter!("storefront_payments.failed", 1);
                self.event_sender.send_or_log(Event::PaymentFailed {
                    payment_id: payment.id,
                    order_id: payment.order_id,
                });
            }
        }
        if let Some((old, new)) = status_change {
            self.event_sender.send_or_log(Event::OrderStatusChanged {
                order_id: payment.order_id,
                old_status: old.to_string(),
                new_status: new.to_string(),
            });
        }

        info!(payment_id = payment.id, status = ?payment.status, "payment settled");
        Ok(VerificationResult {
            message: settlement_message(payment.status).to_string(),
            payment,
            order_status,
        })
    }

    async fn result_for(&self, payment: payment::Model) -> Result<VerificationResult, ServiceError> {
        let order = Order::find_by_id(payment.order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", payment.order_id))?;
        Ok(VerificationResult {
            message: settlement_message(payment.status).to_string(),
            payment,
            order_status: order.status,
        })
    }
}

fn settlement_message(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Succeeded => "Payment completed successfully",
        PaymentStatus::Failed => "Payment failed or was canceled",
        PaymentStatus::Pending => "Payment is awaiting confirmation",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_url_must_be_a_url() {
        let input = StartPaymentInput {
            cart_token: None,
            order_id: None,
            address_id: Some(1),
            redirect_url: "not a url".into(),
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn every_status_has_a_message() {
        assert_ne!(
            settlement_message(PaymentStatus::Succeeded),
            settlement_message(PaymentStatus::Failed)
        );
        assert!(settlement_message(PaymentStatus::Pending).contains("awaiting"));
    }
}
