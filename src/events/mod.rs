//! Domain events emitted after a transaction commits.
//!
//! Delivery is fire-and-forget: a full or closed channel never fails the
//! operation that produced the event.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, waiting for channel capacity
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends without waiting; a full or closed channel is logged and dropped.
    pub fn send_or_log(&self, event: Event) {
        if let Err(err) = self.sender.try_send(event) {
            let (reason, event) = match err {
                mpsc::error::TrySendError::Full(event) => ("channel full", event),
                mpsc::error::TrySendError::Closed(event) => ("channel closed", event),
            };
            warn!(reason, ?event, "dropping domain event");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CartCreated {
        token: Uuid,
        user_id: Option<i32>,
    },
    CartClaimed {
        token: Uuid,
        user_id: i32,
        canceled: Vec<Uuid>,
    },
    CartLineChanged {
        token: Uuid,
        variant_id: i32,
        quantity: i32,
    },
    CartCleared(Uuid),
    CartsPurged(u64),
    OrderCreated {
        order_id: i32,
        user_id: i32,
        total: i64,
    },
    OrderStatusChanged {
        order_id: i32,
        old_status: String,
        new_status: String,
    },
    PaymentCreated {
        payment_id: i32,
        order_id: i32,
        amount: i64,
    },
    PaymentSucceeded {
        payment_id: i32,
        order_id: i32,
        ref_id: String,
    },
    PaymentFailed {
        payment_id: i32,
        order_id: i32,
    },
}

/// Consumes events until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_id,
                user_id,
                total,
            } => {
                // Stand-in for the order confirmation mail.
                info!(order_id, user_id, total, "order confirmation queued");
            }
            Event::PaymentSucceeded {
                payment_id,
                order_id,
                ref_id,
            } => {
                info!(payment_id, order_id, %ref_id, "payment receipt queued");
            }
            Event::PaymentFailed {
                payment_id,
                order_id,
            } => {
                warn!(payment_id, order_id, "payment failed");
            }
            other => info!(event = ?other, "event"),
        }
    }

    info!("Event processing loop stopped");
}
