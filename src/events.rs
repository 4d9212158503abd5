use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the storefront services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemUpdated { cart_id: Uuid, product_id: Uuid },
    CartItemRemoved { cart_id: Uuid, product_id: Uuid },
    CartCleared(Uuid),

    // Checkout events
    CheckoutStarted { cart_id: Uuid, payment_reference: String },

    // Order events
    OrderCreated(Uuid),
    OrderAlreadyFinalized { order_id: Uuid, payment_reference: String },

    // Discount bookkeeping events
    CouponRedeemed { coupon_id: Uuid, order_id: Uuid, amount: Decimal },
    GiftCardRedeemed { gift_card_id: Uuid, order_id: Uuid, amount: Decimal },

    // Payment gateway events
    PaymentSucceeded { payment_reference: String },
    PaymentFailed { payment_reference: String },

    // Generic event for custom messages
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging (not propagating) delivery failures. Events
    /// are advisory; the operation that produced them has already committed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event delivery failed: {}", e);
        }
    }
}

/// Background loop that drains the event channel. Events currently feed the
/// structured log; this is the seam where outbound webhooks or an outbox
/// would attach.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id = %order_id, "Order created");
            }
            Event::OrderAlreadyFinalized {
                order_id,
                payment_reference,
            } => {
                info!(
                    order_id = %order_id,
                    payment_reference = %payment_reference,
                    "Duplicate finalization resolved to existing order"
                );
            }
            Event::CouponRedeemed {
                coupon_id,
                order_id,
                amount,
            } => {
                info!(coupon_id = %coupon_id, order_id = %order_id, amount = %amount, "Coupon redeemed");
            }
            Event::GiftCardRedeemed {
                gift_card_id,
                order_id,
                amount,
            } => {
                info!(gift_card_id = %gift_card_id, order_id = %order_id, amount = %amount, "Gift card redeemed");
            }
            other => {
                info!(event = ?other, "Event");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        let cart_id = Uuid::new_v4();
        sender.send(Event::CartCreated(cart_id)).await.unwrap();

        match rx.recv().await {
            Some(Event::CartCreated(id)) => assert_eq!(id, cart_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        // Must not panic or error out.
        sender.send_or_log(Event::CartCleared(Uuid::new_v4())).await;
    }
}
