use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the storefront core. The processor task logs them; other
/// consumers can be attached to the channel without touching the services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartUpdated(Uuid),
    CartCleared(Uuid),

    // Coupon events
    CouponCreated(String),
    CouponDeactivated(String),
    CouponRedeemed(String),

    // Checkout / order events
    CheckoutCompleted { cart_id: Uuid, order_id: Uuid },
    OrderCreated(Uuid),
    OrderPaid(Uuid),
    OrderFailed(Uuid),

    // Payment events
    PaymentCaptured { order_id: Uuid, provider_payment_id: String },
    PaymentFailed(Uuid),

    /// A verified webhook tried an illegal transition (e.g. `payment.failed`
    /// after `paid`). Recorded for operator follow-up, never applied.
    WebhookAnomaly {
        order_id: Option<Uuid>,
        event: String,
        detail: String,
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

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Event delivery is best-effort; it never blocks a state mutation.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event dropped: {}", e);
        }
    }
}

/// Background task consuming the event channel.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::WebhookAnomaly {
                order_id,
                event,
                detail,
            } => {
                warn!(?order_id, event = %event, detail = %detail, "webhook anomaly recorded");
            }
            other => info!(event = ?other, "event processed"),
        }
    }
    info!("Event channel closed; processor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_does_not_error_on_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        // Must not panic or return an error to the caller.
        sender.send_or_log(Event::OrderCreated(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn events_round_trip_through_channel() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let order_id = Uuid::new_v4();
        sender.send(Event::OrderPaid(order_id)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderPaid(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
