use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Events emitted by the checkout/payment core.
///
/// Events are advisory notifications for downstream consumers (email,
/// analytics, fulfillment); no core invariant depends on their delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartUpdated(Uuid),
    CartMerged {
        user_cart_id: Uuid,
        guest_cart_id: Uuid,
    },
    CartsReaped {
        count: u64,
    },

    // Order events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),

    // Payment events
    PaymentCreated(Uuid),
    PaymentCaptured(Uuid),
    PaymentFailed(Uuid),
    PaymentRefunded(Uuid),

    // Stock events
    StockDecremented {
        product_id: Uuid,
        quantity: i32,
    },
    StockRestored {
        product_id: Uuid,
        quantity: i32,
    },
    LowStock {
        product_id: Uuid,
        remaining: i32,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
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

    /// Sends an event, logging rather than propagating delivery failure.
    /// Used on paths where the surrounding transaction already committed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event.clone()).await {
            warn!(?event, "event delivery failed: {}", e);
        }
    }
}

/// Drains the event channel, logging each event. Deployments that fan
/// events out to real consumers replace this task.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        debug!(?event, "event processed");
    }
}

/// Builds a connected sender/receiver pair with the given buffer.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_receive() {
        let (sender, mut rx) = channel(4);
        let order_id = Uuid::new_v4();
        sender.send(Event::OrderCreated(order_id)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (sender, rx) = channel(1);
        drop(rx);
        // Must not panic or error out.
        sender.send_or_log(Event::CartCreated(Uuid::new_v4())).await;
    }
}
