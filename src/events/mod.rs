use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

// Domain events emitted after their database transaction commits. Consumers
// must tolerate missing notifications; the ledger is the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
    },
    OrderPaid {
        order_id: Uuid,
        transaction_id: i64,
    },
    OrderPaymentFailed {
        order_id: Uuid,
        transaction_id: i64,
    },
    StockRestored {
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
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

    /// Sends an event, logging instead of failing when the consumer is gone.
    /// Event delivery is best-effort and must never abort the request path.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("event channel closed, dropping event: {}", e);
        }
    }
}

/// Drains the event channel and logs each event. Fulfilment and notification
/// consumers hook in here.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPlaced {
                order_id,
                user_id,
                total_amount,
            } => {
                info!(%order_id, %user_id, %total_amount, "order placed");
            }
            Event::OrderPaid {
                order_id,
                transaction_id,
            } => {
                info!(%order_id, transaction_id, "order paid");
            }
            Event::OrderPaymentFailed {
                order_id,
                transaction_id,
            } => {
                warn!(%order_id, transaction_id, "order payment failed");
            }
            Event::StockRestored {
                order_id,
                product_id,
                quantity,
            } => {
                info!(%order_id, %product_id, quantity, "stock restored after failed payment");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_after_receiver_drop_does_not_panic() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender
            .send(Event::OrderPaid {
                order_id: Uuid::new_v4(),
                transaction_id: 42,
            })
            .await;
    }
}
