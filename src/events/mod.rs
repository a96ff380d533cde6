use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events published to the external event log. Delivery guarantees
/// belong to the consumer side; producers fire and forget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    CheckoutStarted {
        session_id: Uuid,
        short_link_id: Uuid,
        offer_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
        total: i64,
        currency: String,
    },
    ReservationCreated {
        reservation_id: Uuid,
        session_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
        expires_at: DateTime<Utc>,
    },
    ReservationExpired {
        reservation_id: Uuid,
        session_id: Uuid,
    },
    PurchaseCompleted {
        order_id: Uuid,
        session_id: Option<Uuid>,
        short_link_id: Option<Uuid>,
        total: i64,
        currency: String,
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

    /// Sends an event, logging instead of failing when the channel is
    /// unavailable. Event delivery never gates the request path.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Consumes events off the channel and hands them to the event log.
/// Currently the log sink is structured tracing output.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::CheckoutStarted {
                session_id,
                short_link_id,
                variant_id,
                quantity,
                total,
                currency,
                ..
            } => {
                info!(
                    %session_id,
                    %short_link_id,
                    %variant_id,
                    quantity,
                    total,
                    %currency,
                    "checkout started"
                );
            }
            Event::ReservationCreated {
                reservation_id,
                session_id,
                variant_id,
                quantity,
                expires_at,
            } => {
                info!(
                    %reservation_id,
                    %session_id,
                    %variant_id,
                    quantity,
                    %expires_at,
                    "reservation created"
                );
            }
            Event::ReservationExpired {
                reservation_id,
                session_id,
            } => {
                info!(%reservation_id, %session_id, "reservation expired");
            }
            Event::PurchaseCompleted {
                order_id,
                session_id,
                total,
                currency,
                ..
            } => {
                info!(
                    %order_id,
                    session_id = ?session_id,
                    total,
                    %currency,
                    "purchase completed"
                );
            }
        }
    }

    info!("Event processing loop stopped");
}
