use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Notifications emitted after a coupon unit of work commits.
///
/// Delivery is best effort. A full or closed channel never fails the
/// operation that produced the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CouponIssued {
        template_id: Uuid,
        user_id: Uuid,
        coupon_ids: Vec<Uuid>,
    },
    CouponAssigned {
        coupon_id: Uuid,
        template_id: Uuid,
        user_id: Uuid,
        assigned_by: Uuid,
    },
    CouponRedeemed {
        coupon_id: Uuid,
        usage_log_id: Uuid,
        times_used: i32,
        fully_used: bool,
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

    /// Sends an event, waiting for channel capacity
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends without waiting; drops and logs the event if the channel is
    /// full or closed.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping coupon event: {}", e);
        }
    }
}

/// Drains the channel and logs every event until all senders are gone.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::CouponIssued {
                template_id,
                user_id,
                coupon_ids,
            } => {
                info!(
                    template_id = %template_id,
                    user_id = %user_id,
                    count = coupon_ids.len(),
                    "Coupons issued"
                );
            }
            Event::CouponAssigned {
                coupon_id,
                user_id,
                assigned_by,
                ..
            } => {
                info!(
                    coupon_id = %coupon_id,
                    user_id = %user_id,
                    assigned_by = %assigned_by,
                    "Coupon assigned"
                );
            }
            Event::CouponRedeemed {
                coupon_id,
                times_used,
                fully_used,
                ..
            } => {
                info!(
                    coupon_id = %coupon_id,
                    times_used,
                    fully_used,
                    "Coupon redeemed"
                );
            }
        }
    }

    warn!("Event processing loop has ended");
}
