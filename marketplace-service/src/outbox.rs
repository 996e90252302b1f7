use shared::MarketError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info};

use crate::store::MarketStore;

const BATCH_SIZE: i64 = 100;

/// Drains the outbox into notifications.
///
/// Delivery is at-least-once per entry: a failed entry stays unprocessed and
/// is picked up again on the next tick. Failures never reach the transition
/// that queued the entry.
pub struct NotificationDispatcher {
    store: Arc<dyn MarketStore>,
    interval: Duration,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn MarketStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.dispatch_pending().await {
                error!("Error dispatching notifications: {}", e);
            }
        }
    }

    /// Delivers one batch and returns how many notifications were created.
    pub async fn dispatch_pending(&self) -> Result<usize, MarketError> {
        let pending = self.store.pending_outbox(BATCH_SIZE).await?;
        let mut delivered = 0;

        for entry in pending {
            match self.store.deliver(&entry).await {
                Ok(Some(notification)) => {
                    delivered += 1;
                    debug!(
                        "Delivered outbox entry {} as notification {} to {}",
                        entry.id, notification.id, notification.recipient_id
                    );
                }
                Ok(None) => debug!("Outbox entry {} already delivered", entry.id),
                Err(e) => error!("Failed to deliver outbox entry {}: {}", entry.id, e),
            }
        }

        if delivered > 0 {
            info!("Delivered {} notifications", delivered);
        }
        Ok(delivered)
    }
}
