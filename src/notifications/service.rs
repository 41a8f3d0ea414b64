use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::models::Subscription;
use super::senders::PushSender;
use super::store::{StoreError, SubscriptionStore};

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("Subscription store error: {0}")]
    Store(#[from] StoreError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of one delivery attempt to one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Gone,
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
    pub pruned: usize,
    pub failed: usize,
}

/// Pushes payloads to every stored subscription and prunes the ones the
/// push service reports as gone.
pub struct NotificationService {
    store: Arc<SubscriptionStore>,
    sender: Arc<dyn PushSender>,
    delivery_timeout: Duration,
    max_concurrent_deliveries: usize,
}

impl NotificationService {
    pub fn new(
        store: Arc<SubscriptionStore>,
        sender: Arc<dyn PushSender>,
        delivery_timeout: Duration,
        max_concurrent_deliveries: usize,
    ) -> Self {
        Self {
            store,
            sender,
            delivery_timeout,
            max_concurrent_deliveries: max_concurrent_deliveries.max(1),
        }
    }

    /// Sends `payload` once to every subscription, then removes the gone ones
    /// from the store. Transient failures are logged and the subscription is
    /// kept for the next broadcast.
    pub async fn broadcast<T>(&self, payload: &T) -> Result<BroadcastReport, NotifierError>
    where
        T: Serialize + ?Sized + Sync,
    {
        if self.store.is_absent_or_empty().await {
            debug!("No push subscriptions stored. Nothing to broadcast.");
            return Ok(BroadcastReport::default());
        }

        let payload = serde_json::to_vec(payload)?;
        let subscriptions = self.store.load().await?;
        if subscriptions.is_empty() {
            return Ok(BroadcastReport::default());
        }

        let outcomes: Vec<(Subscription, DeliveryOutcome)> = stream::iter(subscriptions)
            .map(|subscription| {
                let payload = payload.as_slice();
                async move {
                    let outcome = self.deliver(&subscription, payload).await;
                    (subscription, outcome)
                }
            })
            .buffer_unordered(self.max_concurrent_deliveries)
            .collect()
            .await;

        let mut report = BroadcastReport {
            attempted: outcomes.len(),
            ..Default::default()
        };
        let mut gone = Vec::new();
        for (subscription, outcome) in outcomes {
            match outcome {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::Gone => {
                    debug!(
                        endpoint = %subscription.endpoint,
                        "Push endpoint is gone. Pruning subscription."
                    );
                    gone.push(subscription);
                }
                DeliveryOutcome::Failed(reason) => {
                    warn!(
                        endpoint = %subscription.endpoint,
                        error = %reason,
                        "Push delivery failed. Keeping subscription."
                    );
                    report.failed += 1;
                }
            }
        }

        report.pruned = self.store.prune(&gone).await?;

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            pruned = report.pruned,
            failed = report.failed,
            "Push broadcast finished."
        );
        Ok(report)
    }

    async fn deliver(&self, subscription: &Subscription, payload: &[u8]) -> DeliveryOutcome {
        match timeout(self.delivery_timeout, self.sender.send(subscription, payload)).await {
            Ok(Ok(())) => DeliveryOutcome::Delivered,
            Ok(Err(e)) if e.is_gone() => DeliveryOutcome::Gone,
            Ok(Err(e)) => DeliveryOutcome::Failed(e.to_string()),
            Err(_) => DeliveryOutcome::Failed(format!(
                "timed out after {}s",
                self.delivery_timeout.as_secs_f64()
            )),
        }
    }
}
