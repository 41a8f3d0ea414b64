use async_trait::async_trait;
use thiserror::Error;

use super::models::Subscription;

pub mod web_push_sender;

#[derive(Error, Debug)]
pub enum SenderError {
    /// The push service reported the endpoint as permanently invalid
    /// (404 Not Found or 410 Gone).
    #[error("Push endpoint is gone: {0}")]
    Gone(String),
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),
}

impl SenderError {
    /// Only gone endpoints are pruned; every other failure is transient.
    pub fn is_gone(&self) -> bool {
        matches!(self, SenderError::Gone(_))
    }
}

/// Delivers one already-serialized payload to one push subscription.
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Makes a single delivery attempt. Implementations must not retry.
    async fn send(&self, subscription: &Subscription, payload: &[u8]) -> Result<(), SenderError>;
}
