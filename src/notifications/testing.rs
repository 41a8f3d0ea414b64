//! Test doubles shared by the notification, monitor and web tests.
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use super::models::{Subscription, SubscriptionKeys};
use super::senders::{PushSender, SenderError};

pub fn subscription(endpoint: &str) -> Subscription {
    Subscription {
        endpoint: endpoint.to_string(),
        keys: SubscriptionKeys {
            p256dh: concat!(
                "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA_0QTpQtUbVlUls0VJXg7A8u-",
                "Ts1XbjhazAkj7I99e8QcYP7DkM"
            )
            .to_string(),
            auth: "tBHItJI5svbpez7KI4CCXg".to_string(),
            extra: Default::default(),
        },
        extra: Default::default(),
    }
}

/// Records every send and answers per endpoint: gone, failing, hanging, or
/// delivered by default.
#[derive(Default)]
pub struct RecordingSender {
    gone: HashSet<String>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    attempts: Mutex<Vec<String>>,
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gone(mut self, endpoint: &str) -> Self {
        self.gone.insert(endpoint.to_string());
        self
    }

    pub fn with_failing(mut self, endpoint: &str) -> Self {
        self.failing.insert(endpoint.to_string());
        self
    }

    pub fn with_hanging(mut self, endpoint: &str) -> Self {
        self.hanging.insert(endpoint.to_string());
        self
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self, endpoint: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == endpoint)
            .count()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushSender for RecordingSender {
    async fn send(&self, subscription: &Subscription, payload: &[u8]) -> Result<(), SenderError> {
        self.attempts
            .lock()
            .unwrap()
            .push(subscription.endpoint.clone());
        self.payloads.lock().unwrap().push(payload.to_vec());

        let endpoint = subscription.endpoint.as_str();
        if self.hanging.contains(endpoint) {
            std::future::pending::<()>().await;
        }
        if self.gone.contains(endpoint) {
            return Err(SenderError::Gone(endpoint.to_string()));
        }
        if self.failing.contains(endpoint) {
            return Err(SenderError::SendFailed("push service returned 500".to_string()));
        }
        Ok(())
    }
}
