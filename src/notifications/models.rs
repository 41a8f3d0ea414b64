use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Encryption keys the browser hands out with a push subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A browser push subscription (`PushSubscription.toJSON()`).
///
/// Equality is structural over every field, including ones we do not
/// interpret (e.g. `expirationTime`), which are kept verbatim in `extra`,
/// at the top level and inside `keys`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The message pushed when disk usage crosses the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
}

/// API request body for removing a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}
