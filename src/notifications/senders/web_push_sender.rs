use async_trait::async_trait;
use web_push::{
    ContentEncoding, HyperWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder,
};

use super::{PushSender, SenderError};
use crate::notifications::models::Subscription;

/// Seconds a push service may hold an undelivered message.
const DEFAULT_TTL_SECONDS: u32 = 24 * 60 * 60;

/// A sender for browser push notifications signed with the service's VAPID key.
pub struct WebPushSender {
    client: HyperWebPushClient,
    private_key_pem: Vec<u8>,
    subject: String,
    ttl: u32,
}

impl WebPushSender {
    /// `subject` is the VAPID `sub` claim, usually a `mailto:` address.
    pub fn new(private_key_pem: Vec<u8>, subject: String) -> Self {
        Self {
            client: HyperWebPushClient::new(),
            private_key_pem,
            subject,
            ttl: DEFAULT_TTL_SECONDS,
        }
    }
}

fn classify(error: WebPushError) -> SenderError {
    match error {
        WebPushError::EndpointNotValid { .. } | WebPushError::EndpointNotFound { .. } => {
            SenderError::Gone(error.to_string())
        }
        WebPushError::InvalidUri
        | WebPushError::MissingCryptoKeys
        | WebPushError::InvalidCryptoKeys => SenderError::InvalidSubscription(error.to_string()),
        _ => SenderError::SendFailed(error.to_string()),
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send(&self, subscription: &Subscription, payload: &[u8]) -> Result<(), SenderError> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.as_str(),
            subscription.keys.p256dh.as_str(),
            subscription.keys.auth.as_str(),
        );

        let mut signature_builder =
            VapidSignatureBuilder::from_pem(self.private_key_pem.as_slice(), &info)
                .map_err(|e| SenderError::InvalidConfiguration(e.to_string()))?;
        signature_builder.add_claim("sub", self.subject.as_str());
        let signature = signature_builder.build().map_err(classify)?;

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_ttl(self.ttl);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_vapid_signature(signature);
        let message = builder.build().map_err(classify)?;

        self.client.send(message).await.map_err(classify)
    }
}
