use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::info;

use signoff_core::config::NotificationsConfig;
use signoff_core::domain::notification::ApprovalNotification;
use signoff_core::workflow::{sign_payload, DeliveryChannel, DeliveryError};

pub const SIGNATURE_HEADER: &str = "X-Signoff-Signature";

/// Body posted to the webhook for every notification record.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub notification_id: &'a str,
    pub request_id: &'a str,
    pub recipient: &'a str,
    pub notification_type: &'static str,
    pub message: &'a str,
    pub sent_date: String,
}

impl<'a> WebhookPayload<'a> {
    pub fn from_notification(notification: &'a ApprovalNotification) -> Self {
        Self {
            notification_id: notification.id.as_str(),
            request_id: notification.request_id.as_str(),
            recipient: &notification.recipient,
            notification_type: notification.notification_type.as_str(),
            message: &notification.message,
            sent_date: notification.sent_date.to_rfc3339(),
        }
    }
}

/// Posts notifications as JSON. When a signing secret is configured the body
/// is signed with HMAC-SHA256 and the hex digest sent as `sha256=<hex>`.
pub struct WebhookDeliveryChannel {
    client: Client,
    url: String,
    signing_secret: Option<SecretString>,
}

impl WebhookDeliveryChannel {
    pub fn new(
        url: impl Into<String>,
        signing_secret: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| DeliveryError::Transport(error.to_string()))?;
        Ok(Self { client, url: url.into(), signing_secret })
    }

    pub fn signature_for(&self, body: &[u8]) -> Result<Option<String>, DeliveryError> {
        self.signing_secret
            .as_ref()
            .map(|secret| {
                sign_payload(secret.expose_secret().as_bytes(), body)
                    .map(|digest| format!("sha256={digest}"))
            })
            .transpose()
    }
}

#[async_trait]
impl DeliveryChannel for WebhookDeliveryChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, notification: &ApprovalNotification) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(&WebhookPayload::from_notification(notification))
            .map_err(|error| DeliveryError::Encoding(error.to_string()))?;

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(signature) = self.signature_for(&body)? {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|error| DeliveryError::Transport(error.to_string()))?;
        if !response.status().is_success() {
            return Err(DeliveryError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Used when no webhook is configured: the record is stored and the delivery
/// is only logged.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDeliveryChannel;

#[async_trait]
impl DeliveryChannel for LogDeliveryChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, notification: &ApprovalNotification) -> Result<(), DeliveryError> {
        info!(
            event_name = "notification.logged",
            request_id = %notification.request_id,
            recipient = %notification.recipient,
            notification_type = notification.notification_type.as_str(),
            "notification recorded without external delivery"
        );
        Ok(())
    }
}

pub fn channel_from_config(
    config: &NotificationsConfig,
) -> Result<Arc<dyn DeliveryChannel>, DeliveryError> {
    match &config.webhook_url {
        Some(url) => Ok(Arc::new(WebhookDeliveryChannel::new(
            url.clone(),
            config.signing_secret.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Arc::new(LogDeliveryChannel)),
    }
}
