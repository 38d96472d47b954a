use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::domain::normalize_identity;
use crate::domain::notification::{ApprovalNotification, NotificationId, NotificationType};
use crate::domain::request::RequestId;
use crate::errors::DomainError;

type HmacSha256 = Hmac<Sha256>;

/// A notification the state machine wants sent, before recipients are fanned
/// out into individual records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub request_id: RequestId,
    pub notification_type: NotificationType,
    pub recipients: Vec<String>,
    pub message: String,
}

impl NotificationIntent {
    pub fn new(
        request_id: RequestId,
        notification_type: NotificationType,
        recipients: impl IntoIterator<Item = String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            notification_type,
            recipients: recipients.into_iter().collect(),
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct NotificationDispatcher;

impl NotificationDispatcher {
    /// One unread record per distinct recipient. Blank recipients are dropped.
    pub fn notify(&self, intent: &NotificationIntent, now: DateTime<Utc>) -> Vec<ApprovalNotification> {
        let recipients: BTreeSet<String> = intent
            .recipients
            .iter()
            .map(|recipient| normalize_identity(recipient))
            .filter(|recipient| !recipient.is_empty())
            .collect();

        recipients
            .into_iter()
            .map(|recipient| ApprovalNotification {
                id: NotificationId::generate(),
                request_id: intent.request_id.clone(),
                recipient,
                notification_type: intent.notification_type,
                message: intent.message.clone(),
                sent_date: now,
                is_read: false,
            })
            .collect()
    }

    pub fn notify_all(
        &self,
        intents: &[NotificationIntent],
        now: DateTime<Utc>,
    ) -> Vec<ApprovalNotification> {
        intents.iter().flat_map(|intent| self.notify(intent, now)).collect()
    }

    /// Only the recipient may flip `is_read`. Returns whether the record changed.
    pub fn mark_read(
        &self,
        notification: &mut ApprovalNotification,
        acting_user: &str,
    ) -> Result<bool, DomainError> {
        if normalize_identity(acting_user) != normalize_identity(&notification.recipient) {
            return Err(DomainError::NotificationForbidden {
                notification_id: notification.id.clone(),
                acting_user: acting_user.trim().to_string(),
            });
        }

        if notification.is_read {
            return Ok(false);
        }
        notification.is_read = true;
        Ok(true)
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery transport failed: {0}")]
    Transport(String),
    #[error("delivery endpoint rejected notification with status {0}")]
    Rejected(u16),
    #[error("delivery payload could not be encoded: {0}")]
    Encoding(String),
}

/// Outbound transport for notification records (email, push, webhook). The
/// request-processing path never waits on it.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, notification: &ApprovalNotification) -> Result<(), DeliveryError>;
}

/// Hex-encoded HMAC-SHA256 of `payload` keyed by `secret`.
pub fn sign_payload(secret: &[u8], payload: &[u8]) -> Result<String, DeliveryError> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|error| DeliveryError::Encoding(error.to_string()))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
