use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use signoff_core::domain::notification::ApprovalNotification;
use signoff_core::workflow::DeliveryChannel;

/// Hands persisted notification records to a background delivery worker.
/// Publishing never waits on delivery and never fails the caller.
#[derive(Clone, Default)]
pub struct NotificationOutbox {
    sender: Option<mpsc::UnboundedSender<ApprovalNotification>>,
}

impl NotificationOutbox {
    /// An outbox that records nothing beyond the database rows.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Spawns the delivery worker on the current runtime. The worker exits
    /// once every outbox clone has been dropped and the queue is drained.
    pub fn spawn(channel: Arc<dyn DeliveryChannel>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(deliver_until_closed(channel, receiver));
        (Self { sender: Some(sender) }, worker)
    }

    pub fn publish(&self, notifications: &[ApprovalNotification]) {
        let Some(sender) = &self.sender else {
            return;
        };

        for notification in notifications {
            if sender.send(notification.clone()).is_err() {
                warn!(
                    event_name = "notification.outbox.closed",
                    request_id = %notification.request_id,
                    notification_id = %notification.id,
                    "delivery worker is gone; notification stays stored but undelivered"
                );
                return;
            }
        }
    }
}

async fn deliver_until_closed(
    channel: Arc<dyn DeliveryChannel>,
    mut receiver: mpsc::UnboundedReceiver<ApprovalNotification>,
) {
    while let Some(notification) = receiver.recv().await {
        match channel.deliver(&notification).await {
            Ok(()) => info!(
                event_name = "notification.delivered",
                channel = channel.name(),
                request_id = %notification.request_id,
                notification_id = %notification.id,
                notification_type = notification.notification_type.as_str(),
                "notification delivered"
            ),
            Err(error) => warn!(
                event_name = "notification.delivery_failed",
                channel = channel.name(),
                request_id = %notification.request_id,
                notification_id = %notification.id,
                error = %error,
                "notification delivery failed"
            ),
        }
    }

    info!(
        event_name = "notification.outbox.drained",
        channel = channel.name(),
        "notification delivery worker stopped"
    );
}
