use signoff_core::domain::normalize_identity;
use signoff_core::domain::notification::{ApprovalNotification, NotificationId};

use super::rows::{row_to_notification, NOTIFICATION_COLUMNS};
use super::{NotificationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlNotificationRepository {
    pool: DbPool,
}

impl SqlNotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NotificationRepository for SqlNotificationRepository {
    async fn list_for_recipient(
        &self,
        recipient: &str,
        unread_only: bool,
    ) -> Result<Vec<ApprovalNotification>, RepositoryError> {
        let unread_clause = if unread_only { " AND is_read = 0" } else { "" };
        let rows = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM approval_notification
             WHERE recipient = ?{unread_clause}
             ORDER BY sent_date DESC, rowid DESC"
        ))
        .bind(normalize_identity(recipient))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_notification).collect()
    }

    async fn find(
        &self,
        id: &NotificationId,
    ) -> Result<Option<ApprovalNotification>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM approval_notification WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_notification).transpose()
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<bool, RepositoryError> {
        let updated =
            sqlx::query("UPDATE approval_notification SET is_read = 1 WHERE id = ? AND is_read = 0")
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;

        Ok(updated.rows_affected() > 0)
    }
}
