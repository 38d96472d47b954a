use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};

use signoff_core::domain::action::{ActionId, ActionKind, ApprovalAction};
use signoff_core::domain::chain::{ApprovalChain, ApprovalStep, ChainId};
use signoff_core::domain::document::DocumentType;
use signoff_core::domain::notification::{ApprovalNotification, NotificationId, NotificationType};
use signoff_core::domain::request::{ApprovalRequest, RequestId, RequestStatus};

use super::RepositoryError;

pub(crate) const CHAIN_COLUMNS: &str =
    "id, chain_name, document_type, steps_json, is_active, created_by, created_at";

pub(crate) const REQUEST_COLUMNS: &str = "id, chain_id, chain_name, steps_json, document_type, \
     document_id, document_name, requested_by, request_date, current_step, status, completed_date";

pub(crate) const ACTION_COLUMNS: &str =
    "id, request_id, step_order, approver_email, action, action_date, comments, delegated_to";

pub(crate) const NOTIFICATION_COLUMNS: &str =
    "id, request_id, recipient, notification_type, message, sent_date, is_read";

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

fn timestamp(name: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{name}: `{raw}` is not RFC3339: {e}")))
}

fn step_order(name: &str, raw: i64) -> Result<u32, RepositoryError> {
    u32::try_from(raw).map_err(|_| RepositoryError::Decode(format!("{name}: {raw} is out of range")))
}

pub(crate) fn encode_steps(steps: &[ApprovalStep]) -> Result<String, RepositoryError> {
    serde_json::to_string(steps).map_err(|e| RepositoryError::Encode(format!("steps: {e}")))
}

fn decode_steps(raw: &str) -> Result<Vec<ApprovalStep>, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Decode(format!("steps_json: {e}")))
}

pub(crate) fn row_to_chain(row: &SqliteRow) -> Result<ApprovalChain, RepositoryError> {
    let document_type: String = column(row, "document_type")?;
    let steps_json: String = column(row, "steps_json")?;
    let created_at: String = column(row, "created_at")?;

    Ok(ApprovalChain {
        id: ChainId(column(row, "id")?),
        chain_name: column(row, "chain_name")?,
        document_type: DocumentType::parse(&document_type),
        steps: decode_steps(&steps_json)?,
        is_active: column(row, "is_active")?,
        created_by: column(row, "created_by")?,
        created_at: timestamp("created_at", &created_at)?,
    })
}

pub(crate) fn row_to_request(row: &SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let document_type: String = column(row, "document_type")?;
    let steps_json: String = column(row, "steps_json")?;
    let request_date: String = column(row, "request_date")?;
    let completed_date: Option<String> = column(row, "completed_date")?;
    let current_step: i64 = column(row, "current_step")?;
    let status: String = column(row, "status")?;

    Ok(ApprovalRequest {
        id: RequestId(column(row, "id")?),
        chain_id: ChainId(column(row, "chain_id")?),
        chain_name: column(row, "chain_name")?,
        steps: decode_steps(&steps_json)?,
        document_type: DocumentType::parse(&document_type),
        document_id: column(row, "document_id")?,
        document_name: column(row, "document_name")?,
        requested_by: column(row, "requested_by")?,
        request_date: timestamp("request_date", &request_date)?,
        current_step: step_order("current_step", current_step)?,
        status: RequestStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("status: unknown `{status}`")))?,
        completed_date: completed_date
            .map(|raw| timestamp("completed_date", &raw))
            .transpose()?,
    })
}

pub(crate) fn row_to_action(row: &SqliteRow) -> Result<ApprovalAction, RepositoryError> {
    let step: i64 = column(row, "step_order")?;
    let action: String = column(row, "action")?;
    let action_date: String = column(row, "action_date")?;

    Ok(ApprovalAction {
        id: ActionId(column(row, "id")?),
        request_id: RequestId(column(row, "request_id")?),
        step_order: step_order("step_order", step)?,
        approver_email: column(row, "approver_email")?,
        action: ActionKind::parse(&action)
            .ok_or_else(|| RepositoryError::Decode(format!("action: unknown `{action}`")))?,
        action_date: timestamp("action_date", &action_date)?,
        comments: column(row, "comments")?,
        delegated_to: column(row, "delegated_to")?,
    })
}

pub(crate) fn row_to_notification(
    row: &SqliteRow,
) -> Result<ApprovalNotification, RepositoryError> {
    let notification_type: String = column(row, "notification_type")?;
    let sent_date: String = column(row, "sent_date")?;

    Ok(ApprovalNotification {
        id: NotificationId(column(row, "id")?),
        request_id: RequestId(column(row, "request_id")?),
        recipient: column(row, "recipient")?,
        notification_type: NotificationType::parse(&notification_type).ok_or_else(|| {
            RepositoryError::Decode(format!("notification_type: unknown `{notification_type}`"))
        })?,
        message: column(row, "message")?,
        sent_date: timestamp("sent_date", &sent_date)?,
        is_read: column(row, "is_read")?,
    })
}

pub(crate) async fn insert_notification<'e, E>(
    executor: E,
    notification: &ApprovalNotification,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO approval_notification
             (id, request_id, recipient, notification_type, message, sent_date, is_read)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(notification.id.as_str())
    .bind(notification.request_id.as_str())
    .bind(&notification.recipient)
    .bind(notification.notification_type.as_str())
    .bind(&notification.message)
    .bind(notification.sent_date.to_rfc3339())
    .bind(notification.is_read)
    .execute(executor)
    .await?;

    Ok(())
}
