use sqlx::{QueryBuilder, Sqlite};

use signoff_core::domain::action::ApprovalAction;
use signoff_core::domain::normalize_identity;
use signoff_core::domain::notification::ApprovalNotification;
use signoff_core::domain::request::{ApprovalRequest, RequestFilter, RequestId};

use super::rows::{
    encode_steps, insert_notification, row_to_action, row_to_request, ACTION_COLUMNS,
    REQUEST_COLUMNS,
};
use super::{CommitOutcome, RepositoryError, RequestCommit, RequestInsertOutcome, RequestRepository};
use crate::DbPool;

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn insert_if_chain_active(
        &self,
        request: ApprovalRequest,
        notifications: Vec<ApprovalNotification>,
    ) -> Result<RequestInsertOutcome, RepositoryError> {
        let steps_json = encode_steps(&request.steps)?;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO approval_request
                 (id, chain_id, chain_name, steps_json, document_type, document_id, document_name,
                  requested_by, request_date, current_step, status, completed_date)
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
             WHERE EXISTS (SELECT 1 FROM approval_chain WHERE id = ? AND is_active = 1)",
        )
        .bind(request.id.as_str())
        .bind(request.chain_id.as_str())
        .bind(&request.chain_name)
        .bind(steps_json)
        .bind(request.document_type.as_str())
        .bind(&request.document_id)
        .bind(&request.document_name)
        .bind(&request.requested_by)
        .bind(request.request_date.to_rfc3339())
        .bind(i64::from(request.current_step))
        .bind(request.status.as_str())
        .bind(request.completed_date.map(|dt| dt.to_rfc3339()))
        .bind(request.chain_id.as_str())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            let is_active: Option<bool> =
                sqlx::query_scalar("SELECT is_active FROM approval_chain WHERE id = ?")
                    .bind(request.chain_id.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return Ok(match is_active {
                Some(_) => RequestInsertOutcome::ChainInactive,
                None => RequestInsertOutcome::ChainNotFound,
            });
        }

        for notification in &notifications {
            insert_notification(&mut *tx, notification).await?;
        }

        tx.commit().await?;
        Ok(RequestInsertOutcome::Inserted)
    }

    async fn find(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE id = ?"))
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_request).transpose()
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let mut query: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE 1 = 1"));

        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(document_type) = &filter.document_type {
            query.push(" AND document_type = ").push_bind(document_type.as_str().to_string());
        }
        if let Some(requested_by) = &filter.requested_by {
            query
                .push(" AND lower(trim(requested_by)) = ")
                .push_bind(normalize_identity(requested_by));
        }
        query.push(" ORDER BY request_date DESC, id ASC");

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_request).collect()
    }

    async fn list_actions(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalAction>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS} FROM approval_action
             WHERE request_id = ?
             ORDER BY action_date ASC, rowid ASC"
        ))
        .bind(request_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_action).collect()
    }

    async fn commit(&self, commit: RequestCommit) -> Result<CommitOutcome, RepositoryError> {
        let RequestCommit { expected_step, expected_action_count, request, action, notifications } =
            commit;
        let expected_action_count = i64::try_from(expected_action_count)
            .map_err(|_| RepositoryError::Encode("action count out of range".to_string()))?;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE approval_request
             SET current_step = ?, status = ?, completed_date = ?
             WHERE id = ?
               AND status = 'pending'
               AND current_step = ?
               AND (SELECT COUNT(*) FROM approval_action WHERE request_id = ?) = ?",
        )
        .bind(i64::from(request.current_step))
        .bind(request.status.as_str())
        .bind(request.completed_date.map(|dt| dt.to_rfc3339()))
        .bind(request.id.as_str())
        .bind(i64::from(expected_step))
        .bind(request.id.as_str())
        .bind(expected_action_count)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            let current = self.find(&request.id).await?;
            return Ok(CommitOutcome::Conflict { current });
        }

        if let Some(action) = &action {
            sqlx::query(
                "INSERT INTO approval_action
                     (id, request_id, step_order, approver_email, action, action_date, comments,
                      delegated_to)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(action.id.as_str())
            .bind(action.request_id.as_str())
            .bind(i64::from(action.step_order))
            .bind(&action.approver_email)
            .bind(action.action.as_str())
            .bind(action.action_date.to_rfc3339())
            .bind(&action.comments)
            .bind(&action.delegated_to)
            .execute(&mut *tx)
            .await?;
        }

        for notification in &notifications {
            insert_notification(&mut *tx, notification).await?;
        }

        tx.commit().await?;
        Ok(CommitOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use signoff_core::domain::action::{ActionId, ActionKind, ApprovalAction};
    use signoff_core::domain::chain::{ApprovalChain, ApprovalStep, ApprovalType, ChainId};
    use signoff_core::domain::document::DocumentType;
    use signoff_core::domain::notification::{
        ApprovalNotification, NotificationId, NotificationType,
    };
    use signoff_core::domain::request::{ApprovalRequest, RequestFilter, RequestId, RequestStatus};

    use super::SqlRequestRepository;
    use crate::repositories::{
        ChainRepository, CommitOutcome, NotificationRepository, RequestCommit, RequestInsertOutcome,
        RequestRepository, SqlChainRepository, SqlNotificationRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn steps() -> Vec<ApprovalStep> {
        vec![
            ApprovalStep {
                step_order: 1,
                approver_role: None,
                approver_email: Some("cfo@x.com".to_string()),
                approval_type: ApprovalType::Any,
                required: true,
            },
            ApprovalStep {
                step_order: 2,
                approver_role: None,
                approver_email: Some("ceo@x.com".to_string()),
                approval_type: ApprovalType::Any,
                required: true,
            },
        ]
    }

    async fn insert_chain(pool: &sqlx::SqlitePool, id: &str, is_active: bool) {
        SqlChainRepository::new(pool.clone())
            .insert(ApprovalChain {
                id: ChainId(id.to_string()),
                chain_name: "Two-Step Sign-off".to_string(),
                document_type: DocumentType::Budget,
                steps: steps(),
                is_active,
                created_by: "controller@x.com".to_string(),
                created_at: Utc::now(),
            })
            .await
            .expect("insert chain");
    }

    fn sample_request(id: &str, chain_id: &str, requested_by: &str) -> ApprovalRequest {
        ApprovalRequest {
            id: RequestId(id.to_string()),
            chain_id: ChainId(chain_id.to_string()),
            chain_name: "Two-Step Sign-off".to_string(),
            steps: steps(),
            document_type: DocumentType::Budget,
            document_id: "BUD-2026".to_string(),
            document_name: "FY26 budget".to_string(),
            requested_by: requested_by.to_string(),
            request_date: Utc::now(),
            current_step: 1,
            status: RequestStatus::Pending,
            completed_date: None,
        }
    }

    fn notification(request_id: &str, recipient: &str) -> ApprovalNotification {
        ApprovalNotification {
            id: NotificationId::generate(),
            request_id: RequestId(request_id.to_string()),
            recipient: recipient.to_string(),
            notification_type: NotificationType::ApprovalRequested,
            message: "FY26 budget is waiting for your approval".to_string(),
            sent_date: Utc::now(),
            is_read: false,
        }
    }

    fn approve(request_id: &str, approver: &str, step_order: u32) -> ApprovalAction {
        ApprovalAction {
            id: ActionId::generate(),
            request_id: RequestId(request_id.to_string()),
            step_order,
            approver_email: approver.to_string(),
            action: ActionKind::Approve,
            action_date: Utc::now(),
            comments: Some("looks right".to_string()),
            delegated_to: None,
        }
    }

    #[tokio::test]
    async fn insert_requires_an_active_chain() {
        let pool = setup().await;
        insert_chain(&pool, "CH-ON", true).await;
        insert_chain(&pool, "CH-OFF", false).await;
        let repo = SqlRequestRepository::new(pool.clone());

        let inserted = repo
            .insert_if_chain_active(
                sample_request("REQ-1", "CH-ON", "analyst@x.com"),
                vec![notification("REQ-1", "cfo@x.com")],
            )
            .await
            .expect("insert");
        assert_eq!(inserted, RequestInsertOutcome::Inserted);

        let inactive = repo
            .insert_if_chain_active(sample_request("REQ-2", "CH-OFF", "analyst@x.com"), Vec::new())
            .await
            .expect("insert");
        assert_eq!(inactive, RequestInsertOutcome::ChainInactive);

        let missing = repo
            .insert_if_chain_active(sample_request("REQ-3", "CH-404", "analyst@x.com"), Vec::new())
            .await
            .expect("insert");
        assert_eq!(missing, RequestInsertOutcome::ChainNotFound);

        let found = repo.find(&RequestId("REQ-1".to_string())).await.expect("find");
        assert_eq!(found.map(|request| request.steps), Some(steps()));
        assert!(repo.find(&RequestId("REQ-2".to_string())).await.expect("find").is_none());

        let inbox = SqlNotificationRepository::new(pool)
            .list_for_recipient("cfo@x.com", false)
            .await
            .expect("inbox");
        assert_eq!(inbox.len(), 1);
    }

    #[tokio::test]
    async fn list_applies_every_filter() {
        let pool = setup().await;
        insert_chain(&pool, "CH-1", true).await;
        let repo = SqlRequestRepository::new(pool);

        let mut older = sample_request("REQ-1", "CH-1", "analyst@x.com");
        older.request_date = Utc::now() - Duration::hours(1);
        repo.insert_if_chain_active(older, Vec::new()).await.expect("insert 1");
        repo.insert_if_chain_active(sample_request("REQ-2", "CH-1", "analyst@x.com"), Vec::new())
            .await
            .expect("insert 2");
        let mut statement = sample_request("REQ-3", "CH-1", "other@x.com");
        statement.document_type = DocumentType::Statement;
        repo.insert_if_chain_active(statement, Vec::new()).await.expect("insert 3");

        let all = repo.list(&RequestFilter::default()).await.expect("list");
        assert_eq!(all.len(), 3);

        let mine = repo
            .list(&RequestFilter {
                requested_by: Some("Analyst@X.com".to_string()),
                document_type: Some(DocumentType::Budget),
                status: Some(RequestStatus::Pending),
            })
            .await
            .expect("filtered");
        let ids: Vec<&str> = mine.iter().map(|request| request.id.as_str()).collect();
        assert_eq!(ids, vec!["REQ-2", "REQ-1"]);

        let approved = repo
            .list(&RequestFilter { status: Some(RequestStatus::Approved), ..RequestFilter::default() })
            .await
            .expect("approved");
        assert!(approved.is_empty());
    }

    #[tokio::test]
    async fn commit_applies_once_and_reports_the_winner_state() {
        let pool = setup().await;
        insert_chain(&pool, "CH-1", true).await;
        let repo = SqlRequestRepository::new(pool);
        let request = sample_request("REQ-1", "CH-1", "analyst@x.com");
        repo.insert_if_chain_active(request.clone(), Vec::new()).await.expect("insert");

        let mut advanced = request.clone();
        advanced.current_step = 2;
        let first = repo
            .commit(RequestCommit {
                expected_step: 1,
                expected_action_count: 0,
                request: advanced.clone(),
                action: Some(approve("REQ-1", "cfo@x.com", 1)),
                notifications: vec![notification("REQ-1", "ceo@x.com")],
            })
            .await
            .expect("commit");
        assert_eq!(first, CommitOutcome::Applied);

        let second = repo
            .commit(RequestCommit {
                expected_step: 1,
                expected_action_count: 0,
                request: advanced,
                action: Some(approve("REQ-1", "cfo-deputy@x.com", 1)),
                notifications: Vec::new(),
            })
            .await
            .expect("commit");
        match second {
            CommitOutcome::Conflict { current: Some(current) } => assert_eq!(current.current_step, 2),
            other => panic!("expected conflict, got {other:?}"),
        }

        let actions = repo.list_actions(&request.id).await.expect("actions");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].approver_email, "cfo@x.com");
        assert_eq!(actions[0].comments.as_deref(), Some("looks right"));
    }

    #[tokio::test]
    async fn commit_detects_actions_recorded_by_another_writer() {
        let pool = setup().await;
        insert_chain(&pool, "CH-1", true).await;
        let repo = SqlRequestRepository::new(pool);
        let request = sample_request("REQ-1", "CH-1", "analyst@x.com");
        repo.insert_if_chain_active(request.clone(), Vec::new()).await.expect("insert");

        let first = repo
            .commit(RequestCommit {
                expected_step: 1,
                expected_action_count: 0,
                request: request.clone(),
                action: Some(approve("REQ-1", "cfo@x.com", 1)),
                notifications: Vec::new(),
            })
            .await
            .expect("commit");
        assert_eq!(first, CommitOutcome::Applied);

        let stale = repo
            .commit(RequestCommit {
                expected_step: 1,
                expected_action_count: 0,
                request: request.clone(),
                action: Some(approve("REQ-1", "ceo@x.com", 1)),
                notifications: Vec::new(),
            })
            .await
            .expect("commit");
        assert!(matches!(stale, CommitOutcome::Conflict { current: Some(_) }));
    }

    #[tokio::test]
    async fn terminal_requests_reject_further_commits() {
        let pool = setup().await;
        insert_chain(&pool, "CH-1", true).await;
        let repo = SqlRequestRepository::new(pool);
        let request = sample_request("REQ-1", "CH-1", "analyst@x.com");
        repo.insert_if_chain_active(request.clone(), Vec::new()).await.expect("insert");

        let mut cancelled = request.clone();
        cancelled.status = RequestStatus::Cancelled;
        cancelled.completed_date = Some(Utc::now());
        let applied = repo
            .commit(RequestCommit {
                expected_step: 1,
                expected_action_count: 0,
                request: cancelled,
                action: None,
                notifications: Vec::new(),
            })
            .await
            .expect("cancel");
        assert_eq!(applied, CommitOutcome::Applied);

        let late = repo
            .commit(RequestCommit {
                expected_step: 1,
                expected_action_count: 0,
                request,
                action: Some(approve("REQ-1", "cfo@x.com", 1)),
                notifications: Vec::new(),
            })
            .await
            .expect("commit");
        match late {
            CommitOutcome::Conflict { current: Some(current) } => {
                assert_eq!(current.status, RequestStatus::Cancelled);
                assert!(current.completed_date.is_some());
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
