use signoff_core::domain::chain::{ApprovalChain, ChainId};

use super::rows::{encode_steps, row_to_chain, CHAIN_COLUMNS};
use super::{ChainDeleteOutcome, ChainRepository, RepositoryError};
use crate::DbPool;

pub struct SqlChainRepository {
    pool: DbPool,
}

impl SqlChainRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ChainRepository for SqlChainRepository {
    async fn insert(&self, chain: ApprovalChain) -> Result<(), RepositoryError> {
        let steps_json = encode_steps(&chain.steps)?;

        sqlx::query(
            "INSERT INTO approval_chain
                 (id, chain_name, document_type, steps_json, is_active, created_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(chain.id.as_str())
        .bind(&chain.chain_name)
        .bind(chain.document_type.as_str())
        .bind(steps_json)
        .bind(chain.is_active)
        .bind(&chain.created_by)
        .bind(chain.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, id: &ChainId) -> Result<Option<ApprovalChain>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CHAIN_COLUMNS} FROM approval_chain WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_chain).transpose()
    }

    async fn list(&self, active_only: bool) -> Result<Vec<ApprovalChain>, RepositoryError> {
        let sql = if active_only {
            format!(
                "SELECT {CHAIN_COLUMNS} FROM approval_chain WHERE is_active = 1
                 ORDER BY created_at ASC, id ASC"
            )
        } else {
            format!("SELECT {CHAIN_COLUMNS} FROM approval_chain ORDER BY created_at ASC, id ASC")
        };

        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_chain).collect()
    }

    async fn set_active(
        &self,
        id: &ChainId,
        is_active: bool,
    ) -> Result<Option<ApprovalChain>, RepositoryError> {
        let updated = sqlx::query("UPDATE approval_chain SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.find(id).await
    }

    async fn delete_if_idle(&self, id: &ChainId) -> Result<ChainDeleteOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM approval_chain
             WHERE id = ?
               AND NOT EXISTS (
                   SELECT 1 FROM approval_request
                   WHERE chain_id = ? AND status = 'pending'
               )",
        )
        .bind(id.as_str())
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;

        if deleted.rows_affected() > 0 {
            tx.commit().await?;
            return Ok(ChainDeleteOutcome::Deleted);
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM approval_chain WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(match exists {
            Some(_) => ChainDeleteOutcome::HasOpenRequests,
            None => ChainDeleteOutcome::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use signoff_core::domain::chain::{ApprovalChain, ApprovalStep, ApprovalType, ChainId};
    use signoff_core::domain::document::DocumentType;

    use super::SqlChainRepository;
    use crate::repositories::{ChainDeleteOutcome, ChainRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_chain(id: &str, is_active: bool) -> ApprovalChain {
        ApprovalChain {
            id: ChainId(id.to_string()),
            chain_name: "Two-Step Sign-off".to_string(),
            document_type: DocumentType::Custom("capex".to_string()),
            steps: vec![
                ApprovalStep {
                    step_order: 1,
                    approver_role: None,
                    approver_email: Some("cfo@x.com".to_string()),
                    approval_type: ApprovalType::Any,
                    required: true,
                },
                ApprovalStep {
                    step_order: 2,
                    approver_role: Some("board".to_string()),
                    approver_email: None,
                    approval_type: ApprovalType::All,
                    required: false,
                },
            ],
            is_active,
            created_by: "controller@x.com".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_find_preserves_steps() {
        let repo = SqlChainRepository::new(setup().await);
        let chain = sample_chain("CH-1", true);

        repo.insert(chain.clone()).await.expect("insert");
        let found = repo.find(&chain.id).await.expect("find").expect("should exist");

        assert_eq!(found.steps, chain.steps);
        assert_eq!(found.document_type, DocumentType::Custom("capex".to_string()));
        assert_eq!(found.created_at.timestamp(), chain.created_at.timestamp());
    }

    #[tokio::test]
    async fn list_can_filter_to_active_chains() {
        let repo = SqlChainRepository::new(setup().await);
        repo.insert(sample_chain("CH-1", true)).await.expect("insert 1");
        repo.insert(sample_chain("CH-2", false)).await.expect("insert 2");

        assert_eq!(repo.list(false).await.expect("list all").len(), 2);
        let active = repo.list(true).await.expect("list active");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id.as_str(), "CH-1");
    }

    #[tokio::test]
    async fn set_active_reports_missing_chains() {
        let repo = SqlChainRepository::new(setup().await);
        repo.insert(sample_chain("CH-1", true)).await.expect("insert");

        let updated = repo.set_active(&ChainId("CH-1".to_string()), false).await.expect("update");
        assert_eq!(updated.map(|chain| chain.is_active), Some(false));

        let missing = repo.set_active(&ChainId("CH-404".to_string()), true).await.expect("update");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn delete_distinguishes_missing_from_busy_chains() {
        let pool = setup().await;
        let repo = SqlChainRepository::new(pool.clone());
        repo.insert(sample_chain("CH-1", true)).await.expect("insert");

        sqlx::query(
            "INSERT INTO approval_request
                 (id, chain_id, chain_name, steps_json, document_type, document_id, document_name,
                  requested_by, request_date, current_step, status)
             VALUES ('REQ-1', 'CH-1', 'Two-Step Sign-off', '[]', 'budget', 'B-1', 'Budget',
                     'analyst@x.com', ?, 1, 'pending')",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .expect("insert pending request");

        let id = ChainId("CH-1".to_string());
        assert_eq!(repo.delete_if_idle(&id).await.expect("delete"), ChainDeleteOutcome::HasOpenRequests);

        sqlx::query("UPDATE approval_request SET status = 'approved' WHERE id = 'REQ-1'")
            .execute(&pool)
            .await
            .expect("resolve request");

        assert_eq!(repo.delete_if_idle(&id).await.expect("delete"), ChainDeleteOutcome::Deleted);
        assert_eq!(repo.delete_if_idle(&id).await.expect("delete"), ChainDeleteOutcome::NotFound);
    }
}
