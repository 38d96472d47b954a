use std::sync::Arc;

use tracing::info;

use signoff_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use signoff_core::domain::action::ApprovalAction;
use signoff_core::domain::chain::{ApprovalChain, ChainId};
use signoff_core::domain::notification::{ApprovalNotification, NotificationId};
use signoff_core::domain::request::{
    ApprovalRequest, NewApprovalRequest, RequestFilter, RequestId,
};
use signoff_core::errors::ApplicationError;
use signoff_core::workflow::{ActionSubmission, ChainDraft, RoleDirectory};
use signoff_db::{
    ChainRepository, DbPool, InMemoryWorkflowStore, NotificationRepository, RequestRepository,
    SqlChainRepository, SqlNotificationRepository, SqlRequestRepository,
};

use crate::chains::ChainStore;
use crate::engine::{RequestDetail, WorkflowEngine};
use crate::outbox::NotificationOutbox;

/// Collaborators the façade is assembled from.
pub struct WorkflowParts {
    pub chains: Arc<dyn ChainRepository>,
    pub requests: Arc<dyn RequestRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub directory: Arc<dyn RoleDirectory>,
    pub audit: Arc<dyn AuditSink>,
    pub outbox: NotificationOutbox,
}

/// Every chain, request, action and notification operation a caller can
/// invoke. The acting user and correlation id travel in the `AuditContext`.
pub struct WorkflowApi {
    chains: Arc<ChainStore>,
    engine: WorkflowEngine,
    audit: Arc<dyn AuditSink>,
}

impl WorkflowApi {
    pub fn new(parts: WorkflowParts) -> Self {
        let chains = Arc::new(ChainStore::new(parts.chains));
        let engine = WorkflowEngine::new(
            Arc::clone(&chains),
            parts.requests,
            parts.notifications,
            parts.directory,
            Arc::clone(&parts.audit),
            parts.outbox,
        );
        Self { chains, engine, audit: parts.audit }
    }

    pub fn sqlite(
        pool: DbPool,
        directory: Arc<dyn RoleDirectory>,
        audit: Arc<dyn AuditSink>,
        outbox: NotificationOutbox,
    ) -> Self {
        Self::new(WorkflowParts {
            chains: Arc::new(SqlChainRepository::new(pool.clone())),
            requests: Arc::new(SqlRequestRepository::new(pool.clone())),
            notifications: Arc::new(SqlNotificationRepository::new(pool)),
            directory,
            audit,
            outbox,
        })
    }

    pub fn in_memory(directory: Arc<dyn RoleDirectory>, audit: Arc<dyn AuditSink>) -> Self {
        let store = Arc::new(InMemoryWorkflowStore::new());
        Self::new(WorkflowParts {
            chains: store.clone(),
            requests: store.clone(),
            notifications: store,
            directory,
            audit,
            outbox: NotificationOutbox::disabled(),
        })
    }

    /// Loads the active-chain cache. Returns how many chains are active.
    pub async fn start(&self) -> Result<usize, ApplicationError> {
        self.chains.load().await
    }

    pub async fn create_chain(
        &self,
        draft: ChainDraft,
        context: &AuditContext,
    ) -> Result<ApprovalChain, ApplicationError> {
        let chain = self.chains.create(draft).await?;
        self.audit.emit(
            context
                .event("chain.created", AuditCategory::Chain, AuditOutcome::Success)
                .with_metadata("chain_id", chain.id.as_str())
                .with_metadata("step_count", chain.steps.len().to_string()),
        );
        Ok(chain)
    }

    pub async fn list_chains(
        &self,
        active_only: bool,
    ) -> Result<Vec<ApprovalChain>, ApplicationError> {
        self.chains.list(active_only).await
    }

    pub async fn set_chain_active(
        &self,
        chain_id: &ChainId,
        is_active: bool,
        context: &AuditContext,
    ) -> Result<ApprovalChain, ApplicationError> {
        let chain = self.chains.set_active(chain_id, is_active).await?;
        self.audit.emit(
            context
                .event("chain.active_changed", AuditCategory::Chain, AuditOutcome::Success)
                .with_metadata("chain_id", chain_id.as_str())
                .with_metadata("is_active", is_active.to_string()),
        );
        Ok(chain)
    }

    pub async fn delete_chain(
        &self,
        chain_id: &ChainId,
        context: &AuditContext,
    ) -> Result<(), ApplicationError> {
        let deleted = self.chains.delete(chain_id).await;
        let outcome = if deleted.is_ok() { AuditOutcome::Success } else { AuditOutcome::Rejected };
        self.audit.emit(
            context
                .event("chain.deleted", AuditCategory::Chain, outcome)
                .with_metadata("chain_id", chain_id.as_str()),
        );
        deleted
    }

    pub async fn create_request(
        &self,
        new_request: NewApprovalRequest,
        context: &AuditContext,
    ) -> Result<ApprovalRequest, ApplicationError> {
        self.engine.create_request(new_request, context).await
    }

    pub async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, ApplicationError> {
        self.engine.list_requests(filter).await
    }

    pub async fn get_request(
        &self,
        request_id: &RequestId,
    ) -> Result<RequestDetail, ApplicationError> {
        self.engine.get_request(request_id).await
    }

    pub async fn submit_action(
        &self,
        submission: ActionSubmission,
        context: &AuditContext,
    ) -> Result<ApprovalAction, ApplicationError> {
        self.engine.submit_action(submission, context).await
    }

    /// Cancels on behalf of `context.actor`.
    pub async fn cancel_request(
        &self,
        request_id: &RequestId,
        context: &AuditContext,
    ) -> Result<ApprovalRequest, ApplicationError> {
        self.engine.cancel_request(request_id, &context.actor, context).await
    }

    pub async fn list_notifications(
        &self,
        recipient: &str,
        unread_only: bool,
    ) -> Result<Vec<ApprovalNotification>, ApplicationError> {
        self.engine.list_notifications(recipient, unread_only).await
    }

    /// Marks read on behalf of `context.actor`, who must be the recipient.
    pub async fn mark_notification_read(
        &self,
        notification_id: &NotificationId,
        context: &AuditContext,
    ) -> Result<ApprovalNotification, ApplicationError> {
        let notification =
            self.engine.mark_notification_read(notification_id, &context.actor, context).await?;
        info!(
            event_name = "notification.marked_read",
            correlation_id = %context.correlation_id,
            notification_id = %notification_id,
            "notification marked read"
        );
        Ok(notification)
    }
}
