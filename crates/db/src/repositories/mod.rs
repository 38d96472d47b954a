use async_trait::async_trait;
use thiserror::Error;

use signoff_core::domain::action::ApprovalAction;
use signoff_core::domain::chain::{ApprovalChain, ChainId};
use signoff_core::domain::notification::{ApprovalNotification, NotificationId};
use signoff_core::domain::request::{ApprovalRequest, RequestFilter, RequestId};
use signoff_core::errors::ApplicationError;

pub mod chain;
pub mod memory;
pub mod notification;
pub mod request;
mod rows;

pub use chain::SqlChainRepository;
pub use memory::InMemoryWorkflowStore;
pub use notification::SqlNotificationRepository;
pub use request::SqlRequestRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainDeleteOutcome {
    Deleted,
    NotFound,
    HasOpenRequests,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestInsertOutcome {
    Inserted,
    ChainNotFound,
    ChainInactive,
}

/// Everything one accepted transition writes. Applied only if the stored
/// request is still pending on `expected_step` with `expected_action_count`
/// actions recorded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestCommit {
    pub expected_step: u32,
    pub expected_action_count: usize,
    pub request: ApprovalRequest,
    pub action: Option<ApprovalAction>,
    pub notifications: Vec<ApprovalNotification>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Applied,
    /// Another writer got there first; carries the stored request as it is now.
    Conflict { current: Option<ApprovalRequest> },
}

#[async_trait]
pub trait ChainRepository: Send + Sync {
    async fn insert(&self, chain: ApprovalChain) -> Result<(), RepositoryError>;

    async fn find(&self, id: &ChainId) -> Result<Option<ApprovalChain>, RepositoryError>;

    async fn list(&self, active_only: bool) -> Result<Vec<ApprovalChain>, RepositoryError>;

    async fn set_active(
        &self,
        id: &ChainId,
        is_active: bool,
    ) -> Result<Option<ApprovalChain>, RepositoryError>;

    /// Deletes only when no pending request references the chain, checked in
    /// the same statement as the delete.
    async fn delete_if_idle(&self, id: &ChainId) -> Result<ChainDeleteOutcome, RepositoryError>;
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    /// Inserts the request and its creation notifications, provided the chain
    /// still exists and is active at write time.
    async fn insert_if_chain_active(
        &self,
        request: ApprovalRequest,
        notifications: Vec<ApprovalNotification>,
    ) -> Result<RequestInsertOutcome, RepositoryError>;

    async fn find(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, RepositoryError>;

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<ApprovalRequest>, RepositoryError>;

    /// Actions in submission order.
    async fn list_actions(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalAction>, RepositoryError>;

    async fn commit(&self, commit: RequestCommit) -> Result<CommitOutcome, RepositoryError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Newest first.
    async fn list_for_recipient(
        &self,
        recipient: &str,
        unread_only: bool,
    ) -> Result<Vec<ApprovalNotification>, RepositoryError>;

    async fn find(
        &self,
        id: &NotificationId,
    ) -> Result<Option<ApprovalNotification>, RepositoryError>;

    /// Returns whether the flag changed.
    async fn mark_read(&self, id: &NotificationId) -> Result<bool, RepositoryError>;
}
