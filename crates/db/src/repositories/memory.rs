use std::collections::HashMap;

use tokio::sync::RwLock;

use signoff_core::domain::action::ApprovalAction;
use signoff_core::domain::chain::{ApprovalChain, ChainId};
use signoff_core::domain::normalize_identity;
use signoff_core::domain::notification::{ApprovalNotification, NotificationId};
use signoff_core::domain::request::{ApprovalRequest, RequestFilter, RequestId, RequestStatus};

use super::{
    ChainDeleteOutcome, ChainRepository, CommitOutcome, NotificationRepository, RepositoryError,
    RequestCommit, RequestInsertOutcome, RequestRepository,
};

#[derive(Default)]
struct StoreState {
    chains: Vec<ApprovalChain>,
    requests: HashMap<String, ApprovalRequest>,
    actions: Vec<ApprovalAction>,
    notifications: Vec<ApprovalNotification>,
}

impl StoreState {
    fn action_count(&self, request_id: &RequestId) -> usize {
        self.actions.iter().filter(|action| &action.request_id == request_id).count()
    }
}

/// Single-lock store implementing every repository trait with the same
/// guarded-write guarantees as the SQLite repositories. Used by tests and by
/// embedders that do not need durability.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    state: RwLock<StoreState>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ChainRepository for InMemoryWorkflowStore {
    async fn insert(&self, chain: ApprovalChain) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.chains.iter().any(|existing| existing.id == chain.id) {
            return Err(RepositoryError::Encode(format!("chain `{}` already exists", chain.id)));
        }
        state.chains.push(chain);
        Ok(())
    }

    async fn find(&self, id: &ChainId) -> Result<Option<ApprovalChain>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.chains.iter().find(|chain| &chain.id == id).cloned())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<ApprovalChain>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.chains.iter().filter(|chain| !active_only || chain.is_active).cloned().collect())
    }

    async fn set_active(
        &self,
        id: &ChainId,
        is_active: bool,
    ) -> Result<Option<ApprovalChain>, RepositoryError> {
        let mut state = self.state.write().await;
        Ok(state.chains.iter_mut().find(|chain| &chain.id == id).map(|chain| {
            chain.is_active = is_active;
            chain.clone()
        }))
    }

    async fn delete_if_idle(&self, id: &ChainId) -> Result<ChainDeleteOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(position) = state.chains.iter().position(|chain| &chain.id == id) else {
            return Ok(ChainDeleteOutcome::NotFound);
        };

        let busy = state
            .requests
            .values()
            .any(|request| &request.chain_id == id && request.status == RequestStatus::Pending);
        if busy {
            return Ok(ChainDeleteOutcome::HasOpenRequests);
        }

        state.chains.remove(position);
        Ok(ChainDeleteOutcome::Deleted)
    }
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryWorkflowStore {
    async fn insert_if_chain_active(
        &self,
        request: ApprovalRequest,
        notifications: Vec<ApprovalNotification>,
    ) -> Result<RequestInsertOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        match state.chains.iter().find(|chain| chain.id == request.chain_id) {
            None => return Ok(RequestInsertOutcome::ChainNotFound),
            Some(chain) if !chain.is_active => return Ok(RequestInsertOutcome::ChainInactive),
            Some(_) => {}
        }

        state.requests.insert(request.id.0.clone(), request);
        state.notifications.extend(notifications);
        Ok(RequestInsertOutcome::Inserted)
    }

    async fn find(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.requests.get(&id.0).cloned())
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let state = self.state.read().await;
        let mut requests: Vec<ApprovalRequest> =
            state.requests.values().filter(|request| filter.matches(request)).cloned().collect();
        requests.sort_by(|a, b| b.request_date.cmp(&a.request_date).then_with(|| a.id.cmp(&b.id)));
        Ok(requests)
    }

    async fn list_actions(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalAction>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.actions.iter().filter(|action| &action.request_id == request_id).cloned().collect())
    }

    async fn commit(&self, commit: RequestCommit) -> Result<CommitOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        let current = state.requests.get(&commit.request.id.0).cloned();

        let applies = current.as_ref().is_some_and(|stored| {
            stored.status == RequestStatus::Pending && stored.current_step == commit.expected_step
        }) && state.action_count(&commit.request.id) == commit.expected_action_count;
        if !applies {
            return Ok(CommitOutcome::Conflict { current });
        }

        if let Some(action) = commit.action {
            let duplicate = action.action.is_decision()
                && state.actions.iter().any(|existing| {
                    existing.request_id == action.request_id
                        && existing.step_order == action.step_order
                        && existing.action.is_decision()
                        && normalize_identity(&existing.approver_email)
                            == normalize_identity(&action.approver_email)
                });
            if duplicate {
                return Ok(CommitOutcome::Conflict { current });
            }
            state.actions.push(action);
        }

        state.requests.insert(commit.request.id.0.clone(), commit.request);
        state.notifications.extend(commit.notifications);
        Ok(CommitOutcome::Applied)
    }
}

#[async_trait::async_trait]
impl NotificationRepository for InMemoryWorkflowStore {
    async fn list_for_recipient(
        &self,
        recipient: &str,
        unread_only: bool,
    ) -> Result<Vec<ApprovalNotification>, RepositoryError> {
        let recipient = normalize_identity(recipient);
        let state = self.state.read().await;
        let mut inbox: Vec<(usize, ApprovalNotification)> = state
            .notifications
            .iter()
            .enumerate()
            .filter(|(_, item)| normalize_identity(&item.recipient) == recipient)
            .filter(|(_, item)| !unread_only || !item.is_read)
            .map(|(position, item)| (position, item.clone()))
            .collect();
        inbox.sort_by(|(pa, a), (pb, b)| b.sent_date.cmp(&a.sent_date).then_with(|| pb.cmp(pa)));
        Ok(inbox.into_iter().map(|(_, item)| item).collect())
    }

    async fn find(
        &self,
        id: &NotificationId,
    ) -> Result<Option<ApprovalNotification>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.notifications.iter().find(|item| &item.id == id).cloned())
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        match state.notifications.iter_mut().find(|item| &item.id == id) {
            Some(item) if !item.is_read => {
                item.is_read = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
