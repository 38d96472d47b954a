use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use signoff_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use signoff_core::domain::action::ApprovalAction;
use signoff_core::domain::notification::{ApprovalNotification, NotificationId};
use signoff_core::domain::request::{
    ApprovalRequest, NewApprovalRequest, RequestFilter, RequestId,
};
use signoff_core::errors::{ApplicationError, DomainError};
use signoff_core::workflow::{
    ActionProcessor, ActionSubmission, NotificationDispatcher, RequestEvent, RequestStateMachine,
    RoleDirectory, StepApprovers,
};
use signoff_db::{
    CommitOutcome, NotificationRepository, RequestCommit, RequestInsertOutcome, RequestRepository,
};

use crate::chains::ChainStore;
use crate::locks::RequestLocks;
use crate::outbox::NotificationOutbox;

/// Attempts per write when another process commits to the same request on
/// the same step between our read and our write.
const COMMIT_ATTEMPTS: usize = 3;

/// A request as callers see it: its step snapshot, every recorded action in
/// submission order, and who may act on the pending step right now.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetail {
    pub request: ApprovalRequest,
    pub actions: Vec<ApprovalAction>,
    pub current_approvers: Vec<String>,
}

pub struct WorkflowEngine {
    chains: Arc<ChainStore>,
    requests: Arc<dyn RequestRepository>,
    notifications: Arc<dyn NotificationRepository>,
    directory: Arc<dyn RoleDirectory>,
    audit: Arc<dyn AuditSink>,
    outbox: NotificationOutbox,
    locks: RequestLocks,
    dispatcher: NotificationDispatcher,
}

struct Committed {
    request: ApprovalRequest,
    events: Vec<RequestEvent>,
    notifications: Vec<ApprovalNotification>,
}

impl WorkflowEngine {
    pub fn new(
        chains: Arc<ChainStore>,
        requests: Arc<dyn RequestRepository>,
        notifications: Arc<dyn NotificationRepository>,
        directory: Arc<dyn RoleDirectory>,
        audit: Arc<dyn AuditSink>,
        outbox: NotificationOutbox,
    ) -> Self {
        Self {
            chains,
            requests,
            notifications,
            directory,
            audit,
            outbox,
            locks: RequestLocks::default(),
            dispatcher: NotificationDispatcher,
        }
    }

    pub async fn create_request(
        &self,
        new_request: NewApprovalRequest,
        context: &AuditContext,
    ) -> Result<ApprovalRequest, ApplicationError> {
        let chain = self.chains.find(&new_request.chain_id).await?;
        let now = Utc::now();
        let outcome =
            RequestStateMachine::new(self.directory.as_ref()).create(&chain, new_request, now)?;
        let notifications = self.dispatcher.notify_all(&outcome.notifications, now);

        let inserted = self
            .requests
            .insert_if_chain_active(outcome.request.clone(), notifications.clone())
            .await?;
        match inserted {
            RequestInsertOutcome::Inserted => {}
            RequestInsertOutcome::ChainNotFound => {
                return Err(DomainError::ChainNotFound(chain.id).into());
            }
            RequestInsertOutcome::ChainInactive => {
                return Err(DomainError::ChainInactive(chain.id).into());
            }
        }

        let context = context.for_request(outcome.request.id.clone());
        self.record_events(&context, &outcome.events);
        self.outbox.publish(&notifications);

        info!(
            event_name = "request.created",
            correlation_id = %context.correlation_id,
            request_id = %outcome.request.id,
            chain_id = %outcome.request.chain_id,
            status = outcome.request.status.as_str(),
            current_step = outcome.request.current_step,
            "approval request created"
        );
        Ok(outcome.request)
    }

    /// Validates, records, and advances under the request's lock. A rejected
    /// submission persists nothing.
    pub async fn submit_action(
        &self,
        submission: ActionSubmission,
        context: &AuditContext,
    ) -> Result<ApprovalAction, ApplicationError> {
        let context = context.for_request(submission.request_id.clone());
        let _guard = self.locks.acquire(&submission.request_id).await;

        match self.submit_locked(&submission).await {
            Ok((action, committed)) => {
                self.audit.emit(
                    context
                        .event("action.recorded", AuditCategory::Action, AuditOutcome::Success)
                        .with_metadata("action", action.action.as_str())
                        .with_metadata("step_order", action.step_order.to_string())
                        .with_metadata("approver", action.approver_email.clone()),
                );
                self.record_events(&context, &committed.events);
                self.outbox.publish(&committed.notifications);

                info!(
                    event_name = "request.action_recorded",
                    correlation_id = %context.correlation_id,
                    request_id = %action.request_id,
                    step_order = action.step_order,
                    action = action.action.as_str(),
                    status = committed.request.status.as_str(),
                    current_step = committed.request.current_step,
                    "approval action recorded"
                );
                Ok(action)
            }
            Err(error) => {
                self.audit_rejection(&context, "action.rejected", &error);
                warn!(
                    event_name = "request.action_rejected",
                    correlation_id = %context.correlation_id,
                    request_id = %submission.request_id,
                    step_order = submission.step_order,
                    error = %error,
                    "approval action rejected"
                );
                Err(error)
            }
        }
    }

    async fn submit_locked(
        &self,
        submission: &ActionSubmission,
    ) -> Result<(ApprovalAction, Committed), ApplicationError> {
        let processor = ActionProcessor::new(self.directory.as_ref());
        let mut last_seen_step = submission.step_order;

        for _ in 0..COMMIT_ATTEMPTS {
            let request = self.load_request(&submission.request_id).await?;
            let actions = self.requests.list_actions(&request.id).await?;
            let now = Utc::now();

            let outcome = processor.apply(&request, &actions, submission.clone(), now)?;
            let notifications = self.dispatcher.notify_all(&outcome.transition.notifications, now);
            let commit = RequestCommit {
                expected_step: request.current_step,
                expected_action_count: actions.len(),
                request: outcome.transition.request.clone(),
                action: Some(outcome.action.clone()),
                notifications: notifications.clone(),
            };

            match self.requests.commit(commit).await? {
                CommitOutcome::Applied => {
                    let committed = Committed {
                        request: outcome.transition.request,
                        events: outcome.transition.events,
                        notifications,
                    };
                    return Ok((outcome.action, committed));
                }
                CommitOutcome::Conflict { current } => {
                    let current = still_pending(&request.id, current)?;
                    if current.current_step != submission.step_order {
                        return Err(DomainError::StaleStep {
                            request_id: current.id,
                            submitted: submission.step_order,
                            current: current.current_step,
                        }
                        .into());
                    }
                    last_seen_step = current.current_step;
                    warn!(
                        event_name = "request.commit_conflict",
                        request_id = %request.id,
                        step_order = submission.step_order,
                        "request changed between read and write; re-evaluating"
                    );
                }
            }
        }

        Err(DomainError::StaleStep {
            request_id: submission.request_id.clone(),
            submitted: submission.step_order,
            current: last_seen_step,
        }
        .into())
    }

    /// Only the pending precondition is enforced here; who may cancel is the
    /// caller's decision.
    pub async fn cancel_request(
        &self,
        request_id: &RequestId,
        acting_user: &str,
        context: &AuditContext,
    ) -> Result<ApprovalRequest, ApplicationError> {
        let context = context.for_request(request_id.clone());
        let _guard = self.locks.acquire(request_id).await;

        match self.cancel_locked(request_id, acting_user).await {
            Ok(committed) => {
                self.record_events(&context, &committed.events);
                info!(
                    event_name = "request.cancelled",
                    correlation_id = %context.correlation_id,
                    request_id = %request_id,
                    "approval request cancelled"
                );
                Ok(committed.request)
            }
            Err(error) => {
                self.audit_rejection(&context, "request.cancel_rejected", &error);
                Err(error)
            }
        }
    }

    async fn cancel_locked(
        &self,
        request_id: &RequestId,
        acting_user: &str,
    ) -> Result<Committed, ApplicationError> {
        let machine = RequestStateMachine::new(self.directory.as_ref());

        for _ in 0..COMMIT_ATTEMPTS {
            let request = self.load_request(request_id).await?;
            let action_count = self.requests.list_actions(request_id).await?.len();
            let outcome = machine.cancel(&request, acting_user, Utc::now())?;

            let commit = RequestCommit {
                expected_step: request.current_step,
                expected_action_count: action_count,
                request: outcome.request.clone(),
                action: None,
                notifications: Vec::new(),
            };
            match self.requests.commit(commit).await? {
                CommitOutcome::Applied => {
                    return Ok(Committed {
                        request: outcome.request,
                        events: outcome.events,
                        notifications: Vec::new(),
                    });
                }
                CommitOutcome::Conflict { current } => {
                    still_pending(request_id, current)?;
                }
            }
        }

        Err(ApplicationError::Persistence(format!(
            "request `{request_id}` kept changing during cancellation"
        )))
    }

    pub async fn get_request(
        &self,
        request_id: &RequestId,
    ) -> Result<RequestDetail, ApplicationError> {
        let request = self.load_request(request_id).await?;
        let actions = self.requests.list_actions(request_id).await?;

        let current_approvers = match request.current_step_definition() {
            Some(step) if request.is_pending() => {
                StepApprovers::resolve(step, &actions, self.directory.as_ref())?
                    .everyone()
                    .into_iter()
                    .collect()
            }
            _ => Vec::new(),
        };

        Ok(RequestDetail { request, actions, current_approvers })
    }

    pub async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<ApprovalRequest>, ApplicationError> {
        Ok(self.requests.list(filter).await?)
    }

    pub async fn list_notifications(
        &self,
        recipient: &str,
        unread_only: bool,
    ) -> Result<Vec<ApprovalNotification>, ApplicationError> {
        Ok(self.notifications.list_for_recipient(recipient, unread_only).await?)
    }

    /// Only the recipient may mark a notification read. Marking twice is a
    /// no-op that still succeeds.
    pub async fn mark_notification_read(
        &self,
        notification_id: &NotificationId,
        acting_user: &str,
        context: &AuditContext,
    ) -> Result<ApprovalNotification, ApplicationError> {
        let mut notification = self
            .notifications
            .find(notification_id)
            .await?
            .ok_or_else(|| DomainError::NotificationNotFound(notification_id.clone()))?;

        let changed = self.dispatcher.mark_read(&mut notification, acting_user)?;
        if changed {
            self.notifications.mark_read(notification_id).await?;
            self.audit.emit(
                context
                    .for_request(notification.request_id.clone())
                    .event("notification.read", AuditCategory::Notification, AuditOutcome::Success)
                    .with_metadata("notification_id", notification_id.as_str()),
            );
        }
        Ok(notification)
    }

    async fn load_request(
        &self,
        request_id: &RequestId,
    ) -> Result<ApprovalRequest, ApplicationError> {
        self.requests
            .find(request_id)
            .await?
            .ok_or_else(|| DomainError::RequestNotFound(request_id.clone()).into())
    }

    fn record_events(&self, context: &AuditContext, events: &[RequestEvent]) {
        for event in events {
            let audit =
                context.event(event.event_type(), AuditCategory::Request, AuditOutcome::Success);
            let audit = match event {
                RequestEvent::Created { step_count } => {
                    audit.with_metadata("step_count", step_count.to_string())
                }
                RequestEvent::StepAdvanced { from, to, auto_passed } => audit
                    .with_metadata("from", from.to_string())
                    .with_metadata("to", to.to_string())
                    .with_metadata("auto_passed", auto_passed.to_string()),
                RequestEvent::Approved { final_step } => {
                    audit.with_metadata("final_step", final_step.to_string())
                }
                RequestEvent::Rejected { step } => audit.with_metadata("step", step.to_string()),
                RequestEvent::Cancelled { by } => audit.with_metadata("by", by.clone()),
            };
            self.audit.emit(audit);
        }
    }

    fn audit_rejection(&self, context: &AuditContext, event_type: &str, error: &ApplicationError) {
        let code = error.domain().map(DomainError::code).unwrap_or("persistence");
        self.audit.emit(
            context
                .event(event_type, AuditCategory::Action, AuditOutcome::Rejected)
                .with_metadata("code", code)
                .with_metadata("error", error.to_string()),
        );
    }
}

/// Turns the state a losing writer re-read into the error it should see, or
/// hands the request back when it is still open.
fn still_pending(
    request_id: &RequestId,
    current: Option<ApprovalRequest>,
) -> Result<ApprovalRequest, DomainError> {
    let current = current.ok_or_else(|| DomainError::RequestNotFound(request_id.clone()))?;
    if !current.is_pending() {
        return Err(DomainError::RequestNotPending {
            request_id: current.id.clone(),
            status: current.status,
        });
    }
    Ok(current)
}
