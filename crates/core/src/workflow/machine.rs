use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::ApprovalAction;
use crate::domain::chain::{ApprovalChain, ApprovalStep};
use crate::domain::normalize_identity;
use crate::domain::notification::NotificationType;
use crate::domain::request::{ApprovalRequest, NewApprovalRequest, RequestId, RequestStatus};
use crate::errors::DomainError;
use crate::workflow::directory::RoleDirectory;
use crate::workflow::evaluator::{evaluate_step, StepApprovers, StepOutcome};
use crate::workflow::notifications::NotificationIntent;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RequestEvent {
    Created { step_count: u32 },
    StepAdvanced { from: u32, to: u32, auto_passed: bool },
    Approved { final_step: u32 },
    Rejected { step: u32 },
    Cancelled { by: String },
}

impl RequestEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "request.created",
            Self::StepAdvanced { .. } => "request.step_advanced",
            Self::Approved { .. } => "request.approved",
            Self::Rejected { .. } => "request.rejected",
            Self::Cancelled { .. } => "request.cancelled",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub request: ApprovalRequest,
    pub events: Vec<RequestEvent>,
    pub notifications: Vec<NotificationIntent>,
}

impl TransitionOutcome {
    fn start(request: ApprovalRequest) -> Self {
        Self { request, events: Vec::new(), notifications: Vec::new() }
    }

    pub fn changed_state(&self) -> bool {
        !self.events.is_empty()
    }
}

/// Lifecycle of one approval request. Works on values; persisting the result
/// atomically is the caller's job.
pub struct RequestStateMachine<'a> {
    directory: &'a dyn RoleDirectory,
}

impl<'a> RequestStateMachine<'a> {
    pub fn new(directory: &'a dyn RoleDirectory) -> Self {
        Self { directory }
    }

    pub fn create(
        &self,
        chain: &ApprovalChain,
        new_request: NewApprovalRequest,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        if new_request.chain_id != chain.id {
            return Err(DomainError::InvariantViolation(format!(
                "request targets chain `{}` but chain `{}` was loaded",
                new_request.chain_id, chain.id
            )));
        }
        if !chain.is_active {
            return Err(DomainError::ChainInactive(chain.id.clone()));
        }
        if !chain.has_contiguous_steps() {
            return Err(DomainError::InvariantViolation(format!(
                "chain `{}` has non-contiguous steps",
                chain.id
            )));
        }

        let document_id = required_field("document_id", &new_request.document_id)?;
        let document_name = required_field("document_name", &new_request.document_name)?;
        let requested_by = normalize_identity(&required_field("requested_by", &new_request.requested_by)?);

        let request = ApprovalRequest {
            id: RequestId::generate(),
            chain_id: chain.id.clone(),
            chain_name: chain.chain_name.clone(),
            steps: chain.steps.clone(),
            document_type: new_request.document_type,
            document_id,
            document_name,
            requested_by,
            request_date: now,
            current_step: 1,
            status: RequestStatus::Pending,
            completed_date: None,
        };

        let mut outcome = TransitionOutcome::start(request);
        outcome.events.push(RequestEvent::Created { step_count: chain.step_count() });
        self.enter_current_step(&mut outcome, &[], now)?;
        Ok(outcome)
    }

    /// Re-evaluates the current step after an accepted action and moves the
    /// request forward or to a terminal status.
    pub fn advance(
        &self,
        request: &ApprovalRequest,
        actions: &[ApprovalAction],
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        ensure_pending(request)?;
        let mut outcome = TransitionOutcome::start(request.clone());
        self.settle(&mut outcome, actions, now)?;
        Ok(outcome)
    }

    pub fn cancel(
        &self,
        request: &ApprovalRequest,
        acting_user: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        ensure_pending(request)?;
        let mut outcome = TransitionOutcome::start(request.clone());
        outcome.request.status = RequestStatus::Cancelled;
        outcome.request.completed_date = Some(now);
        outcome.events.push(RequestEvent::Cancelled { by: normalize_identity(acting_user) });
        Ok(outcome)
    }

    fn enter_current_step(
        &self,
        outcome: &mut TransitionOutcome,
        actions: &[ApprovalAction],
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let step = current_step(&outcome.request)?.clone();
        if step.required {
            let approvers = StepApprovers::resolve(&step, actions, self.directory)?;
            outcome.notifications.push(NotificationIntent::new(
                outcome.request.id.clone(),
                NotificationType::ApprovalRequested,
                approvers.everyone(),
                format!(
                    "{} is waiting for your approval (step {} of {})",
                    outcome.request.document_name,
                    step.step_order,
                    outcome.request.step_count()
                ),
            ));
            return Ok(());
        }

        self.settle(outcome, actions, now)
    }

    fn settle(
        &self,
        outcome: &mut TransitionOutcome,
        actions: &[ApprovalAction],
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        loop {
            let step = current_step(&outcome.request)?.clone();
            let approvers = StepApprovers::resolve(&step, actions, self.directory)?;

            match evaluate_step(&step, actions, &approvers) {
                StepOutcome::Pending => return Ok(()),
                StepOutcome::Rejected => {
                    let request = &mut outcome.request;
                    request.status = RequestStatus::Rejected;
                    request.completed_date = Some(now);
                    outcome.events.push(RequestEvent::Rejected { step: step.step_order });
                    outcome.notifications.push(NotificationIntent::new(
                        request.id.clone(),
                        NotificationType::Rejected,
                        [request.requested_by.clone()],
                        format!("{} was rejected at step {}", request.document_name, step.step_order),
                    ));
                    return Ok(());
                }
                StepOutcome::Satisfied if outcome.request.is_on_last_step() => {
                    let request = &mut outcome.request;
                    request.status = RequestStatus::Approved;
                    request.completed_date = Some(now);
                    outcome.events.push(RequestEvent::Approved { final_step: step.step_order });
                    outcome.notifications.push(NotificationIntent::new(
                        request.id.clone(),
                        NotificationType::Completed,
                        [request.requested_by.clone()],
                        format!("{} has been fully approved", request.document_name),
                    ));
                    return Ok(());
                }
                StepOutcome::Satisfied => {
                    let request = &mut outcome.request;
                    if step.required {
                        outcome.notifications.push(NotificationIntent::new(
                            request.id.clone(),
                            NotificationType::Approved,
                            [request.requested_by.clone()],
                            format!("{} passed step {}", request.document_name, step.step_order),
                        ));
                    }

                    let from = request.current_step;
                    request.current_step = from + 1;
                    outcome.events.push(RequestEvent::StepAdvanced {
                        from,
                        to: from + 1,
                        auto_passed: !step.required,
                    });

                    if current_step(&outcome.request)?.required {
                        return self.enter_current_step(outcome, actions, now);
                    }
                }
            }
        }
    }
}

fn current_step(request: &ApprovalRequest) -> Result<&ApprovalStep, DomainError> {
    request.current_step_definition().ok_or_else(|| {
        DomainError::InvariantViolation(format!(
            "request `{}` points at step {} of {}",
            request.id,
            request.current_step,
            request.step_count()
        ))
    })
}

fn ensure_pending(request: &ApprovalRequest) -> Result<(), DomainError> {
    if request.is_pending() {
        Ok(())
    } else {
        Err(DomainError::RequestNotPending { request_id: request.id.clone(), status: request.status })
    }
}

fn required_field(name: &str, value: &str) -> Result<String, DomainError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::InvalidRequest(format!("{name} must not be empty")));
    }
    Ok(value.to_string())
}
