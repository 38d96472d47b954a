use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::action::{ActionId, ActionKind, ApprovalAction};
use crate::domain::normalize_identity;
use crate::domain::notification::NotificationType;
use crate::domain::request::{ApprovalRequest, RequestId};
use crate::errors::DomainError;
use crate::workflow::directory::RoleDirectory;
use crate::workflow::evaluator::StepApprovers;
use crate::workflow::machine::{RequestStateMachine, TransitionOutcome};
use crate::workflow::notifications::NotificationIntent;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSubmission {
    pub request_id: RequestId,
    pub step_order: u32,
    pub approver_email: String,
    pub action: ActionKind,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub delegated_to: Option<String>,
}

/// A validated action together with the transition it caused.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: ApprovalAction,
    pub transition: TransitionOutcome,
}

pub struct ActionProcessor<'a> {
    directory: &'a dyn RoleDirectory,
}

impl<'a> ActionProcessor<'a> {
    pub fn new(directory: &'a dyn RoleDirectory) -> Self {
        Self { directory }
    }

    /// Checks, in order: pending status, current step, approver authorization,
    /// prior decision by the same approver, and delegation target.
    pub fn validate(
        &self,
        request: &ApprovalRequest,
        actions: &[ApprovalAction],
        submission: &ActionSubmission,
    ) -> Result<StepApprovers, DomainError> {
        if submission.request_id != request.id {
            return Err(DomainError::InvariantViolation(format!(
                "submission for `{}` applied to request `{}`",
                submission.request_id, request.id
            )));
        }

        if !request.is_pending() {
            return Err(DomainError::RequestNotPending {
                request_id: request.id.clone(),
                status: request.status,
            });
        }

        if submission.step_order != request.current_step {
            return Err(DomainError::StaleStep {
                request_id: request.id.clone(),
                submitted: submission.step_order,
                current: request.current_step,
            });
        }

        let step = request.current_step_definition().ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "request `{}` has no step {}",
                request.id, request.current_step
            ))
        })?;
        let approver = normalize_identity(&submission.approver_email);
        let approvers = StepApprovers::resolve(step, actions, self.directory)?;
        if !approvers.is_authorized(&approver) {
            return Err(DomainError::NotAuthorized {
                approver,
                step_order: submission.step_order,
            });
        }

        let already_decided = actions.iter().any(|action| {
            action.step_order == submission.step_order
                && action.action.is_decision()
                && normalize_identity(&action.approver_email) == approver
        });
        if already_decided {
            return Err(DomainError::DuplicateAction {
                approver,
                step_order: submission.step_order,
            });
        }

        let delegated_to =
            submission.delegated_to.as_deref().map(normalize_identity).filter(|to| !to.is_empty());
        match (submission.action, delegated_to) {
            (ActionKind::Delegate, None) => {
                return Err(DomainError::InvalidDelegation(
                    "delegate actions must name a delegate".to_string(),
                ));
            }
            (ActionKind::Delegate, Some(target)) if target == approver => {
                return Err(DomainError::InvalidDelegation(
                    "approvers cannot delegate to themselves".to_string(),
                ));
            }
            (ActionKind::Approve | ActionKind::Reject, Some(_)) => {
                return Err(DomainError::InvalidDelegation(
                    "only delegate actions may name a delegate".to_string(),
                ));
            }
            _ => {}
        }

        Ok(approvers)
    }

    /// Validates, records, and advances. Nothing here is persisted; the
    /// caller writes the action and the transition together or not at all.
    pub fn apply(
        &self,
        request: &ApprovalRequest,
        actions: &[ApprovalAction],
        submission: ActionSubmission,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, DomainError> {
        self.validate(request, actions, &submission)?;

        let action = ApprovalAction {
            id: ActionId::generate(),
            request_id: request.id.clone(),
            step_order: submission.step_order,
            approver_email: normalize_identity(&submission.approver_email),
            action: submission.action,
            action_date: now,
            comments: submission
                .comments
                .map(|comments| comments.trim().to_string())
                .filter(|comments| !comments.is_empty()),
            delegated_to: submission
                .delegated_to
                .as_deref()
                .map(normalize_identity)
                .filter(|_| submission.action == ActionKind::Delegate),
        };

        let mut recorded = actions.to_vec();
        recorded.push(action.clone());

        let mut transition = RequestStateMachine::new(self.directory).advance(request, &recorded, now)?;
        if let Some(target) = &action.delegated_to {
            transition.notifications.insert(
                0,
                NotificationIntent::new(
                    request.id.clone(),
                    NotificationType::Delegated,
                    [target.clone()],
                    format!(
                        "{} delegated step {} of {} to you",
                        action.approver_email, action.step_order, request.document_name
                    ),
                ),
            );
        }

        Ok(ActionOutcome { action, transition })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ActionProcessor, ActionSubmission};
    use crate::domain::action::{ActionKind, ApprovalAction};
    use crate::domain::chain::{ApprovalChain, ApprovalStep, ApprovalType, ChainId};
    use crate::domain::document::DocumentType;
    use crate::domain::notification::NotificationType;
    use crate::domain::request::{ApprovalRequest, NewApprovalRequest, RequestStatus};
    use crate::errors::DomainError;
    use crate::workflow::directory::InMemoryRoleDirectory;
    use crate::workflow::machine::RequestStateMachine;

    fn directory() -> InMemoryRoleDirectory {
        InMemoryRoleDirectory::with_roles(vec![("board", vec!["ana@x.com", "bo@x.com"])])
    }

    fn board_chain(approval_type: ApprovalType) -> ApprovalChain {
        ApprovalChain {
            id: ChainId("CH-BOARD".to_string()),
            chain_name: "Board review".to_string(),
            document_type: DocumentType::Statement,
            steps: vec![
                ApprovalStep {
                    step_order: 1,
                    approver_role: Some("board".to_string()),
                    approver_email: None,
                    approval_type,
                    required: true,
                },
                ApprovalStep {
                    step_order: 2,
                    approver_role: None,
                    approver_email: Some("ceo@x.com".to_string()),
                    approval_type: ApprovalType::Any,
                    required: true,
                },
            ],
            is_active: true,
            created_by: "controller@x.com".to_string(),
            created_at: Utc::now(),
        }
    }

    fn start(directory: &InMemoryRoleDirectory, approval_type: ApprovalType) -> ApprovalRequest {
        let chain = board_chain(approval_type);
        RequestStateMachine::new(directory)
            .create(
                &chain,
                NewApprovalRequest {
                    chain_id: chain.id.clone(),
                    document_type: DocumentType::Statement,
                    document_id: "FS-Q3".to_string(),
                    document_name: "Q3 statements".to_string(),
                    requested_by: "analyst@x.com".to_string(),
                },
                Utc::now(),
            )
            .expect("create")
            .request
    }

    fn submit(request: &ApprovalRequest, approver: &str, action: ActionKind) -> ActionSubmission {
        ActionSubmission {
            request_id: request.id.clone(),
            step_order: request.current_step,
            approver_email: approver.to_string(),
            action,
            comments: None,
            delegated_to: None,
        }
    }

    fn delegate(request: &ApprovalRequest, from: &str, to: &str) -> ActionSubmission {
        ActionSubmission { delegated_to: Some(to.to_string()), ..submit(request, from, ActionKind::Delegate) }
    }

    #[test]
    fn any_gate_advances_on_first_approval() {
        let directory = directory();
        let processor = ActionProcessor::new(&directory);
        let request = start(&directory, ApprovalType::Any);

        let outcome = processor
            .apply(&request, &[], submit(&request, "Bo@X.com", ActionKind::Approve), Utc::now())
            .expect("approve");

        assert_eq!(outcome.action.approver_email, "bo@x.com");
        assert_eq!(outcome.transition.request.current_step, 2);

        let late = processor
            .validate(
                &outcome.transition.request,
                &[outcome.action.clone()],
                &ActionSubmission { step_order: 1, ..submit(&request, "ana@x.com", ActionKind::Approve) },
            )
            .expect_err("stale");
        assert!(matches!(late, DomainError::StaleStep { submitted: 1, current: 2, .. }));
    }

    #[test]
    fn outsiders_are_not_authorized() {
        let directory = directory();
        let processor = ActionProcessor::new(&directory);
        let request = start(&directory, ApprovalType::Any);

        let error = processor
            .apply(&request, &[], submit(&request, "intern@x.com", ActionKind::Approve), Utc::now())
            .expect_err("outsider");
        assert!(matches!(error, DomainError::NotAuthorized { step_order: 1, .. }));
    }

    #[test]
    fn second_decision_by_the_same_approver_is_a_duplicate() {
        let directory = directory();
        let processor = ActionProcessor::new(&directory);
        let request = start(&directory, ApprovalType::All);

        let first = processor
            .apply(&request, &[], submit(&request, "ana@x.com", ActionKind::Approve), Utc::now())
            .expect("first");
        assert_eq!(first.transition.request.current_step, 1);

        let error = processor
            .validate(&request, &[first.action], &submit(&request, "ANA@x.com", ActionKind::Reject))
            .expect_err("duplicate");
        assert!(matches!(error, DomainError::DuplicateAction { .. }));
    }

    #[test]
    fn terminal_requests_refuse_actions_before_any_other_check() {
        let directory = directory();
        let processor = ActionProcessor::new(&directory);
        let mut request = start(&directory, ApprovalType::Any);
        request.status = RequestStatus::Rejected;

        let error = processor
            .validate(
                &request,
                &[],
                &ActionSubmission { step_order: 9, ..submit(&request, "intern@x.com", ActionKind::Approve) },
            )
            .expect_err("terminal");
        assert!(matches!(error, DomainError::RequestNotPending { .. }));
    }

    #[test]
    fn delegation_requires_a_distinct_target() {
        let directory = directory();
        let processor = ActionProcessor::new(&directory);
        let request = start(&directory, ApprovalType::All);

        let missing = processor
            .validate(&request, &[], &submit(&request, "ana@x.com", ActionKind::Delegate))
            .expect_err("missing target");
        assert!(matches!(missing, DomainError::InvalidDelegation(_)));

        let to_self = processor
            .validate(&request, &[], &delegate(&request, "ana@x.com", " ANA@x.com"))
            .expect_err("self");
        assert!(matches!(to_self, DomainError::InvalidDelegation(_)));

        let stray = processor
            .validate(
                &request,
                &[],
                &ActionSubmission {
                    delegated_to: Some("cy@x.com".to_string()),
                    ..submit(&request, "ana@x.com", ActionKind::Approve)
                },
            )
            .expect_err("stray target");
        assert!(matches!(stray, DomainError::InvalidDelegation(_)));
    }

    #[test]
    fn delegate_must_still_approve_an_all_gate() {
        let directory = directory();
        let processor = ActionProcessor::new(&directory);
        let request = start(&directory, ApprovalType::All);
        let mut recorded: Vec<ApprovalAction> = Vec::new();

        let delegated = processor
            .apply(&request, &recorded, delegate(&request, "bo@x.com", "cy@x.com"), Utc::now())
            .expect("delegate");
        assert_eq!(delegated.transition.notifications[0].notification_type, NotificationType::Delegated);
        assert_eq!(delegated.transition.notifications[0].recipients, vec!["cy@x.com".to_string()]);
        recorded.push(delegated.action);

        for approver in ["ana@x.com", "bo@x.com"] {
            let outcome = processor
                .apply(&request, &recorded, submit(&request, approver, ActionKind::Approve), Utc::now())
                .expect("approve");
            assert_eq!(outcome.transition.request.current_step, 1);
            recorded.push(outcome.action);
        }

        let outcome = processor
            .apply(&request, &recorded, submit(&request, "cy@x.com", ActionKind::Approve), Utc::now())
            .expect("delegate approves");
        assert_eq!(outcome.transition.request.current_step, 2);
    }

    #[test]
    fn rejection_from_either_all_gate_member_ends_the_request() {
        let directory = directory();
        let processor = ActionProcessor::new(&directory);
        let request = start(&directory, ApprovalType::All);

        let approved = processor
            .apply(&request, &[], submit(&request, "ana@x.com", ActionKind::Approve), Utc::now())
            .expect("approve");
        let mut rejection = submit(&request, "bo@x.com", ActionKind::Reject);
        rejection.comments = Some("  numbers do not tie out ".to_string());
        let rejected = processor
            .apply(&request, &[approved.action], rejection, Utc::now())
            .expect("reject");

        assert_eq!(rejected.action.comments.as_deref(), Some("numbers do not tie out"));
        assert_eq!(rejected.transition.request.status, RequestStatus::Rejected);
    }
}
