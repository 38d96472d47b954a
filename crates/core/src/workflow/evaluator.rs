use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::action::{ActionKind, ApprovalAction};
use crate::domain::chain::{ApprovalStep, ApprovalType};
use crate::domain::normalize_identity;
use crate::errors::DomainError;
use crate::workflow::directory::RoleDirectory;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Satisfied,
    Rejected,
    Pending,
}

/// Everyone who may act on a step: the named approver, the current holders of
/// the step's role, and anyone the step's approvers delegated to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepApprovers {
    pub named: Option<String>,
    pub role_members: BTreeSet<String>,
    pub delegates: BTreeSet<String>,
}

impl StepApprovers {
    pub fn from_parts<I>(step: &ApprovalStep, actions: &[ApprovalAction], role_members: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let named = step
            .approver_email
            .as_deref()
            .map(normalize_identity)
            .filter(|email| !email.is_empty());
        let role_members = role_members.into_iter().map(|member| normalize_identity(&member)).collect();
        let delegates = actions
            .iter()
            .filter(|action| action.step_order == step.step_order)
            .filter(|action| action.action == ActionKind::Delegate)
            .filter_map(|action| action.delegated_to.as_deref())
            .map(normalize_identity)
            .collect();

        Self { named, role_members, delegates }
    }

    /// Resolves the step's role through `directory` at call time.
    pub fn resolve(
        step: &ApprovalStep,
        actions: &[ApprovalAction],
        directory: &dyn RoleDirectory,
    ) -> Result<Self, DomainError> {
        let role_members = match step.approver_role.as_deref().map(str::trim) {
            Some(role) if !role.is_empty() => directory
                .members_of(role)
                .map_err(|message| DomainError::RoleResolution { role: role.to_string(), message })?,
            _ => Vec::new(),
        };

        Ok(Self::from_parts(step, actions, role_members))
    }

    pub fn is_authorized(&self, email: &str) -> bool {
        let email = normalize_identity(email);
        !email.is_empty()
            && (self.named.as_deref() == Some(email.as_str())
                || self.role_members.contains(&email)
                || self.delegates.contains(&email))
    }

    /// Approvers who must all approve under an `all` gate. A named approver
    /// takes precedence over the role; delegates are always added.
    pub fn gate_members(&self) -> BTreeSet<String> {
        let mut members = match &self.named {
            Some(named) => BTreeSet::from([named.clone()]),
            None => self.role_members.clone(),
        };
        members.extend(self.delegates.iter().cloned());
        members
    }

    pub fn everyone(&self) -> BTreeSet<String> {
        let mut members: BTreeSet<String> = self.named.iter().cloned().collect();
        members.extend(self.role_members.iter().cloned());
        members.extend(self.delegates.iter().cloned());
        members
    }
}

/// Decides a step from its definition and the actions recorded against it.
/// Pure: no lookups, no clock, no side effects.
pub fn evaluate_step(
    step: &ApprovalStep,
    actions: &[ApprovalAction],
    approvers: &StepApprovers,
) -> StepOutcome {
    let decisions: Vec<&ApprovalAction> = actions
        .iter()
        .filter(|action| action.step_order == step.step_order)
        .filter(|action| action.action.is_decision())
        .collect();

    if !step.required && decisions.is_empty() {
        return StepOutcome::Satisfied;
    }

    if decisions.iter().any(|action| action.action == ActionKind::Reject) {
        return StepOutcome::Rejected;
    }

    let approved_by: BTreeSet<String> = decisions
        .iter()
        .filter(|action| action.action == ActionKind::Approve)
        .map(|action| normalize_identity(&action.approver_email))
        .collect();

    match step.approval_type {
        ApprovalType::Any if !approved_by.is_empty() => StepOutcome::Satisfied,
        ApprovalType::All => {
            let required = approvers.gate_members();
            if !required.is_empty() && required.iter().all(|member| approved_by.contains(member)) {
                StepOutcome::Satisfied
            } else {
                StepOutcome::Pending
            }
        }
        ApprovalType::Any => StepOutcome::Pending,
    }
}
