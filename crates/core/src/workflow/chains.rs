use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::chain::{steps_are_contiguous, ApprovalChain, ApprovalStep, ApprovalType, ChainId};
use crate::domain::document::DocumentType;
use crate::domain::normalize_identity;
use crate::errors::DomainError;

fn default_required() -> bool {
    true
}

fn default_active() -> bool {
    true
}

/// Caller-supplied step. Any `step_order` sent by the caller is ignored; order
/// is assigned from list position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    #[serde(default)]
    pub step_order: Option<u32>,
    #[serde(default)]
    pub approver_role: Option<String>,
    #[serde(default)]
    pub approver_email: Option<String>,
    pub approval_type: ApprovalType,
    #[serde(default = "default_required")]
    pub required: bool,
}

impl StepDefinition {
    pub fn for_email(email: impl Into<String>, approval_type: ApprovalType) -> Self {
        Self {
            step_order: None,
            approver_role: None,
            approver_email: Some(email.into()),
            approval_type,
            required: true,
        }
    }

    pub fn for_role(role: impl Into<String>, approval_type: ApprovalType) -> Self {
        Self {
            step_order: None,
            approver_role: Some(role.into()),
            approver_email: None,
            approval_type,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDraft {
    pub chain_name: String,
    pub document_type: DocumentType,
    pub steps: Vec<StepDefinition>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_by: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

/// Validates a draft and assigns a fresh id and 1..N step orders.
pub fn build_chain(draft: ChainDraft, now: DateTime<Utc>) -> Result<ApprovalChain, DomainError> {
    let chain_name = draft.chain_name.trim().to_string();
    if chain_name.is_empty() {
        return Err(DomainError::InvalidSteps("chain name must not be empty".to_string()));
    }

    if draft.steps.is_empty() {
        return Err(DomainError::InvalidSteps("a chain needs at least one step".to_string()));
    }

    let mut steps = Vec::with_capacity(draft.steps.len());
    for (index, definition) in draft.steps.into_iter().enumerate() {
        let position = index + 1;
        let approver_role = non_blank(definition.approver_role);
        let approver_email = non_blank(definition.approver_email).map(|email| normalize_identity(&email));
        if approver_role.is_none() && approver_email.is_none() {
            return Err(DomainError::InvalidSteps(format!(
                "step {position} names neither an approver role nor an approver email"
            )));
        }

        let step_order = u32::try_from(position)
            .map_err(|_| DomainError::InvalidSteps("too many steps".to_string()))?;
        steps.push(ApprovalStep {
            step_order,
            approver_role,
            approver_email,
            approval_type: definition.approval_type,
            required: definition.required,
        });
    }

    if !steps_are_contiguous(&steps) {
        return Err(DomainError::InvariantViolation(
            "normalized step orders are not contiguous".to_string(),
        ));
    }

    Ok(ApprovalChain {
        id: ChainId::generate(),
        chain_name,
        document_type: draft.document_type,
        steps,
        is_active: draft.is_active,
        created_by: normalize_identity(&draft.created_by),
        created_at: now,
    })
}
