use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::document::DocumentType;
use crate::domain::normalize_identity;

string_id!(ChainId);

/// Gating rule for a step whose authorized set holds more than one approver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalType {
    Any,
    All,
}

impl ApprovalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any" => Some(Self::Any),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub step_order: u32,
    pub approver_role: Option<String>,
    pub approver_email: Option<String>,
    pub approval_type: ApprovalType,
    pub required: bool,
}

impl ApprovalStep {
    /// True when `email` is the step's named approver.
    pub fn names_email(&self, email: &str) -> bool {
        let email = normalize_identity(email);
        self.approver_email.as_deref().map(normalize_identity).is_some_and(|named| named == email)
    }

    pub fn describe_approver(&self) -> String {
        match (&self.approver_email, &self.approver_role) {
            (Some(email), Some(role)) => format!("{email} (role {role})"),
            (Some(email), None) => email.clone(),
            (None, Some(role)) => format!("role {role}"),
            (None, None) => "nobody".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalChain {
    pub id: ChainId,
    pub chain_name: String,
    pub document_type: DocumentType,
    pub steps: Vec<ApprovalStep>,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl ApprovalChain {
    pub fn step(&self, step_order: u32) -> Option<&ApprovalStep> {
        step_at(&self.steps, step_order)
    }

    pub fn step_count(&self) -> u32 {
        u32::try_from(self.steps.len()).unwrap_or(u32::MAX)
    }

    /// Steps must be numbered 1..=N in list order.
    pub fn has_contiguous_steps(&self) -> bool {
        steps_are_contiguous(&self.steps)
    }
}

pub(crate) fn step_at(steps: &[ApprovalStep], step_order: u32) -> Option<&ApprovalStep> {
    let index = usize::try_from(step_order).ok()?.checked_sub(1)?;
    steps.get(index)
}

pub(crate) fn steps_are_contiguous(steps: &[ApprovalStep]) -> bool {
    !steps.is_empty()
        && steps
            .iter()
            .enumerate()
            .all(|(index, step)| usize::try_from(step.step_order).ok() == Some(index + 1))
}
