use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::RequestId;

string_id!(ActionId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Approve,
    Reject,
    Delegate,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Delegate => "delegate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "delegate" => Some(Self::Delegate),
            _ => None,
        }
    }

    /// Approve and reject are decisions; delegation only widens the approver set.
    pub fn is_decision(&self) -> bool {
        !matches!(self, Self::Delegate)
    }
}

/// Immutable record of one approver's decision at one step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAction {
    pub id: ActionId,
    pub request_id: RequestId,
    pub step_order: u32,
    pub approver_email: String,
    pub action: ActionKind,
    pub action_date: DateTime<Utc>,
    pub comments: Option<String>,
    pub delegated_to: Option<String>,
}
