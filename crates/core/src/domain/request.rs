use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::chain::{step_at, ApprovalStep, ChainId};
use crate::domain::document::DocumentType;

string_id!(RequestId);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One execution of a chain against one document. The chain's steps are
/// copied in at creation so later chain changes never reach in-flight work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub chain_id: ChainId,
    pub chain_name: String,
    pub steps: Vec<ApprovalStep>,
    pub document_type: DocumentType,
    pub document_id: String,
    pub document_name: String,
    pub requested_by: String,
    pub request_date: DateTime<Utc>,
    pub current_step: u32,
    pub status: RequestStatus,
    pub completed_date: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    pub fn step_count(&self) -> u32 {
        u32::try_from(self.steps.len()).unwrap_or(u32::MAX)
    }

    pub fn current_step_definition(&self) -> Option<&ApprovalStep> {
        step_at(&self.steps, self.current_step)
    }

    pub fn is_on_last_step(&self) -> bool {
        self.current_step == self.step_count()
    }
}

/// Caller-supplied fields for a new request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApprovalRequest {
    pub chain_id: ChainId,
    pub document_type: DocumentType,
    pub document_id: String,
    pub document_name: String,
    pub requested_by: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub document_type: Option<DocumentType>,
    pub requested_by: Option<String>,
}

impl RequestFilter {
    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        if let Some(status) = self.status {
            if request.status != status {
                return false;
            }
        }

        if let Some(document_type) = &self.document_type {
            if &request.document_type != document_type {
                return false;
            }
        }

        if let Some(requested_by) = &self.requested_by {
            let wanted = crate::domain::normalize_identity(requested_by);
            if crate::domain::normalize_identity(&request.requested_by) != wanted {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::RequestStatus;

    #[test]
    fn request_status_round_trips_from_storage_encoding() {
        let cases = [
            RequestStatus::Pending,
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Cancelled,
        ];

        for status in cases {
            assert_eq!(RequestStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(RequestStatus::Approved.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(RequestStatus::Cancelled.is_terminal());
    }
}
