use thiserror::Error;

use crate::domain::chain::ChainId;
use crate::domain::notification::NotificationId;
use crate::domain::request::{RequestId, RequestStatus};

/// Coarse classification of engine failures, used by transports to pick a
/// response shape and by callers to decide whether a retry makes sense.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    StatePrecondition,
    Authorization,
    Idempotency,
    NotFound,
    Integration,
    Internal,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid approval steps: {0}")]
    InvalidSteps(String),
    #[error("invalid approval request: {0}")]
    InvalidRequest(String),
    #[error("approval chain `{0}` not found")]
    ChainNotFound(ChainId),
    #[error("approval chain `{0}` is inactive")]
    ChainInactive(ChainId),
    #[error("approval chain `{0}` still has pending requests")]
    HasOpenRequests(ChainId),
    #[error("approval request `{0}` not found")]
    RequestNotFound(RequestId),
    #[error("approval request `{request_id}` is {status:?}, not pending")]
    RequestNotPending { request_id: RequestId, status: RequestStatus },
    #[error("action targets step {submitted} but request `{request_id}` is on step {current}")]
    StaleStep { request_id: RequestId, submitted: u32, current: u32 },
    #[error("`{approver}` is not an authorized approver for step {step_order}")]
    NotAuthorized { approver: String, step_order: u32 },
    #[error("`{approver}` already acted on step {step_order}")]
    DuplicateAction { approver: String, step_order: u32 },
    #[error("invalid delegation: {0}")]
    InvalidDelegation(String),
    #[error("notification `{0}` not found")]
    NotificationNotFound(NotificationId),
    #[error("`{acting_user}` may not modify notification `{notification_id}`")]
    NotificationForbidden { notification_id: NotificationId, acting_user: String },
    #[error("role `{role}` could not be resolved: {message}")]
    RoleResolution { role: String, message: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSteps(_) | Self::InvalidRequest(_) | Self::InvalidDelegation(_) => {
                ErrorKind::Validation
            }
            Self::ChainInactive(_)
            | Self::HasOpenRequests(_)
            | Self::RequestNotPending { .. }
            | Self::StaleStep { .. } => ErrorKind::StatePrecondition,
            Self::NotAuthorized { .. } | Self::NotificationForbidden { .. } => {
                ErrorKind::Authorization
            }
            Self::DuplicateAction { .. } => ErrorKind::Idempotency,
            Self::ChainNotFound(_) | Self::RequestNotFound(_) | Self::NotificationNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::RoleResolution { .. } => ErrorKind::Integration,
            Self::InvariantViolation(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code surfaced to transports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSteps(_) => "invalid_steps",
            Self::InvalidRequest(_) => "invalid_request",
            Self::ChainNotFound(_) => "chain_not_found",
            Self::ChainInactive(_) => "chain_inactive",
            Self::HasOpenRequests(_) => "has_open_requests",
            Self::RequestNotFound(_) => "request_not_found",
            Self::RequestNotPending { .. } => "request_not_pending",
            Self::StaleStep { .. } => "stale_step",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::DuplicateAction { .. } => "duplicate_action",
            Self::InvalidDelegation(_) => "invalid_delegation",
            Self::NotificationNotFound(_) => "notification_not_found",
            Self::NotificationForbidden { .. } => "not_authorized",
            Self::RoleResolution { .. } => "role_resolution",
            Self::InvariantViolation(_) => "invariant_violation",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(error) => Some(error),
            _ => None,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { code: &'static str, message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { code: &'static str, message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The record changed since it was loaded. Refresh and review its current state."
            }
            Self::Forbidden { .. } => "You are not permitted to perform this action.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { code, .. }
            | Self::NotFound { code, .. }
            | Self::Conflict { code, .. }
            | Self::Forbidden { code, .. } => *code,
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Internal { .. } => "internal",
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                let code = error.code();
                let message = error.to_string();
                match error.kind() {
                    ErrorKind::Validation => Self::BadRequest { code, message, correlation_id },
                    ErrorKind::NotFound => Self::NotFound { code, message, correlation_id },
                    ErrorKind::StatePrecondition | ErrorKind::Idempotency => {
                        Self::Conflict { code, message, correlation_id }
                    }
                    ErrorKind::Authorization => Self::Forbidden { code, message, correlation_id },
                    ErrorKind::Integration => Self::ServiceUnavailable { message, correlation_id },
                    ErrorKind::Internal => Self::Internal { message, correlation_id },
                }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
