pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod workflow;

pub use chrono;

pub use domain::action::{ActionId, ActionKind, ApprovalAction};
pub use domain::chain::{ApprovalChain, ApprovalStep, ApprovalType, ChainId};
pub use domain::document::DocumentType;
pub use domain::normalize_identity;
pub use domain::notification::{ApprovalNotification, NotificationId, NotificationType};
pub use domain::request::{
    ApprovalRequest, NewApprovalRequest, RequestFilter, RequestId, RequestStatus,
};
pub use errors::{ApplicationError, DomainError, ErrorKind, InterfaceError};
pub use workflow::{
    ActionProcessor, ActionSubmission, ChainDraft, InMemoryRoleDirectory, NotificationDispatcher,
    RequestStateMachine, RoleDirectory, StepDefinition,
};
