//! Approval workflow logic. Everything here is pure: callers supply the
//! current state, a clock reading, and a role directory, and get back the next
//! state plus the notifications it implies.

pub mod actions;
pub mod chains;
pub mod directory;
pub mod evaluator;
pub mod machine;
pub mod notifications;

pub use actions::{ActionOutcome, ActionProcessor, ActionSubmission};
pub use chains::{build_chain, ChainDraft, StepDefinition};
pub use directory::{InMemoryRoleDirectory, RoleDirectory};
pub use evaluator::{evaluate_step, StepApprovers, StepOutcome};
pub use machine::{RequestEvent, RequestStateMachine, TransitionOutcome};
pub use notifications::{
    sign_payload, DeliveryChannel, DeliveryError, NotificationDispatcher, NotificationIntent,
};
