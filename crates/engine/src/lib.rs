//! Orchestration for the approval workflow: chain storage with an
//! active-chain cache, per-request serialized request processing, the
//! notification outbox, and the `WorkflowApi` façade transports call into.

pub mod api;
pub mod audit;
pub mod chains;
pub mod engine;
pub mod locks;
pub mod outbox;

pub use api::{WorkflowApi, WorkflowParts};
pub use audit::TracingAuditSink;
pub use chains::ChainStore;
pub use engine::{RequestDetail, WorkflowEngine};
pub use locks::RequestLocks;
pub use outbox::NotificationOutbox;
