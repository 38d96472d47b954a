use std::sync::Arc;

use signoff_core::audit::{AuditContext, InMemoryAuditSink};
use signoff_core::domain::action::ActionKind;
use signoff_core::domain::chain::{ApprovalChain, ApprovalType};
use signoff_core::domain::document::DocumentType;
use signoff_core::domain::notification::NotificationType;
use signoff_core::domain::request::{ApprovalRequest, NewApprovalRequest, RequestFilter, RequestStatus};
use signoff_core::errors::{ApplicationError, DomainError};
use signoff_core::workflow::{ActionSubmission, ChainDraft, InMemoryRoleDirectory, StepDefinition};
use signoff_engine::{NotificationOutbox, WorkflowApi};

struct Harness {
    api: WorkflowApi,
    directory: Arc<InMemoryRoleDirectory>,
    audit: InMemoryAuditSink,
}

fn harness() -> Harness {
    let directory = Arc::new(InMemoryRoleDirectory::with_roles(vec![
        ("finance", vec!["fin-a@x.com", "fin-b@x.com"]),
        ("board", vec!["ana@x.com", "bo@x.com"]),
    ]));
    let audit = InMemoryAuditSink::default();
    let api = WorkflowApi::in_memory(directory.clone(), Arc::new(audit.clone()));
    Harness { api, directory, audit }
}

fn ctx(actor: &str) -> AuditContext {
    AuditContext::new(None, "corr-test", actor)
}

fn draft(name: &str, steps: Vec<StepDefinition>) -> ChainDraft {
    ChainDraft {
        chain_name: name.to_string(),
        document_type: DocumentType::Budget,
        steps,
        is_active: true,
        created_by: "controller@x.com".to_string(),
    }
}

async fn chain(harness: &Harness, steps: Vec<StepDefinition>) -> ApprovalChain {
    harness.api.create_chain(draft("Test chain", steps), &ctx("controller@x.com")).await.expect("chain")
}

async fn raise(harness: &Harness, chain: &ApprovalChain) -> ApprovalRequest {
    harness
        .api
        .create_request(
            NewApprovalRequest {
                chain_id: chain.id.clone(),
                document_type: DocumentType::Budget,
                document_id: "BUD-2026".to_string(),
                document_name: "FY26 budget".to_string(),
                requested_by: "analyst@x.com".to_string(),
            },
            &ctx("analyst@x.com"),
        )
        .await
        .expect("request")
}

fn submission(
    request: &ApprovalRequest,
    step: u32,
    approver: &str,
    action: ActionKind,
) -> ActionSubmission {
    ActionSubmission {
        request_id: request.id.clone(),
        step_order: step,
        approver_email: approver.to_string(),
        action,
        comments: None,
        delegated_to: None,
    }
}

async fn act(
    harness: &Harness,
    submission: ActionSubmission,
) -> Result<signoff_core::domain::action::ApprovalAction, ApplicationError> {
    let actor = submission.approver_email.clone();
    harness.api.submit_action(submission, &ctx(&actor)).await
}

async fn reload(harness: &Harness, request: &ApprovalRequest) -> ApprovalRequest {
    harness.api.get_request(&request.id).await.expect("detail").request
}

#[tokio::test]
async fn two_step_sign_off_ends_rejected_with_requester_notified() {
    let harness = harness();
    let chain = harness
        .api
        .create_chain(
            draft(
                "Two-Step Sign-off",
                vec![
                    StepDefinition::for_email("cfo@x.com", ApprovalType::Any),
                    StepDefinition::for_email("ceo@x.com", ApprovalType::Any),
                ],
            ),
            &ctx("controller@x.com"),
        )
        .await
        .expect("chain");
    let request = raise(&harness, &chain).await;
    assert_eq!(request.current_step, 1);
    assert_eq!(request.status, RequestStatus::Pending);

    act(&harness, submission(&request, 1, "cfo@x.com", ActionKind::Approve)).await.expect("cfo");
    let after_cfo = reload(&harness, &request).await;
    assert_eq!(after_cfo.current_step, 2);
    assert_eq!(after_cfo.status, RequestStatus::Pending);

    let mut rejection = submission(&request, 2, "ceo@x.com", ActionKind::Reject);
    rejection.comments = Some("budget too high".to_string());
    let recorded = act(&harness, rejection).await.expect("ceo");
    assert_eq!(recorded.comments.as_deref(), Some("budget too high"));

    let detail = harness.api.get_request(&request.id).await.expect("detail");
    assert_eq!(detail.request.status, RequestStatus::Rejected);
    assert!(detail.request.completed_date.is_some());
    assert_eq!(detail.actions.len(), 2);
    assert!(detail.current_approvers.is_empty());

    let inbox = harness.api.list_notifications("analyst@x.com", false).await.expect("inbox");
    assert_eq!(inbox[0].notification_type, NotificationType::Rejected);

    let events = harness.audit.event_types();
    for expected in [
        "chain.created",
        "request.created",
        "action.recorded",
        "request.step_advanced",
        "request.rejected",
    ] {
        assert!(events.iter().any(|event| event == expected), "missing audit event {expected}");
    }
}

#[tokio::test]
async fn terminal_requests_accept_no_further_actions() {
    let harness = harness();
    let chain = chain(&harness, vec![StepDefinition::for_role("finance", ApprovalType::All)]).await;
    let request = raise(&harness, &chain).await;

    act(&harness, submission(&request, 1, "fin-a@x.com", ActionKind::Reject)).await.expect("reject");

    let late = act(&harness, submission(&request, 1, "fin-b@x.com", ActionKind::Approve))
        .await
        .expect_err("terminal");
    assert!(matches!(
        late.domain(),
        Some(DomainError::RequestNotPending { status: RequestStatus::Rejected, .. })
    ));
    assert!(harness.audit.event_types().iter().any(|event| event == "action.rejected"));
}

#[tokio::test]
async fn any_gate_advances_once_and_the_slower_approver_sees_a_stale_step() {
    let harness = harness();
    let chain = chain(
        &harness,
        vec![
            StepDefinition::for_role("finance", ApprovalType::Any),
            StepDefinition::for_email("ceo@x.com", ApprovalType::Any),
        ],
    )
    .await;
    let request = raise(&harness, &chain).await;

    act(&harness, submission(&request, 1, "fin-b@x.com", ActionKind::Approve)).await.expect("first");
    let second = act(&harness, submission(&request, 1, "fin-a@x.com", ActionKind::Approve))
        .await
        .expect_err("step already left");
    assert!(matches!(second.domain(), Some(DomainError::StaleStep { submitted: 1, current: 2, .. })));
    assert_eq!(reload(&harness, &request).await.current_step, 2);
}

#[tokio::test]
async fn all_gate_waits_for_every_member() {
    let harness = harness();
    let chain = chain(&harness, vec![StepDefinition::for_role("board", ApprovalType::All)]).await;
    let request = raise(&harness, &chain).await;

    act(&harness, submission(&request, 1, "ana@x.com", ActionKind::Approve)).await.expect("ana");
    assert_eq!(reload(&harness, &request).await.status, RequestStatus::Pending);

    let duplicate = act(&harness, submission(&request, 1, "ANA@x.com", ActionKind::Approve))
        .await
        .expect_err("duplicate");
    assert!(matches!(duplicate.domain(), Some(DomainError::DuplicateAction { .. })));

    act(&harness, submission(&request, 1, "bo@x.com", ActionKind::Approve)).await.expect("bo");
    let done = reload(&harness, &request).await;
    assert_eq!(done.status, RequestStatus::Approved);

    let inbox = harness.api.list_notifications("analyst@x.com", false).await.expect("inbox");
    assert!(inbox.iter().any(|item| item.notification_type == NotificationType::Completed));
}

#[tokio::test]
async fn rejection_at_step_two_never_reaches_step_three() {
    let harness = harness();
    let chain = chain(
        &harness,
        vec![
            StepDefinition::for_email("cfo@x.com", ApprovalType::Any),
            StepDefinition::for_email("ceo@x.com", ApprovalType::Any),
            StepDefinition::for_email("chair@x.com", ApprovalType::Any),
        ],
    )
    .await;
    let request = raise(&harness, &chain).await;

    act(&harness, submission(&request, 1, "cfo@x.com", ActionKind::Approve)).await.expect("cfo");
    act(&harness, submission(&request, 2, "ceo@x.com", ActionKind::Reject)).await.expect("ceo");

    let rejected = reload(&harness, &request).await;
    assert_eq!(rejected.current_step, 2);
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert!(harness.api.list_notifications("chair@x.com", false).await.expect("inbox").is_empty());
}

#[tokio::test]
async fn delegation_widens_the_gate_without_satisfying_it() {
    let harness = harness();
    let chain = chain(&harness, vec![StepDefinition::for_email("cfo@x.com", ApprovalType::All)]).await;
    let request = raise(&harness, &chain).await;

    let mut delegation = submission(&request, 1, "cfo@x.com", ActionKind::Delegate);
    delegation.delegated_to = Some("deputy@x.com".to_string());
    act(&harness, delegation).await.expect("delegate");

    let detail = harness.api.get_request(&request.id).await.expect("detail");
    assert_eq!(detail.request.status, RequestStatus::Pending);
    assert!(detail.current_approvers.contains(&"deputy@x.com".to_string()));

    let deputy_inbox = harness.api.list_notifications("deputy@x.com", false).await.expect("inbox");
    assert_eq!(deputy_inbox.len(), 1);
    assert_eq!(deputy_inbox[0].notification_type, NotificationType::Delegated);

    act(&harness, submission(&request, 1, "cfo@x.com", ActionKind::Approve)).await.expect("cfo");
    assert_eq!(reload(&harness, &request).await.status, RequestStatus::Pending);

    act(&harness, submission(&request, 1, "deputy@x.com", ActionKind::Approve)).await.expect("deputy");
    assert_eq!(reload(&harness, &request).await.status, RequestStatus::Approved);
}

#[tokio::test]
async fn request_creation_requires_an_active_chain() {
    let harness = harness();
    let chain = chain(&harness, vec![StepDefinition::for_email("cfo@x.com", ApprovalType::Any)]).await;
    harness.api.set_chain_active(&chain.id, false, &ctx("controller@x.com")).await.expect("deactivate");

    let new_request = NewApprovalRequest {
        chain_id: chain.id.clone(),
        document_type: DocumentType::Budget,
        document_id: "BUD-1".to_string(),
        document_name: "FY26 budget".to_string(),
        requested_by: "analyst@x.com".to_string(),
    };
    let inactive = harness
        .api
        .create_request(new_request.clone(), &ctx("analyst@x.com"))
        .await
        .expect_err("inactive");
    assert!(matches!(inactive.domain(), Some(DomainError::ChainInactive(_))));

    let mut unknown = new_request;
    unknown.chain_id = signoff_core::domain::chain::ChainId("CH-404".to_string());
    let missing =
        harness.api.create_request(unknown, &ctx("analyst@x.com")).await.expect_err("missing");
    assert!(matches!(missing.domain(), Some(DomainError::ChainNotFound(_))));
}

#[tokio::test]
async fn chains_with_pending_requests_cannot_be_deleted_until_cancelled() {
    let harness = harness();
    let chain = chain(&harness, vec![StepDefinition::for_email("cfo@x.com", ApprovalType::Any)]).await;
    let request = raise(&harness, &chain).await;
    let controller = ctx("controller@x.com");

    let busy = harness.api.delete_chain(&chain.id, &controller).await.expect_err("busy");
    assert!(matches!(busy.domain(), Some(DomainError::HasOpenRequests(_))));

    let cancelled = harness.api.cancel_request(&request.id, &ctx("analyst@x.com")).await.expect("cancel");
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert!(cancelled.completed_date.is_some());

    let again = harness.api.cancel_request(&request.id, &ctx("analyst@x.com")).await.expect_err("twice");
    assert!(matches!(again.domain(), Some(DomainError::RequestNotPending { .. })));

    harness.api.delete_chain(&chain.id, &controller).await.expect("delete");
    assert!(harness.api.list_chains(false).await.expect("chains").is_empty());

    let kept = harness.api.get_request(&request.id).await.expect("request survives chain deletion");
    assert_eq!(kept.request.steps.len(), 1);
}

#[tokio::test]
async fn only_the_recipient_may_mark_a_notification_read() {
    let harness = harness();
    let chain = chain(&harness, vec![StepDefinition::for_email("cfo@x.com", ApprovalType::Any)]).await;
    raise(&harness, &chain).await;

    let inbox = harness.api.list_notifications("cfo@x.com", true).await.expect("inbox");
    assert_eq!(inbox.len(), 1);
    let id = inbox[0].id.clone();

    let forbidden =
        harness.api.mark_notification_read(&id, &ctx("intruder@x.com")).await.expect_err("forbidden");
    assert!(matches!(forbidden.domain(), Some(DomainError::NotificationForbidden { .. })));

    let read = harness.api.mark_notification_read(&id, &ctx("CFO@x.com")).await.expect("mark");
    assert!(read.is_read);
    harness.api.mark_notification_read(&id, &ctx("cfo@x.com")).await.expect("mark again");
    assert!(harness.api.list_notifications("cfo@x.com", true).await.expect("unread").is_empty());
}

#[tokio::test]
async fn role_membership_is_resolved_live() {
    let harness = harness();
    let chain = chain(&harness, vec![StepDefinition::for_role("finance", ApprovalType::Any)]).await;
    let request = raise(&harness, &chain).await;

    harness.directory.set_members("finance", vec!["fin-c@x.com".to_string()]);
    let revoked = act(&harness, submission(&request, 1, "fin-a@x.com", ActionKind::Approve))
        .await
        .expect_err("no longer in role");
    assert!(matches!(revoked.domain(), Some(DomainError::NotAuthorized { .. })));

    let detail = harness.api.get_request(&request.id).await.expect("detail");
    assert_eq!(detail.current_approvers, vec!["fin-c@x.com".to_string()]);
    act(&harness, submission(&request, 1, "fin-c@x.com", ActionKind::Approve)).await.expect("new member");
}

#[tokio::test]
async fn optional_steps_auto_pass_at_creation() {
    let harness = harness();
    let chain = chain(
        &harness,
        vec![
            StepDefinition::for_email("info@x.com", ApprovalType::Any).optional(),
            StepDefinition::for_email("cfo@x.com", ApprovalType::Any),
        ],
    )
    .await;
    let request = raise(&harness, &chain).await;
    assert_eq!(request.current_step, 2);
    assert!(harness.api.list_notifications("info@x.com", false).await.expect("inbox").is_empty());
    assert_eq!(harness.api.list_notifications("cfo@x.com", false).await.expect("inbox").len(), 1);

    let filtered = harness
        .api
        .list_requests(&RequestFilter { status: Some(RequestStatus::Pending), ..RequestFilter::default() })
        .await
        .expect("list");
    assert_eq!(filtered.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_any_gate_approvals_advance_exactly_once() {
    let members: Vec<String> = (0..8).map(|n| format!("approver-{n}@x.com")).collect();
    let directory = Arc::new(InMemoryRoleDirectory::with_roles(vec![("desk", members.clone())]));
    let audit = InMemoryAuditSink::default();
    let pool = signoff_db::connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    signoff_db::migrations::run_pending(&pool).await.expect("migrations");
    let api = Arc::new(WorkflowApi::sqlite(
        pool,
        directory,
        Arc::new(audit.clone()),
        NotificationOutbox::disabled(),
    ));
    api.start().await.expect("start");

    let chain = api
        .create_chain(
            draft(
                "Desk review",
                vec![
                    StepDefinition::for_role("desk", ApprovalType::Any),
                    StepDefinition::for_email("ceo@x.com", ApprovalType::Any),
                ],
            ),
            &ctx("controller@x.com"),
        )
        .await
        .expect("chain");
    let request = api
        .create_request(
            NewApprovalRequest {
                chain_id: chain.id.clone(),
                document_type: DocumentType::Budget,
                document_id: "BUD-9".to_string(),
                document_name: "Desk budget".to_string(),
                requested_by: "analyst@x.com".to_string(),
            },
            &ctx("analyst@x.com"),
        )
        .await
        .expect("request");

    let mut handles = Vec::new();
    for member in members {
        let api = Arc::clone(&api);
        let attempt = submission(&request, 1, &member, ActionKind::Approve);
        handles.push(tokio::spawn(async move { api.submit_action(attempt, &ctx(&member)).await }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.expect("task") {
            Ok(_) => accepted += 1,
            Err(error) => {
                assert!(matches!(error.domain(), Some(DomainError::StaleStep { current: 2, .. })))
            }
        }
    }

    assert_eq!(accepted, 1);
    let detail = api.get_request(&request.id).await.expect("detail");
    assert_eq!(detail.request.current_step, 2);
    assert_eq!(detail.actions.len(), 1);
    let advances =
        audit.event_types().into_iter().filter(|event| event == "request.step_advanced").count();
    assert_eq!(advances, 1);
}
