use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use signoff_core::audit::AuditContext;
use signoff_core::domain::action::{ActionKind, ApprovalAction};
use signoff_core::domain::chain::{ApprovalChain, ChainId};
use signoff_core::domain::document::DocumentType;
use signoff_core::domain::notification::{ApprovalNotification, NotificationId};
use signoff_core::domain::request::{
    ApprovalRequest, NewApprovalRequest, RequestFilter, RequestId, RequestStatus,
};
use signoff_core::errors::{ApplicationError, InterfaceError};
use signoff_core::workflow::{ActionSubmission, ChainDraft, StepDefinition};
use signoff_engine::{RequestDetail, WorkflowApi};

pub const USER_HEADER: &str = "x-user-email";
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    pub api: Arc<WorkflowApi>,
}

pub fn router(api: Arc<WorkflowApi>) -> Router {
    Router::new()
        .route("/api/v1/chains", post(create_chain).get(list_chains))
        .route("/api/v1/chains/{chain_id}", patch(update_chain).delete(delete_chain))
        .route("/api/v1/requests", post(create_request).get(list_requests))
        .route("/api/v1/requests/{request_id}", get(get_request))
        .route("/api/v1/requests/{request_id}/actions", post(submit_action))
        .route("/api/v1/requests/{request_id}/cancel", post(cancel_request))
        .route("/api/v1/notifications", get(list_notifications))
        .route("/api/v1/notifications/{notification_id}/read", post(mark_notification_read))
        .with_state(ApiState { api })
}

/// The authenticated user as asserted by the upstream authentication layer,
/// plus the correlation id every log line and audit event for this call carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user: String,
    pub correlation_id: String,
}

impl Caller {
    pub fn new(user: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self { user: user.into(), correlation_id: correlation_id.into() }
    }

    fn audit(&self) -> AuditContext {
        AuditContext::new(None, self.correlation_id.clone(), self.user.clone())
    }

    fn audit_for(&self, request_id: &RequestId) -> AuditContext {
        AuditContext::new(Some(request_id.clone()), self.correlation_id.clone(), self.user.clone())
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = header_value(parts, CORRELATION_HEADER)
            .unwrap_or_else(|| format!("req-{}", uuid::Uuid::new_v4()));

        match header_value(parts, USER_HEADER) {
            Some(user) => Ok(Self::new(user, correlation_id)),
            None => Err(ApiError::unauthenticated(correlation_id)),
        }
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
    pub user_message: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ApiErrorBody,
}

impl ApiError {
    fn application(error: ApplicationError, correlation_id: &str) -> Self {
        let mapped = Self::from(error.into_interface(correlation_id));
        warn!(
            event_name = "http.request.failed",
            correlation_id = %mapped.body.correlation_id,
            status = mapped.status.as_u16(),
            code = %mapped.body.code,
            error = %mapped.body.message,
            "api request failed"
        );
        mapped
    }

    fn unauthenticated(correlation_id: String) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            body: ApiErrorBody {
                code: "unauthenticated".to_string(),
                message: format!("missing `{USER_HEADER}` header"),
                user_message: "Sign in to continue.".to_string(),
                correlation_id,
            },
        }
    }

    fn bad_filter(message: String, correlation_id: &str) -> Self {
        Self::from(InterfaceError::BadRequest {
            code: "invalid_filter",
            message,
            correlation_id: correlation_id.to_string(),
        })
    }
}

impl From<InterfaceError> for ApiError {
    fn from(error: InterfaceError) -> Self {
        let status = match &error {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
            InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let (message, correlation_id) = match &error {
            InterfaceError::BadRequest { message, correlation_id, .. }
            | InterfaceError::NotFound { message, correlation_id, .. }
            | InterfaceError::Conflict { message, correlation_id, .. }
            | InterfaceError::Forbidden { message, correlation_id, .. }
            | InterfaceError::ServiceUnavailable { message, correlation_id }
            | InterfaceError::Internal { message, correlation_id } => {
                (message.clone(), correlation_id.clone())
            }
        };

        Self {
            status,
            body: ApiErrorBody {
                code: error.code().to_string(),
                message,
                user_message: error.user_message().to_string(),
                correlation_id,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateChainBody {
    pub chain_name: String,
    pub document_type: DocumentType,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListChainsQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpdateChainBody {
    pub is_active: bool,
}

/// The requester is always the caller, like the approver on actions.
#[derive(Clone, Debug, Deserialize)]
pub struct CreateRequestBody {
    pub chain_id: ChainId,
    pub document_type: DocumentType,
    pub document_id: String,
    pub document_name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListRequestsQuery {
    pub status: Option<String>,
    pub document_type: Option<String>,
    pub requested_by: Option<String>,
}

/// The approver is always the caller; the body cannot act for someone else.
#[derive(Clone, Debug, Deserialize)]
pub struct SubmitActionBody {
    pub step_order: u32,
    pub action: ActionKind,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub delegated_to: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
}

pub async fn create_chain(
    caller: Caller,
    State(state): State<ApiState>,
    Json(body): Json<CreateChainBody>,
) -> Result<(StatusCode, Json<ApprovalChain>), ApiError> {
    let draft = ChainDraft {
        chain_name: body.chain_name,
        document_type: body.document_type,
        steps: body.steps,
        is_active: body.is_active.unwrap_or(true),
        created_by: caller.user.clone(),
    };

    let chain = state
        .api
        .create_chain(draft, &caller.audit())
        .await
        .map_err(|error| ApiError::application(error, &caller.correlation_id))?;
    Ok((StatusCode::CREATED, Json(chain)))
}

pub async fn list_chains(
    caller: Caller,
    State(state): State<ApiState>,
    Query(query): Query<ListChainsQuery>,
) -> Result<Json<Vec<ApprovalChain>>, ApiError> {
    state
        .api
        .list_chains(query.active_only)
        .await
        .map(Json)
        .map_err(|error| ApiError::application(error, &caller.correlation_id))
}

pub async fn update_chain(
    caller: Caller,
    State(state): State<ApiState>,
    Path(chain_id): Path<String>,
    Json(body): Json<UpdateChainBody>,
) -> Result<Json<ApprovalChain>, ApiError> {
    state
        .api
        .set_chain_active(&ChainId(chain_id), body.is_active, &caller.audit())
        .await
        .map(Json)
        .map_err(|error| ApiError::application(error, &caller.correlation_id))
}

pub async fn delete_chain(
    caller: Caller,
    State(state): State<ApiState>,
    Path(chain_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .api
        .delete_chain(&ChainId(chain_id), &caller.audit())
        .await
        .map_err(|error| ApiError::application(error, &caller.correlation_id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_request(
    caller: Caller,
    State(state): State<ApiState>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<ApprovalRequest>), ApiError> {
    let new_request = NewApprovalRequest {
        chain_id: body.chain_id,
        document_type: body.document_type,
        document_id: body.document_id,
        document_name: body.document_name,
        requested_by: caller.user.clone(),
    };

    let request = state
        .api
        .create_request(new_request, &caller.audit())
        .await
        .map_err(|error| ApiError::application(error, &caller.correlation_id))?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_requests(
    caller: Caller,
    State(state): State<ApiState>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<Json<Vec<ApprovalRequest>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(RequestStatus::parse(raw).ok_or_else(|| {
            ApiError::bad_filter(
                format!("unknown request status `{raw}`"),
                &caller.correlation_id,
            )
        })?),
        None => None,
    };
    let filter = RequestFilter {
        status,
        document_type: query.document_type.as_deref().map(DocumentType::parse),
        requested_by: query.requested_by,
    };

    state
        .api
        .list_requests(&filter)
        .await
        .map(Json)
        .map_err(|error| ApiError::application(error, &caller.correlation_id))
}

pub async fn get_request(
    caller: Caller,
    State(state): State<ApiState>,
    Path(request_id): Path<String>,
) -> Result<Json<RequestDetail>, ApiError> {
    state
        .api
        .get_request(&RequestId(request_id))
        .await
        .map(Json)
        .map_err(|error| ApiError::application(error, &caller.correlation_id))
}

pub async fn submit_action(
    caller: Caller,
    State(state): State<ApiState>,
    Path(request_id): Path<String>,
    Json(body): Json<SubmitActionBody>,
) -> Result<(StatusCode, Json<ApprovalAction>), ApiError> {
    let request_id = RequestId(request_id);
    let submission = ActionSubmission {
        request_id: request_id.clone(),
        step_order: body.step_order,
        approver_email: caller.user.clone(),
        action: body.action,
        comments: body.comments,
        delegated_to: body.delegated_to,
    };

    let action = state
        .api
        .submit_action(submission, &caller.audit_for(&request_id))
        .await
        .map_err(|error| ApiError::application(error, &caller.correlation_id))?;
    Ok((StatusCode::CREATED, Json(action)))
}

pub async fn cancel_request(
    caller: Caller,
    State(state): State<ApiState>,
    Path(request_id): Path<String>,
) -> Result<Json<ApprovalRequest>, ApiError> {
    let request_id = RequestId(request_id);
    state
        .api
        .cancel_request(&request_id, &caller.audit_for(&request_id))
        .await
        .map(Json)
        .map_err(|error| ApiError::application(error, &caller.correlation_id))
}

pub async fn list_notifications(
    caller: Caller,
    State(state): State<ApiState>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<Vec<ApprovalNotification>>, ApiError> {
    state
        .api
        .list_notifications(&caller.user, query.unread_only)
        .await
        .map(Json)
        .map_err(|error| ApiError::application(error, &caller.correlation_id))
}

pub async fn mark_notification_read(
    caller: Caller,
    State(state): State<ApiState>,
    Path(notification_id): Path<String>,
) -> Result<Json<ApprovalNotification>, ApiError> {
    state
        .api
        .mark_notification_read(&NotificationId(notification_id), &caller.audit())
        .await
        .map(Json)
        .map_err(|error| ApiError::application(error, &caller.correlation_id))
}
