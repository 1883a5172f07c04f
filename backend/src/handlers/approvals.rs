use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use ledgerline_shared::{ApprovalRequest, ApprovalStatus};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::approvals::{ApprovalFilter, Decision};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::AppState;

pub fn approval_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_approvals))
        .route("/:id", get(get_approval))
        .route("/:id/resolve", post(resolve_approval))
}

#[derive(Debug, Deserialize)]
pub struct ListApprovalsQuery {
    pub status: Option<ApprovalStatus>,
    /// Only requests naming the caller as an approver
    pub mine: Option<bool>,
    pub execution_id: Option<Uuid>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResolveApprovalRequest {
    pub decision: Decision,
    #[validate(length(max = 2000, message = "must be at most 2000 characters"))]
    pub reason: Option<String>,
}

/// Administrators see every request; everyone else only those naming them.
async fn list_approvals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListApprovalsQuery>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<PaginatedResponse<ApprovalRequest>>> {
    let scoped = query.mine.unwrap_or(false) || !state.admin.is_admin(&principal);
    let filter = ApprovalFilter {
        status: query.status,
        approver: scoped.then_some(principal.user_id),
        execution_id: query.execution_id,
    };
    let params = PaginationParams::new(query.page, query.limit);

    let (data, total) = state.approvals.list(&filter, &params).await?;
    Ok(Json(PaginatedResponse::new(data, &params, total)))
}

async fn get_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    AuthUser(principal): AuthUser,
) -> ApiResult<Json<ApprovalRequest>> {
    state.approvals.authorize(id, &principal).await?;
    Ok(Json(state.approvals.get(id).await?))
}

async fn resolve_approval(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    AuthUser(principal): AuthUser,
    Json(request): Json<ResolveApprovalRequest>,
) -> ApiResult<Json<ApprovalRequest>> {
    request.validate()?;

    let resolved = state
        .approvals
        .resolve_as(id, &principal, request.decision, request.reason)
        .await?;
    Ok(Json(resolved))
}
