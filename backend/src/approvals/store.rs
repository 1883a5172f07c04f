//! Approval request persistence.
//!
//! `resolve_if_pending` is the single conditional write every status change
//! goes through. Whatever the backend, it must check `status = pending` and
//! apply the new status atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerline_shared::{ApprovalRequest, ApprovalStatus, ApprovalType};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::pagination::{PaginationParams, QueryBuilder};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApprovalFilter {
    pub status: Option<ApprovalStatus>,
    /// Only requests listing this user among their approvers
    pub approver: Option<Uuid>,
    pub execution_id: Option<Uuid>,
}

impl ApprovalFilter {
    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        self.status.is_none_or(|s| request.status == s)
            && self.approver.is_none_or(|u| request.has_approver(u))
            && self.execution_id.is_none_or(|e| request.execution_id == e)
    }
}

/// Terminal state applied by the guarded write.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub status: ApprovalStatus,
    pub resolved_by: Option<Uuid>,
    pub reason: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert(&self, request: &ApprovalRequest) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<ApprovalRequest>>;

    /// Apply `resolution` only if the request is still pending.
    /// `None` means no row matched: unknown id or already resolved.
    async fn resolve_if_pending(
        &self,
        id: Uuid,
        resolution: &Resolution,
    ) -> StoreResult<Option<ApprovalRequest>>;

    /// Newest first.
    async fn list(
        &self,
        filter: &ApprovalFilter,
        page: &PaginationParams,
    ) -> StoreResult<(Vec<ApprovalRequest>, i64)>;
}

// ===== Postgres =====

const COLUMNS: &str = "id, execution_id, rule_id, action_name, approvers, approval_type, status, \
     timeout_hours, resume_token, message, resolved_by, resolution_reason, created_at, resolved_at";

#[derive(Debug, sqlx::FromRow)]
struct ApprovalRow {
    id: Uuid,
    execution_id: Uuid,
    rule_id: Option<Uuid>,
    action_name: String,
    approvers: Vec<Uuid>,
    approval_type: String,
    status: String,
    timeout_hours: Option<i32>,
    resume_token: Option<String>,
    message: Option<String>,
    resolved_by: Option<Uuid>,
    resolution_reason: Option<String>,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<ApprovalRow> for ApprovalRequest {
    type Error = StoreError;

    fn try_from(row: ApprovalRow) -> Result<Self, Self::Error> {
        Ok(ApprovalRequest {
            id: row.id,
            execution_id: row.execution_id,
            rule_id: row.rule_id,
            action_name: row.action_name,
            approvers: row.approvers,
            approval_type: row
                .approval_type
                .parse::<ApprovalType>()
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            status: row
                .status
                .parse::<ApprovalStatus>()
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            timeout_hours: row.timeout_hours,
            resume_token: row.resume_token,
            message: row.message,
            resolved_by: row.resolved_by,
            resolution_reason: row.resolution_reason,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

#[derive(Clone)]
pub struct PgApprovalStore {
    pool: PgPool,
}

impl PgApprovalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApprovalStore for PgApprovalStore {
    async fn insert(&self, request: &ApprovalRequest) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO approval_requests (
                id, execution_id, rule_id, action_name, approvers, approval_type, status,
                timeout_hours, resume_token, message, resolved_by, resolution_reason,
                created_at, resolved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(request.id)
        .bind(request.execution_id)
        .bind(request.rule_id)
        .bind(&request.action_name)
        .bind(&request.approvers)
        .bind(request.approval_type.as_str())
        .bind(request.status.as_str())
        .bind(request.timeout_hours)
        .bind(&request.resume_token)
        .bind(&request.message)
        .bind(request.resolved_by)
        .bind(&request.resolution_reason)
        .bind(request.created_at)
        .bind(request.resolved_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<ApprovalRequest>> {
        let sql = format!("SELECT {} FROM approval_requests WHERE id = $1", COLUMNS);
        sqlx::query_as::<_, ApprovalRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?
            .map(ApprovalRequest::try_from)
            .transpose()
    }

    async fn resolve_if_pending(
        &self,
        id: Uuid,
        resolution: &Resolution,
    ) -> StoreResult<Option<ApprovalRequest>> {
        let sql = format!(
            r#"
            UPDATE approval_requests
            SET status = $2, resolved_by = $3, resolution_reason = $4, resolved_at = $5
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            COLUMNS
        );

        sqlx::query_as::<_, ApprovalRow>(&sql)
            .bind(id)
            .bind(resolution.status.as_str())
            .bind(resolution.resolved_by)
            .bind(&resolution.reason)
            .bind(resolution.resolved_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?
            .map(ApprovalRequest::try_from)
            .transpose()
    }

    async fn list(
        &self,
        filter: &ApprovalFilter,
        page: &PaginationParams,
    ) -> StoreResult<(Vec<ApprovalRequest>, i64)> {
        let mut qb = QueryBuilder::new();
        if filter.status.is_some() {
            qb.add_condition("status = {}");
        }
        if filter.approver.is_some() {
            qb.add_condition("{} = ANY(approvers)");
        }
        if filter.execution_id.is_some() {
            qb.add_condition("execution_id = {}");
        }
        let where_clause = qb.where_clause();

        let count_sql = format!("SELECT COUNT(*) FROM approval_requests {}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(status) = filter.status {
            count_query = count_query.bind(status.as_str());
        }
        if let Some(approver) = filter.approver {
            count_query = count_query.bind(approver);
        }
        if let Some(execution_id) = filter.execution_id {
            count_query = count_query.bind(execution_id);
        }
        let total = count_query
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        let limit_param = qb.next_param();
        let offset_param = qb.next_param();
        let sql = format!(
            "SELECT {} FROM approval_requests {} ORDER BY created_at DESC, id LIMIT ${} OFFSET ${}",
            COLUMNS, where_clause, limit_param, offset_param
        );
        let mut query = sqlx::query_as::<_, ApprovalRow>(&sql);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(approver) = filter.approver {
            query = query.bind(approver);
        }
        if let Some(execution_id) = filter.execution_id {
            query = query.bind(execution_id);
        }
        let rows = query
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        let requests = rows
            .into_iter()
            .map(ApprovalRequest::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((requests, total))
    }
}
