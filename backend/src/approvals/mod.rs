// Approval Requests - Human approval state machine for suspended rule executions
//
// A request starts `pending` and leaves it exactly once, through the store's
// guarded write. Human decisions go through `resolve`; the durable engine's
// own timers go through `expire`. Only human decisions call back into the
// durable engine.

pub mod bridge;
pub mod memory;
pub mod store;

use async_trait::async_trait;
use chrono::Utc;
use ledgerline_shared::{ApprovalRequest, ApprovalStatus, ApprovalType};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub use bridge::{ActivityCompletion, AsyncCompleter, HttpCompleter};
pub use memory::MemoryApprovalStore;
pub use store::{ApprovalFilter, ApprovalStore, PgApprovalStore, Resolution};

use crate::auth::rbac::{AdminPolicy, Principal};
use crate::error::{AuthorizationKind, AutomationError, AutomationResult, ConflictKind};
use crate::pagination::PaginationParams;

/// Human decision on a pending request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn status(&self) -> ApprovalStatus {
        match self {
            Self::Approved => ApprovalStatus::Approved,
            Self::Rejected => ApprovalStatus::Rejected,
        }
    }
}

/// Input for a new approval request
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub execution_id: Uuid,
    pub rule_id: Option<Uuid>,
    pub action_name: String,
    pub approvers: Vec<Uuid>,
    pub approval_type: ApprovalType,
    pub timeout_hours: Option<i32>,
    pub resume_token: Option<String>,
    pub message: Option<String>,
}

/// Authorization oracle: is `principal` an approver of this request?
#[async_trait]
pub trait ApprovalAuthorizer: Send + Sync {
    async fn is_approver(&self, approval_id: Uuid, principal: Uuid) -> AutomationResult<bool>;
}

/// Answers from the approver set stored with the request.
pub struct StoredApproverSet {
    store: Arc<dyn ApprovalStore>,
}

impl StoredApproverSet {
    pub fn new(store: Arc<dyn ApprovalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ApprovalAuthorizer for StoredApproverSet {
    async fn is_approver(&self, approval_id: Uuid, principal: Uuid) -> AutomationResult<bool> {
        let request = self
            .store
            .get(approval_id)
            .await?
            .ok_or_else(|| AutomationError::approval_not_found(approval_id))?;
        Ok(request.has_approver(principal))
    }
}

pub struct ApprovalService {
    store: Arc<dyn ApprovalStore>,
    authorizer: Arc<dyn ApprovalAuthorizer>,
    admin: AdminPolicy,
    completer: Option<Arc<dyn AsyncCompleter>>,
}

impl ApprovalService {
    pub fn new(store: Arc<dyn ApprovalStore>, admin: AdminPolicy) -> Self {
        Self {
            authorizer: Arc::new(StoredApproverSet::new(store.clone())),
            store,
            admin,
            completer: None,
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn ApprovalAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_completer(mut self, completer: Arc<dyn AsyncCompleter>) -> Self {
        self.completer = Some(completer);
        self
    }

    pub async fn create(&self, new: NewApproval) -> AutomationResult<ApprovalRequest> {
        if new.action_name.trim().is_empty() {
            return Err(AutomationError::validation("action_name", "is required"));
        }
        if new.approvers.is_empty() {
            return Err(AutomationError::validation(
                "approvers",
                "at least one approver is required",
            ));
        }
        if new.timeout_hours.is_some_and(|h| h <= 0) {
            return Err(AutomationError::validation(
                "timeout_hours",
                "must be a positive number of hours",
            ));
        }

        let mut seen = HashSet::new();
        let mut approvers = new.approvers;
        approvers.retain(|a| seen.insert(*a));

        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            execution_id: new.execution_id,
            rule_id: new.rule_id,
            action_name: new.action_name,
            approvers,
            approval_type: new.approval_type,
            status: ApprovalStatus::Pending,
            timeout_hours: new.timeout_hours,
            resume_token: new.resume_token,
            message: new.message,
            resolved_by: None,
            resolution_reason: None,
            created_at: Utc::now(),
            resolved_at: None,
        };

        self.store.insert(&request).await?;
        info!(
            approval_id = %request.id,
            execution_id = %request.execution_id,
            approvers = request.approvers.len(),
            "Approval request created"
        );
        Ok(request)
    }

    pub async fn get(&self, id: Uuid) -> AutomationResult<ApprovalRequest> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AutomationError::approval_not_found(id))
    }

    pub async fn list(
        &self,
        filter: &ApprovalFilter,
        page: &PaginationParams,
    ) -> AutomationResult<(Vec<ApprovalRequest>, i64)> {
        Ok(self.store.list(filter, page).await?)
    }

    /// Approvers and administrators may attempt a resolution.
    pub async fn authorize(&self, id: Uuid, principal: &Principal) -> AutomationResult<()> {
        if self.admin.is_admin(principal) {
            // Still surface unknown ids as not found
            self.get(id).await?;
            return Ok(());
        }
        if self.authorizer.is_approver(id, principal.user_id).await? {
            Ok(())
        } else {
            warn!(approval_id = %id, user_id = %principal.user_id, "Resolution attempt by non-approver");
            Err(AutomationError::Authorization(AuthorizationKind::NotAnApprover))
        }
    }

    /// Authorize, then resolve.
    pub async fn resolve_as(
        &self,
        id: Uuid,
        principal: &Principal,
        decision: Decision,
        reason: Option<String>,
    ) -> AutomationResult<ApprovalRequest> {
        self.authorize(id, principal).await?;
        self.resolve(id, principal.user_id, decision, reason).await
    }

    /// Record a human decision. At most one call per request succeeds.
    pub async fn resolve(
        &self,
        id: Uuid,
        resolved_by: Uuid,
        decision: Decision,
        reason: Option<String>,
    ) -> AutomationResult<ApprovalRequest> {
        let resolution = Resolution {
            status: decision.status(),
            resolved_by: Some(resolved_by),
            reason,
            resolved_at: Utc::now(),
        };

        let request = self.guarded_write(id, &resolution).await?;
        info!(
            approval_id = %id,
            resolved_by = %resolved_by,
            status = %request.status,
            "Approval request resolved"
        );

        self.complete_activity(&request).await;
        Ok(request)
    }

    /// Apply an engine-induced terminal status (`timed_out` or `expired`).
    /// Goes through the same pending guard as human decisions, so a timeout
    /// racing a late decision still yields exactly one resolution.
    pub async fn expire(
        &self,
        id: Uuid,
        status: ApprovalStatus,
        reason: Option<String>,
    ) -> AutomationResult<ApprovalRequest> {
        if !matches!(status, ApprovalStatus::TimedOut | ApprovalStatus::Expired) {
            return Err(AutomationError::validation(
                "status",
                format!("'{}' is not an expiry status", status),
            ));
        }

        let resolution = Resolution {
            status,
            resolved_by: None,
            reason,
            resolved_at: Utc::now(),
        };

        let request = self.guarded_write(id, &resolution).await?;
        info!(approval_id = %id, status = %status, "Approval request expired by engine");
        Ok(request)
    }

    async fn guarded_write(
        &self,
        id: Uuid,
        resolution: &Resolution,
    ) -> AutomationResult<ApprovalRequest> {
        match self.store.resolve_if_pending(id, resolution).await? {
            Some(request) => Ok(request),
            None => match self.store.get(id).await? {
                None => Err(AutomationError::approval_not_found(id)),
                Some(current) => Err(AutomationError::Conflict(ConflictKind::AlreadyResolved {
                    status: current.status,
                })),
            },
        }
    }

    /// Best effort: the resolution is already committed, a failure here is
    /// only logged and left for reconciliation.
    async fn complete_activity(&self, request: &ApprovalRequest) {
        let (Some(token), Some(completer)) = (&request.resume_token, &self.completer) else {
            return;
        };

        let completion = ActivityCompletion {
            action_name: request.action_name.clone(),
            result: json!({
                "approval_id": request.id,
                "decision": request.status,
                "resolved_by": request.resolved_by,
                "reason": request.resolution_reason,
            }),
            success: request.status == ApprovalStatus::Approved,
        };

        if let Err(e) = completer.complete(token, &completion).await {
            error!(
                approval_id = %request.id,
                execution_id = %request.execution_id,
                error = %e,
                "Failed to complete durable activity; approval stays resolved"
            );
        }
    }
}
