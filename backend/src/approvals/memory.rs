// In-memory approval store
//
// The write lock is held across the pending check and the status change, which
// gives the same check-and-set the Postgres predicate provides.

use async_trait::async_trait;
use ledgerline_shared::{ApprovalRequest, ApprovalStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{ApprovalFilter, ApprovalStore, Resolution};
use crate::error::{StoreError, StoreResult};
use crate::pagination::{paginate, PaginationParams};

#[derive(Default)]
pub struct MemoryApprovalStore {
    requests: RwLock<HashMap<Uuid, ApprovalRequest>>,
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalStore for MemoryApprovalStore {
    async fn insert(&self, request: &ApprovalRequest) -> StoreResult<()> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id) {
            return Err(StoreError::UniqueViolation(format!(
                "approval request {} already exists",
                request.id
            )));
        }
        requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<ApprovalRequest>> {
        Ok(self.requests.read().await.get(&id).cloned())
    }

    async fn resolve_if_pending(
        &self,
        id: Uuid,
        resolution: &Resolution,
    ) -> StoreResult<Option<ApprovalRequest>> {
        let mut requests = self.requests.write().await;
        match requests.get_mut(&id) {
            Some(request) if request.status == ApprovalStatus::Pending => {
                request.status = resolution.status;
                request.resolved_by = resolution.resolved_by;
                request.resolution_reason = resolution.reason.clone();
                request.resolved_at = Some(resolution.resolved_at);
                Ok(Some(request.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list(
        &self,
        filter: &ApprovalFilter,
        page: &PaginationParams,
    ) -> StoreResult<(Vec<ApprovalRequest>, i64)> {
        let mut matching: Vec<ApprovalRequest> = self
            .requests
            .read()
            .await
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(matching, page))
    }
}
