//! Role-based access helpers
//!
//! Role memberships are looked up on every request through a [`RoleDirectory`]
//! and never cached, so alert visibility and approval rights follow role
//! changes immediately.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// The acting user and their current role names.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(user_id: Uuid, roles: Vec<String>) -> Self {
        Self { user_id, roles }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }
}

/// Which roles count as administrative.
#[derive(Debug, Clone)]
pub struct AdminPolicy {
    admin_roles: Vec<String>,
}

impl AdminPolicy {
    pub fn new(admin_roles: Vec<String>) -> Self {
        Self { admin_roles }
    }

    pub fn is_admin(&self, principal: &Principal) -> bool {
        principal.has_any_role(&self.admin_roles)
    }
}

impl Default for AdminPolicy {
    fn default() -> Self {
        Self::new(vec!["admin".to_string()])
    }
}

/// Source of a user's current role names.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn roles_for(&self, user_id: Uuid) -> StoreResult<Vec<String>>;
}

pub struct PgRoleDirectory {
    pool: PgPool,
}

impl PgRoleDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleDirectory for PgRoleDirectory {
    async fn roles_for(&self, user_id: Uuid) -> StoreResult<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.name
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }
}

#[derive(Default)]
pub struct MemoryRoleDirectory {
    assignments: RwLock<HashMap<Uuid, Vec<String>>>,
}

impl MemoryRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn assign(&self, user_id: Uuid, role: &str) {
        let mut assignments = self.assignments.write().await;
        let roles = assignments.entry(user_id).or_default();
        if !roles.iter().any(|r| r == role) {
            roles.push(role.to_string());
            roles.sort();
        }
    }

    pub async fn revoke(&self, user_id: Uuid, role: &str) {
        if let Some(roles) = self.assignments.write().await.get_mut(&user_id) {
            roles.retain(|r| r != role);
        }
    }
}

#[async_trait]
impl RoleDirectory for MemoryRoleDirectory {
    async fn roles_for(&self, user_id: Uuid) -> StoreResult<Vec<String>> {
        Ok(self
            .assignments
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}
