// Alert Engine - Alert lifecycle, recipient visibility and supersession
//
// Visibility is recomputed from recipient rows and the caller's current roles
// on every call. Bulk operations first narrow the requested ids to what the
// caller can see, then apply one batched write.

pub mod memory;
pub mod store;

use chrono::{DateTime, Utc};
use ledgerline_shared::{
    Alert, AlertAcknowledgment, AlertRecipient, AlertSeverity, AlertStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use memory::MemoryAlertStore;
pub use store::{AlertFilter, AlertStore, BatchAck, PgAlertStore};

use crate::auth::rbac::Principal;
use crate::error::{
    AuthorizationKind, AutomationError, AutomationResult, ConflictKind, StoreError,
};
use crate::pagination::PaginationParams;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RecipientSpec {
    User(Uuid),
    Role(String),
}

impl RecipientSpec {
    fn into_recipient(self, alert_id: Uuid) -> AlertRecipient {
        match self {
            Self::User(user_id) => AlertRecipient::user(alert_id, user_id),
            Self::Role(role) => AlertRecipient::role(alert_id, role),
        }
    }
}

/// Input for a new alert
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub context: Value,
    pub source_entity_name: Option<String>,
    pub source_entity_id: Option<String>,
    pub source_rule_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub recipients: Vec<RecipientSpec>,
    /// Resolve older open alerts sharing the dedup key
    pub supersede_related: bool,
}

impl NewAlert {
    pub fn new(alert_type: &str, severity: AlertSeverity, title: &str) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            severity,
            title: title.to_string(),
            message: String::new(),
            context: Value::Object(Default::default()),
            source_entity_name: None,
            source_entity_id: None,
            source_rule_id: None,
            expires_at: None,
            recipients: Vec::new(),
            supersede_related: true,
        }
    }

    pub fn message(mut self, message: &str) -> Self {
        self.message = message.to_string();
        self
    }

    pub fn source(mut self, entity_name: &str, entity_id: &str) -> Self {
        self.source_entity_name = Some(entity_name.to_string());
        self.source_entity_id = Some(entity_id.to_string());
        self
    }

    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.recipients.push(RecipientSpec::User(user_id));
        self
    }

    pub fn for_role(mut self, role: &str) -> Self {
        self.recipients.push(RecipientSpec::Role(role.to_string()));
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn keep_related(mut self) -> Self {
        self.supersede_related = false;
        self
    }
}

/// Result of a bulk acknowledge/dismiss.
/// `acted + skipped == requested` for every call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    /// Distinct ids in the request
    pub requested: usize,
    /// Ids the caller could act on
    pub acted: usize,
    /// Ids the caller cannot see or that do not exist
    pub skipped: usize,
    /// Alerts whose status changed
    pub updated: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeveritySummary {
    pub counts: BTreeMap<AlertSeverity, i64>,
    pub total: i64,
}

pub struct AlertEngine {
    store: Arc<dyn AlertStore>,
}

fn dedup_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

impl AlertEngine {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, new: NewAlert) -> AutomationResult<Alert> {
        if new.alert_type.trim().is_empty() {
            return Err(AutomationError::validation("alert_type", "is required"));
        }
        if new.title.trim().is_empty() {
            return Err(AutomationError::validation("title", "is required"));
        }
        if new.recipients.is_empty() {
            return Err(AutomationError::validation(
                "recipients",
                "at least one user or role is required",
            ));
        }

        let now = Utc::now();
        let alert = Alert {
            id: Uuid::new_v4(),
            alert_type: new.alert_type,
            severity: new.severity,
            title: new.title,
            message: new.message,
            context: new.context,
            source_entity_name: new.source_entity_name,
            source_entity_id: new.source_entity_id,
            source_rule_id: new.source_rule_id,
            status: AlertStatus::Active,
            expires_at: new.expires_at,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_alert(&alert).await?;
        self.add_recipients(alert.id, new.recipients).await?;
        info!(
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "Alert created"
        );

        if new.supersede_related {
            if let Some(source_id) = alert.source_entity_id.as_deref() {
                // Best effort: the new alert is already stored
                if let Err(e) = self
                    .resolve_related_alerts(source_id, &alert.alert_type, Some(alert.id))
                    .await
                {
                    warn!(alert_id = %alert.id, error = %e, "Failed to resolve related alerts");
                }
            }
        }

        Ok(alert)
    }

    /// Add recipients to an existing alert. Pairs already present are skipped.
    pub async fn add_recipients(
        &self,
        alert_id: Uuid,
        recipients: Vec<RecipientSpec>,
    ) -> AutomationResult<u64> {
        let rows: Vec<AlertRecipient> = recipients
            .into_iter()
            .map(|r| r.into_recipient(alert_id))
            .collect();
        let inserted = self.store.insert_recipients(&rows).await?;
        debug!(alert_id = %alert_id, requested = rows.len(), inserted, "Alert recipients added");
        Ok(inserted)
    }

    /// Fetch one alert the caller can see.
    pub async fn get(&self, id: Uuid, principal: &Principal) -> AutomationResult<Alert> {
        let alert = self.require(id).await?;
        self.ensure_visible(id, principal).await?;
        Ok(alert)
    }

    pub async fn acknowledgments(
        &self,
        id: Uuid,
        principal: &Principal,
    ) -> AutomationResult<Vec<AlertAcknowledgment>> {
        self.get(id, principal).await?;
        Ok(self.store.acknowledgments(id).await?)
    }

    pub async fn list(
        &self,
        principal: &Principal,
        filter: &AlertFilter,
        page: &PaginationParams,
    ) -> AutomationResult<(Vec<Alert>, i64)> {
        Ok(self
            .store
            .list_visible(principal, filter, page, Utc::now())
            .await?)
    }

    pub async fn acknowledge(
        &self,
        id: Uuid,
        principal: &Principal,
        notes: Option<String>,
    ) -> AutomationResult<Alert> {
        self.require(id).await?;
        self.ensure_visible(id, principal).await?;

        let ack = AlertAcknowledgment {
            id: Uuid::new_v4(),
            alert_id: id,
            acknowledged_by: principal.user_id,
            acknowledged_at: Utc::now(),
            notes,
        };

        match self.store.acknowledge(&ack).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(_)) => {
                return Err(AutomationError::Conflict(ConflictKind::AlreadyAcknowledged));
            }
            Err(e) => return Err(e.into()),
        }

        info!(alert_id = %id, user_id = %principal.user_id, "Alert acknowledged");
        self.require(id).await
    }

    pub async fn dismiss(&self, id: Uuid, principal: &Principal) -> AutomationResult<Alert> {
        self.require(id).await?;
        self.ensure_visible(id, principal).await?;

        self.store
            .set_status(&[id], AlertStatus::Dismissed, &[], Utc::now())
            .await?;
        info!(alert_id = %id, user_id = %principal.user_id, "Alert dismissed");
        self.require(id).await
    }

    pub async fn acknowledge_selected(
        &self,
        ids: &[Uuid],
        principal: &Principal,
        notes: Option<&str>,
    ) -> AutomationResult<BulkOutcome> {
        let requested = dedup_ids(ids);
        let permitted = self.store.visible_ids(&requested, principal).await?;
        let mut outcome = self.outcome(requested.len(), permitted.len());

        if !permitted.is_empty() {
            let batch = self
                .store
                .acknowledge_batch(&permitted, principal.user_id, notes, Utc::now())
                .await?;
            outcome.updated = batch.updated;
        }

        info!(
            user_id = %principal.user_id,
            requested = outcome.requested,
            acted = outcome.acted,
            skipped = outcome.skipped,
            "Alerts acknowledged"
        );
        Ok(outcome)
    }

    pub async fn dismiss_selected(
        &self,
        ids: &[Uuid],
        principal: &Principal,
    ) -> AutomationResult<BulkOutcome> {
        let requested = dedup_ids(ids);
        let permitted = self.store.visible_ids(&requested, principal).await?;
        let mut outcome = self.outcome(requested.len(), permitted.len());

        if !permitted.is_empty() {
            outcome.updated = self
                .store
                .set_status(&permitted, AlertStatus::Dismissed, &[], Utc::now())
                .await?;
        }

        info!(
            user_id = %principal.user_id,
            requested = outcome.requested,
            acted = outcome.acted,
            skipped = outcome.skipped,
            "Alerts dismissed"
        );
        Ok(outcome)
    }

    /// Acknowledge every active, unexpired alert the caller can currently see.
    pub async fn acknowledge_all(
        &self,
        principal: &Principal,
        notes: Option<&str>,
    ) -> AutomationResult<BulkOutcome> {
        let now = Utc::now();
        let ids = self
            .store
            .visible_ids_in_status(principal, &[AlertStatus::Active], now)
            .await?;
        self.acknowledge_selected(&ids, principal, notes).await
    }

    /// Dismiss every open, unexpired alert the caller can currently see.
    pub async fn dismiss_all(&self, principal: &Principal) -> AutomationResult<BulkOutcome> {
        let now = Utc::now();
        let ids = self
            .store
            .visible_ids_in_status(
                principal,
                &[AlertStatus::Active, AlertStatus::Acknowledged],
                now,
            )
            .await?;
        self.dismiss_selected(&ids, principal).await
    }

    /// Resolve open alerts on `(source_entity_id, alert_type)` other than
    /// `exclude`. Does nothing when either key part is empty.
    pub async fn resolve_related_alerts(
        &self,
        source_entity_id: &str,
        alert_type: &str,
        exclude: Option<Uuid>,
    ) -> AutomationResult<u64> {
        if source_entity_id.trim().is_empty() || alert_type.trim().is_empty() {
            return Ok(0);
        }

        let resolved = self
            .store
            .resolve_related(source_entity_id, alert_type, exclude, Utc::now())
            .await?;
        if resolved > 0 {
            info!(
                source_entity_id,
                alert_type,
                resolved,
                "Resolved superseded alerts"
            );
        }
        Ok(resolved)
    }

    /// Active alerts visible to the caller, by severity.
    pub async fn count_mine_by_severity(
        &self,
        principal: &Principal,
    ) -> AutomationResult<SeveritySummary> {
        let rows = self
            .store
            .count_visible_by_severity(principal, AlertStatus::Active, Utc::now())
            .await?;

        let mut summary = SeveritySummary::default();
        for severity in AlertSeverity::all() {
            summary.counts.insert(*severity, 0);
        }
        for (severity, count) in rows {
            summary.counts.insert(severity, count);
            summary.total += count;
        }
        Ok(summary)
    }

    fn outcome(&self, requested: usize, acted: usize) -> BulkOutcome {
        BulkOutcome {
            requested,
            acted,
            skipped: requested - acted,
            updated: 0,
        }
    }

    async fn require(&self, id: Uuid) -> AutomationResult<Alert> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AutomationError::alert_not_found(id))
    }

    async fn ensure_visible(&self, id: Uuid, principal: &Principal) -> AutomationResult<()> {
        if self.store.is_visible(id, principal).await? {
            Ok(())
        } else {
            Err(AutomationError::Authorization(AuthorizationKind::NotARecipient))
        }
    }
}
