// In-memory alert store
//
// One lock guards alerts, recipients and acknowledgments together, so every
// trait call is a single critical section, like a statement in Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerline_shared::{Alert, AlertAcknowledgment, AlertRecipient, AlertSeverity, AlertStatus};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{AlertFilter, AlertStore, BatchAck};
use crate::auth::rbac::Principal;
use crate::error::{StoreError, StoreResult};
use crate::pagination::{paginate, PaginationParams};

#[derive(Default)]
struct AlertTables {
    alerts: HashMap<Uuid, Alert>,
    recipients: Vec<AlertRecipient>,
    acknowledgments: Vec<AlertAcknowledgment>,
}

impl AlertTables {
    fn visible(&self, alert_id: Uuid, principal: &Principal) -> bool {
        self.alerts.contains_key(&alert_id)
            && self
                .recipients
                .iter()
                .any(|r| r.alert_id == alert_id && r.matches(principal.user_id, &principal.roles))
    }

    fn visible_unexpired<'a>(
        &'a self,
        principal: &'a Principal,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a Alert> + 'a {
        self.alerts
            .values()
            .filter(move |a| !a.is_expired(now) && self.visible(a.id, principal))
    }

    fn has_acknowledged(&self, alert_id: Uuid, user_id: Uuid) -> bool {
        self.acknowledgments
            .iter()
            .any(|a| a.alert_id == alert_id && a.acknowledged_by == user_id)
    }

    fn mark_acknowledged(&mut self, alert_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.alerts.get_mut(&alert_id) {
            Some(alert) if alert.status == AlertStatus::Active => {
                alert.status = AlertStatus::Acknowledged;
                alert.updated_at = now;
                true
            }
            _ => false,
        }
    }
}

#[derive(Default)]
pub struct MemoryAlertStore {
    tables: RwLock<AlertTables>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn insert_alert(&self, alert: &Alert) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.alerts.contains_key(&alert.id) {
            return Err(StoreError::UniqueViolation(format!("alert {} already exists", alert.id)));
        }
        tables.alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn insert_recipients(&self, recipients: &[AlertRecipient]) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let mut inserted = 0;
        for recipient in recipients {
            let exists = tables.recipients.iter().any(|r| {
                r.alert_id == recipient.alert_id
                    && r.recipient_kind == recipient.recipient_kind
                    && r.recipient_id == recipient.recipient_id
            });
            if !exists {
                tables.recipients.push(recipient.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Alert>> {
        Ok(self.tables.read().await.alerts.get(&id).cloned())
    }

    async fn acknowledgments(&self, alert_id: Uuid) -> StoreResult<Vec<AlertAcknowledgment>> {
        let mut acks: Vec<AlertAcknowledgment> = self
            .tables
            .read()
            .await
            .acknowledgments
            .iter()
            .filter(|a| a.alert_id == alert_id)
            .cloned()
            .collect();
        acks.sort_by_key(|a| a.acknowledged_at);
        Ok(acks)
    }

    async fn is_visible(&self, alert_id: Uuid, principal: &Principal) -> StoreResult<bool> {
        Ok(self.tables.read().await.visible(alert_id, principal))
    }

    async fn visible_ids(&self, ids: &[Uuid], principal: &Principal) -> StoreResult<Vec<Uuid>> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .copied()
            .filter(|id| tables.visible(*id, principal))
            .collect())
    }

    async fn visible_ids_in_status(
        &self,
        principal: &Principal,
        statuses: &[AlertStatus],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>> {
        let tables = self.tables.read().await;
        Ok(tables
            .visible_unexpired(principal, now)
            .filter(|a| statuses.contains(&a.status))
            .map(|a| a.id)
            .collect())
    }

    async fn list_visible(
        &self,
        principal: &Principal,
        filter: &AlertFilter,
        page: &PaginationParams,
        now: DateTime<Utc>,
    ) -> StoreResult<(Vec<Alert>, i64)> {
        let tables = self.tables.read().await;
        let mut alerts: Vec<Alert> = tables
            .visible_unexpired(principal, now)
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(alerts, page))
    }

    async fn acknowledge(&self, ack: &AlertAcknowledgment) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.has_acknowledged(ack.alert_id, ack.acknowledged_by) {
            return Err(StoreError::UniqueViolation(format!(
                "alert {} already acknowledged by {}",
                ack.alert_id, ack.acknowledged_by
            )));
        }
        tables.acknowledgments.push(ack.clone());
        tables.mark_acknowledged(ack.alert_id, ack.acknowledged_at);
        Ok(())
    }

    async fn acknowledge_batch(
        &self,
        ids: &[Uuid],
        user_id: Uuid,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<BatchAck> {
        let mut tables = self.tables.write().await;
        let mut outcome = BatchAck::default();

        for &alert_id in ids {
            if !tables.alerts.contains_key(&alert_id) {
                continue;
            }
            if !tables.has_acknowledged(alert_id, user_id) {
                tables.acknowledgments.push(AlertAcknowledgment {
                    id: Uuid::new_v4(),
                    alert_id,
                    acknowledged_by: user_id,
                    acknowledged_at: now,
                    notes: notes.map(str::to_string),
                });
                outcome.recorded += 1;
            }
            if tables.mark_acknowledged(alert_id, now) {
                outcome.updated += 1;
            }
        }
        Ok(outcome)
    }

    async fn set_status(
        &self,
        ids: &[Uuid],
        status: AlertStatus,
        from: &[AlertStatus],
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let mut updated = 0;
        for id in ids {
            if let Some(alert) = tables.alerts.get_mut(id) {
                if from.is_empty() || from.contains(&alert.status) {
                    alert.status = status;
                    alert.updated_at = now;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn resolve_related(
        &self,
        source_entity_id: &str,
        alert_type: &str,
        exclude: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.write().await;
        let mut resolved = 0;
        for alert in tables.alerts.values_mut() {
            if Some(alert.id) == exclude
                || alert.alert_type != alert_type
                || alert.source_entity_id.as_deref() != Some(source_entity_id)
                || !alert.status.is_open()
            {
                continue;
            }
            alert.status = AlertStatus::Resolved;
            alert.updated_at = now;
            resolved += 1;
        }
        Ok(resolved)
    }

    async fn count_visible_by_severity(
        &self,
        principal: &Principal,
        status: AlertStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(AlertSeverity, i64)>> {
        let tables = self.tables.read().await;
        let mut counts: BTreeMap<AlertSeverity, i64> = BTreeMap::new();
        for alert in tables
            .visible_unexpired(principal, now)
            .filter(|a| a.status == status)
        {
            *counts.entry(alert.severity).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}
