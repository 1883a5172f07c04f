//! Alert persistence.
//!
//! Visibility is always evaluated against the caller's role set passed in with
//! the query. Acknowledgment uniqueness comes from the `(alert_id,
//! acknowledged_by)` constraint, surfaced as [`StoreError::UniqueViolation`].
//! Batch operations are one statement each.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerline_shared::{
    Alert, AlertAcknowledgment, AlertRecipient, AlertSeverity, AlertStatus,
};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::rbac::Principal;
use crate::error::{StoreError, StoreResult};
use crate::pagination::PaginationParams;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub severity: Option<AlertSeverity>,
    pub alert_type: Option<String>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.status.is_none_or(|s| alert.status == s)
            && self.severity.is_none_or(|s| alert.severity == s)
            && self
                .alert_type
                .as_deref()
                .is_none_or(|t| alert.alert_type == t)
    }
}

/// Rows touched by a batch acknowledgment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchAck {
    /// New acknowledgment rows; repeats by the same user are skipped
    pub recorded: u64,
    /// Alerts moved from active to acknowledged
    pub updated: u64,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: &Alert) -> StoreResult<()>;

    /// Insert recipients, silently skipping `(alert, kind, id)` pairs that exist.
    /// Returns how many were new.
    async fn insert_recipients(&self, recipients: &[AlertRecipient]) -> StoreResult<u64>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Alert>>;

    async fn acknowledgments(&self, alert_id: Uuid) -> StoreResult<Vec<AlertAcknowledgment>>;

    async fn is_visible(&self, alert_id: Uuid, principal: &Principal) -> StoreResult<bool>;

    /// The subset of `ids` the principal may act on.
    async fn visible_ids(&self, ids: &[Uuid], principal: &Principal) -> StoreResult<Vec<Uuid>>;

    /// Unexpired visible alerts currently in one of `statuses`.
    async fn visible_ids_in_status(
        &self,
        principal: &Principal,
        statuses: &[AlertStatus],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>>;

    /// Unexpired visible alerts, newest first.
    async fn list_visible(
        &self,
        principal: &Principal,
        filter: &AlertFilter,
        page: &PaginationParams,
        now: DateTime<Utc>,
    ) -> StoreResult<(Vec<Alert>, i64)>;

    /// Record one acknowledgment and move the alert from active to acknowledged.
    async fn acknowledge(&self, ack: &AlertAcknowledgment) -> StoreResult<()>;

    async fn acknowledge_batch(
        &self,
        ids: &[Uuid],
        user_id: Uuid,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<BatchAck>;

    /// Set `status` on `ids`. Restricted to alerts in `from` when non-empty.
    async fn set_status(
        &self,
        ids: &[Uuid],
        status: AlertStatus,
        from: &[AlertStatus],
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Resolve open alerts on the dedup key, except `exclude`.
    async fn resolve_related(
        &self,
        source_entity_id: &str,
        alert_type: &str,
        exclude: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn count_visible_by_severity(
        &self,
        principal: &Principal,
        status: AlertStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(AlertSeverity, i64)>>;
}

// ===== Postgres =====

const ALERT_COLUMNS: &str = "a.id, a.alert_type, a.severity, a.title, a.message, a.context, \
     a.source_entity_name, a.source_entity_id, a.source_rule_id, a.status, a.expires_at, \
     a.created_at, a.updated_at";

/// Visibility predicate over alias `a`. `$1` is the user id as text, `$2` the role names.
const VISIBLE_TO_CALLER: &str = r#"EXISTS (
        SELECT 1 FROM alert_recipients r
        WHERE r.alert_id = a.id
          AND ((r.recipient_kind = 'user' AND r.recipient_id = $1)
            OR (r.recipient_kind = 'role' AND r.recipient_id = ANY($2)))
    )"#;

#[derive(Debug, sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    alert_type: String,
    severity: String,
    title: String,
    message: String,
    context: serde_json::Value,
    source_entity_name: Option<String>,
    source_entity_id: Option<String>,
    source_rule_id: Option<Uuid>,
    status: String,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StoreError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(Alert {
            id: row.id,
            alert_type: row.alert_type,
            severity: row
                .severity
                .parse::<AlertSeverity>()
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            title: row.title,
            message: row.message,
            context: row.context,
            source_entity_name: row.source_entity_name,
            source_entity_id: row.source_entity_id,
            source_rule_id: row.source_rule_id,
            status: row
                .status
                .parse::<AlertStatus>()
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn status_strings(statuses: &[AlertStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[derive(Clone)]
pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn insert_alert(&self, alert: &Alert) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, alert_type, severity, title, message, context, source_entity_name,
                source_entity_id, source_rule_id, status, expires_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(alert.id)
        .bind(&alert.alert_type)
        .bind(alert.severity.as_str())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(&alert.context)
        .bind(&alert.source_entity_name)
        .bind(&alert.source_entity_id)
        .bind(alert.source_rule_id)
        .bind(alert.status.as_str())
        .bind(alert.expires_at)
        .bind(alert.created_at)
        .bind(alert.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn insert_recipients(&self, recipients: &[AlertRecipient]) -> StoreResult<u64> {
        if recipients.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = recipients.iter().map(|r| r.id).collect();
        let alert_ids: Vec<Uuid> = recipients.iter().map(|r| r.alert_id).collect();
        let kinds: Vec<String> = recipients
            .iter()
            .map(|r| r.recipient_kind.as_str().to_string())
            .collect();
        let recipient_ids: Vec<String> = recipients.iter().map(|r| r.recipient_id.clone()).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO alert_recipients (id, alert_id, recipient_kind, recipient_id)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::text[], $4::text[])
            ON CONFLICT (alert_id, recipient_kind, recipient_id) DO NOTHING
            "#,
        )
        .bind(&ids)
        .bind(&alert_ids)
        .bind(&kinds)
        .bind(&recipient_ids)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Alert>> {
        let sql = format!("SELECT {} FROM alerts a WHERE a.id = $1", ALERT_COLUMNS);
        sqlx::query_as::<_, AlertRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?
            .map(Alert::try_from)
            .transpose()
    }

    async fn acknowledgments(&self, alert_id: Uuid) -> StoreResult<Vec<AlertAcknowledgment>> {
        sqlx::query_as::<_, AlertAcknowledgment>(
            r#"
            SELECT id, alert_id, acknowledged_by, acknowledged_at, notes
            FROM alert_acknowledgments
            WHERE alert_id = $1
            ORDER BY acknowledged_at
            "#,
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)
    }

    async fn is_visible(&self, alert_id: Uuid, principal: &Principal) -> StoreResult<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM alerts a WHERE a.id = $3 AND {})",
            VISIBLE_TO_CALLER
        );
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(principal.user_id.to_string())
            .bind(&principal.roles)
            .bind(alert_id)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn visible_ids(&self, ids: &[Uuid], principal: &Principal) -> StoreResult<Vec<Uuid>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT a.id FROM alerts a WHERE a.id = ANY($3) AND {}",
            VISIBLE_TO_CALLER
        );
        sqlx::query_scalar::<_, Uuid>(&sql)
            .bind(principal.user_id.to_string())
            .bind(&principal.roles)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn visible_ids_in_status(
        &self,
        principal: &Principal,
        statuses: &[AlertStatus],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<Uuid>> {
        let sql = format!(
            r#"
            SELECT a.id FROM alerts a
            WHERE a.status = ANY($3)
              AND (a.expires_at IS NULL OR a.expires_at > $4)
              AND {}
            "#,
            VISIBLE_TO_CALLER
        );
        sqlx::query_scalar::<_, Uuid>(&sql)
            .bind(principal.user_id.to_string())
            .bind(&principal.roles)
            .bind(status_strings(statuses))
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn list_visible(
        &self,
        principal: &Principal,
        filter: &AlertFilter,
        page: &PaginationParams,
        now: DateTime<Utc>,
    ) -> StoreResult<(Vec<Alert>, i64)> {
        let mut qb = crate::pagination::QueryBuilder::with_start_param(3);
        qb.add_static("(a.expires_at IS NULL OR a.expires_at > $3)");
        qb.add_static(VISIBLE_TO_CALLER);
        if filter.status.is_some() {
            qb.add_condition("a.status = {}");
        }
        if filter.severity.is_some() {
            qb.add_condition("a.severity = {}");
        }
        if filter.alert_type.is_some() {
            qb.add_condition("a.alert_type = {}");
        }
        let where_clause = qb.where_clause();

        let count_sql = format!("SELECT COUNT(*) FROM alerts a {}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql)
            .bind(principal.user_id.to_string())
            .bind(&principal.roles)
            .bind(now);
        if let Some(status) = filter.status {
            count_query = count_query.bind(status.as_str());
        }
        if let Some(severity) = filter.severity {
            count_query = count_query.bind(severity.as_str());
        }
        if let Some(alert_type) = &filter.alert_type {
            count_query = count_query.bind(alert_type);
        }
        let total = count_query
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        let limit_param = qb.next_param();
        let offset_param = qb.next_param();
        let sql = format!(
            "SELECT {} FROM alerts a {} ORDER BY a.created_at DESC, a.id LIMIT ${} OFFSET ${}",
            ALERT_COLUMNS, where_clause, limit_param, offset_param
        );
        let mut query = sqlx::query_as::<_, AlertRow>(&sql)
            .bind(principal.user_id.to_string())
            .bind(&principal.roles)
            .bind(now);
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(severity) = filter.severity {
            query = query.bind(severity.as_str());
        }
        if let Some(alert_type) = &filter.alert_type {
            query = query.bind(alert_type);
        }
        let rows = query
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        let alerts = rows
            .into_iter()
            .map(Alert::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((alerts, total))
    }

    async fn acknowledge(&self, ack: &AlertAcknowledgment) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        sqlx::query(
            r#"
            INSERT INTO alert_acknowledgments (id, alert_id, acknowledged_by, acknowledged_at, notes)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(ack.id)
        .bind(ack.alert_id)
        .bind(ack.acknowledged_by)
        .bind(ack.acknowledged_at)
        .bind(&ack.notes)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        sqlx::query(
            "UPDATE alerts SET status = 'acknowledged', updated_at = $2 WHERE id = $1 AND status = 'active'",
        )
        .bind(ack.alert_id)
        .bind(ack.acknowledged_at)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        tx.commit().await.map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn acknowledge_batch(
        &self,
        ids: &[Uuid],
        user_id: Uuid,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<BatchAck> {
        if ids.is_empty() {
            return Ok(BatchAck::default());
        }

        let (recorded, updated): (i64, i64) = sqlx::query_as(
            r#"
            WITH ins AS (
                INSERT INTO alert_acknowledgments (id, alert_id, acknowledged_by, acknowledged_at, notes)
                SELECT gen_random_uuid(), t.id, $2, $3, $4 FROM UNNEST($1::uuid[]) AS t(id)
                ON CONFLICT (alert_id, acknowledged_by) DO NOTHING
                RETURNING alert_id
            ),
            upd AS (
                UPDATE alerts SET status = 'acknowledged', updated_at = $3
                WHERE id = ANY($1) AND status = 'active'
                RETURNING id
            )
            SELECT (SELECT COUNT(*) FROM ins), (SELECT COUNT(*) FROM upd)
            "#,
        )
        .bind(ids)
        .bind(user_id)
        .bind(now)
        .bind(notes)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(BatchAck {
            recorded: recorded as u64,
            updated: updated as u64,
        })
    }

    async fn set_status(
        &self,
        ids: &[Uuid],
        status: AlertStatus,
        from: &[AlertStatus],
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE alerts SET status = $2, updated_at = $3
            WHERE id = ANY($1) AND (cardinality($4::text[]) = 0 OR status = ANY($4))
            "#,
        )
        .bind(ids)
        .bind(status.as_str())
        .bind(now)
        .bind(status_strings(from))
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(result.rows_affected())
    }

    async fn resolve_related(
        &self,
        source_entity_id: &str,
        alert_type: &str,
        exclude: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE alerts SET status = 'resolved', updated_at = $4
            WHERE source_entity_id = $1
              AND alert_type = $2
              AND status IN ('active', 'acknowledged')
              AND ($3::uuid IS NULL OR id <> $3)
            "#,
        )
        .bind(source_entity_id)
        .bind(alert_type)
        .bind(exclude)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(result.rows_affected())
    }

    async fn count_visible_by_severity(
        &self,
        principal: &Principal,
        status: AlertStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(AlertSeverity, i64)>> {
        let sql = format!(
            r#"
            SELECT a.severity, COUNT(*) FROM alerts a
            WHERE a.status = $3
              AND (a.expires_at IS NULL OR a.expires_at > $4)
              AND {}
            GROUP BY a.severity
            "#,
            VISIBLE_TO_CALLER
        );
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql)
            .bind(principal.user_id.to_string())
            .bind(&principal.roles)
            .bind(status.as_str())
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        rows.into_iter()
            .map(|(severity, count)| {
                severity
                    .parse::<AlertSeverity>()
                    .map(|s| (s, count))
                    .map_err(|e| StoreError::Backend(e.to_string()))
            })
            .collect()
    }
}
