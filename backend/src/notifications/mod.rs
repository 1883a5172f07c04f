// In-app notifications raised by workflow actions
//
// Notifications are rows in the `notifications` table, one per user.

use async_trait::async_trait;
use chrono::Utc;
use ledgerline_shared::Notification;
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub notification_type: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

impl NewNotification {
    pub fn new(user_id: Uuid, title: &str, message: &str) -> Self {
        Self {
            user_id,
            title: title.to_string(),
            message: message.to_string(),
            notification_type: "info".to_string(),
            entity_type: None,
            entity_id: None,
        }
    }

    pub fn kind(mut self, notification_type: &str) -> Self {
        self.notification_type = notification_type.to_string();
        self
    }

    pub fn about(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.to_string());
        self
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &NewNotification) -> StoreResult<Uuid>;
}

pub struct PgNotificationSender {
    pool: PgPool,
}

impl PgNotificationSender {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationSender for PgNotificationSender {
    async fn send(&self, notification: &NewNotification) -> StoreResult<Uuid> {
        let notification_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, user_id, title, message, notification_type,
                entity_type, entity_id, read, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, false, NOW())
            "#,
        )
        .bind(notification_id)
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.notification_type)
        .bind(&notification.entity_type)
        .bind(&notification.entity_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        debug!(notification_id = %notification_id, user_id = %notification.user_id, "Notification stored");
        Ok(notification_id)
    }
}

#[derive(Default)]
pub struct MemoryNotificationSender {
    sent: RwLock<Vec<Notification>>,
}

impl MemoryNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn for_user(&self, user_id: Uuid) -> Vec<Notification> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationSender for MemoryNotificationSender {
    async fn send(&self, notification: &NewNotification) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        self.sent.write().await.push(Notification {
            id,
            user_id: notification.user_id,
            title: notification.title.clone(),
            message: notification.message.clone(),
            notification_type: notification.notification_type.clone(),
            entity_type: notification.entity_type.clone(),
            entity_id: notification.entity_id.clone(),
            read: false,
            created_at: Utc::now(),
        });
        Ok(id)
    }
}
