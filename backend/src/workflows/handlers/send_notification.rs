// send_notification - In-app notification to one or more users
//
// Delivery is per user. A failure for one user is logged and counted; the
// action only fails when nobody could be notified.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::{collaborator, is_templated, string_list};
use crate::error::{AutomationError, AutomationResult};
use crate::notifications::{NewNotification, NotificationSender};
use crate::workflows::handler::{ensure_object, optional_str, preview, required_str, ActionHandler};
use crate::workflows::{ActionResult, ExecutionContext};

const TYPE: &str = "send_notification";
const KINDS: &[&str] = &["info", "warning", "error", "success"];

pub struct SendNotificationHandler {
    sender: Option<Arc<dyn NotificationSender>>,
}

impl SendNotificationHandler {
    pub fn new(sender: Option<Arc<dyn NotificationSender>>) -> Self {
        Self { sender }
    }
}

/// `user_id` and `user_ids` are merged.
fn recipients(config: &Value) -> AutomationResult<Vec<String>> {
    let mut users = string_list(config, "user_id")?;
    users.extend(string_list(config, "user_ids")?);
    if users.is_empty() {
        return Err(AutomationError::validation(
            "user_ids",
            "at least one user is required",
        ));
    }
    for (i, user) in users.iter().enumerate() {
        if !is_templated(&Value::String(user.clone())) && Uuid::parse_str(user).is_err() {
            return Err(AutomationError::validation(
                format!("user_ids[{}]", i),
                format!("'{}' is not a user id", user),
            ));
        }
    }
    Ok(users)
}

#[async_trait]
impl ActionHandler for SendNotificationHandler {
    fn action_type(&self) -> &'static str {
        TYPE
    }

    fn description(&self) -> &'static str {
        "Notify users in the app"
    }

    fn validate(&self, config: &Value) -> AutomationResult<()> {
        ensure_object(config)?;
        recipients(config)?;
        required_str(config, "title")?;
        required_str(config, "message")?;
        if let Some(kind) = optional_str(config, "notification_type")? {
            if !KINDS.contains(&kind) {
                return Err(AutomationError::validation(
                    "notification_type",
                    format!("must be one of {}", KINDS.join(", ")),
                ));
            }
        }
        Ok(())
    }

    async fn execute(
        &self,
        config: &Value,
        context: &ExecutionContext,
    ) -> AutomationResult<ActionResult> {
        self.validate(config)?;
        if context.dry_run {
            return Ok(preview(TYPE, config));
        }

        let sender = collaborator(&self.sender, TYPE, "notification sender")?;
        let title = required_str(config, "title")?;
        let message = required_str(config, "message")?;
        let kind = optional_str(config, "notification_type")?.unwrap_or("info");

        let mut sent = Vec::new();
        let mut failed = 0usize;
        for user in recipients(config)? {
            // Templates may resolve to something other than a uuid
            let user_id = match Uuid::parse_str(&user) {
                Ok(id) => id,
                Err(_) => {
                    warn!(user = %user, "Skipping notification for invalid user id");
                    failed += 1;
                    continue;
                }
            };

            let notification = NewNotification::new(user_id, title, message)
                .kind(kind)
                .about(&context.entity_name, &context.entity_id);
            match sender.send(&notification).await {
                Ok(id) => sent.push(id),
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Failed to deliver notification");
                    failed += 1;
                }
            }
        }

        if sent.is_empty() {
            return Err(AutomationError::execution(
                TYPE,
                "notifications",
                format!("no notification delivered ({} failed)", failed),
            ));
        }
        Ok(ActionResult::success(Some(json!({
            "sent": sent.len(),
            "failed": failed,
            "notification_ids": sent
        }))))
    }
}
