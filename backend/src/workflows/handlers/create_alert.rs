// create_alert - Raise an alert for users and roles
//
// The triggering entity is the alert's source, so creating an alert also
// resolves older open alerts of the same type on that entity unless
// `supersede_related` is false.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ledgerline_shared::AlertSeverity;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::{collaborator, is_templated, string_list};
use crate::alerts::{AlertEngine, NewAlert, RecipientSpec};
use crate::error::{AutomationError, AutomationResult};
use crate::workflows::handler::{
    ensure_object, optional_str, preview, required_str, ActionHandler, ManualExecution,
};
use crate::workflows::{ActionResult, ExecutionContext};

const TYPE: &str = "create_alert";

pub struct CreateAlertHandler {
    alerts: Option<Arc<AlertEngine>>,
}

impl CreateAlertHandler {
    pub fn new(alerts: Option<Arc<AlertEngine>>) -> Self {
        Self { alerts }
    }
}

fn severity(config: &Value) -> AutomationResult<AlertSeverity> {
    let raw = optional_str(config, "severity")?.unwrap_or("info");
    raw.parse::<AlertSeverity>()
        .map_err(|e| AutomationError::validation("severity", e.to_string()))
}

fn recipients(config: &Value) -> AutomationResult<Vec<RecipientSpec>> {
    let raw = match config.get("recipients") {
        Some(raw @ Value::Object(_)) => raw,
        None | Some(Value::Null) => {
            return Err(AutomationError::validation("recipients", "is required"));
        }
        Some(_) => return Err(AutomationError::validation("recipients", "must be an object")),
    };

    let mut specs = Vec::new();
    for (i, user) in string_list(raw, "users")?.into_iter().enumerate() {
        match Uuid::parse_str(&user) {
            Ok(id) => specs.push(RecipientSpec::User(id)),
            // Resolved at execution time
            Err(_) if is_templated(&Value::String(user.clone())) => {}
            Err(_) => {
                return Err(AutomationError::validation(
                    format!("recipients.users[{}]", i),
                    format!("'{}' is not a user id", user),
                ));
            }
        }
    }
    for role in string_list(raw, "roles")? {
        if !role.trim().is_empty() {
            specs.push(RecipientSpec::Role(role));
        }
    }
    Ok(specs)
}

/// Ten years
const MAX_EXPIRY_HOURS: i64 = 87_600;

fn expires_in_hours(config: &Value) -> AutomationResult<Option<i64>> {
    match config.get("expires_in_hours") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_i64() {
            Some(h) if h > MAX_EXPIRY_HOURS => Err(AutomationError::validation(
                "expires_in_hours",
                format!("must be at most {}", MAX_EXPIRY_HOURS),
            )),
            Some(h) if h > 0 => Ok(Some(h)),
            _ => Err(AutomationError::validation(
                "expires_in_hours",
                "must be a positive whole number",
            )),
        },
    }
}

fn expiry_from_now(hours: i64) -> AutomationResult<DateTime<Utc>> {
    Duration::try_hours(hours)
        .and_then(|d| Utc::now().checked_add_signed(d))
        .ok_or_else(|| AutomationError::validation("expires_in_hours", "is out of range"))
}

#[async_trait]
impl ActionHandler for CreateAlertHandler {
    fn action_type(&self) -> &'static str {
        TYPE
    }

    fn description(&self) -> &'static str {
        "Raise an alert for users and roles"
    }

    fn validate(&self, config: &Value) -> AutomationResult<()> {
        ensure_object(config)?;
        required_str(config, "alert_type")?;
        required_str(config, "title")?;
        optional_str(config, "message")?;
        severity(config)?;
        expires_in_hours(config)?;

        let raw = config.get("recipients").cloned().unwrap_or(Value::Null);
        let declared = string_list(&raw, "users").map(|u| u.len()).unwrap_or(0)
            + string_list(&raw, "roles").map(|r| r.len()).unwrap_or(0);
        recipients(config)?;
        if declared == 0 {
            return Err(AutomationError::validation(
                "recipients",
                "at least one user or role is required",
            ));
        }
        match config.get("supersede_related") {
            None | Some(Value::Null) | Some(Value::Bool(_)) => Ok(()),
            Some(_) => Err(AutomationError::validation(
                "supersede_related",
                "must be a boolean",
            )),
        }
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

        let engine = collaborator(&self.alerts, TYPE, "alert engine")?;
        let mut new = NewAlert::new(
            required_str(config, "alert_type")?,
            severity(config)?,
            required_str(config, "title")?,
        )
        .message(optional_str(config, "message")?.unwrap_or_default());

        if !context.entity_id.is_empty() {
            new = new.source(&context.entity_name, &context.entity_id);
        }
        new.source_rule_id = context.rule_id;
        new.recipients = recipients(config)?;
        new.context = json!({
            "execution_id": context.execution_id,
            "event_type": context.event_type,
            "details": config.get("context").cloned().unwrap_or(Value::Null)
        });
        if let Some(hours) = expires_in_hours(config)? {
            new = new.expires_at(expiry_from_now(hours)?);
        }
        if config.get("supersede_related") == Some(&Value::Bool(false)) {
            new = new.keep_related();
        }

        let alert = engine.create(new).await?;
        Ok(ActionResult::success(Some(json!({
            "alert_id": alert.id,
            "severity": alert.severity,
            "status": alert.status
        }))))
    }

    fn manual_execution(&self) -> Option<&dyn ManualExecution> {
        Some(self)
    }
}

impl ManualExecution for CreateAlertHandler {
    fn manual_parameters(&self) -> &'static [&'static str] {
        &["title", "message", "severity"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::MemoryAlertStore;
    use crate::auth::rbac::Principal;
    use ledgerline_shared::AlertStatus;

    fn config(title: &str) -> Value {
        json!({
            "alert_type": "low_stock",
            "severity": "warning",
            "title": title,
            "recipients": {"roles": ["inventory_manager"]}
        })
    }

    #[test]
    fn test_validate() {
        let handler = CreateAlertHandler::new(None);
        assert!(handler.validate(&config("Low")).is_ok());

        let mut bad = config("Low");
        bad["severity"] = json!("apocalyptic");
        assert!(handler.validate(&bad).unwrap_err().to_string().contains("severity"));

        let mut nobody = config("Low");
        nobody["recipients"] = json!({"roles": []});
        assert!(handler.validate(&nobody).is_err());

        let mut templated = config("Low");
        templated["recipients"] = json!({"users": ["{{entity.owner_id}}"]});
        assert!(handler.validate(&templated).is_ok());
    }

    #[tokio::test]
    async fn test_oversized_expiry_is_rejected_not_panicking() {
        let engine = Arc::new(AlertEngine::new(Arc::new(MemoryAlertStore::new())));
        let handler = CreateAlertHandler::new(Some(engine));
        let ctx = ExecutionContext::new("products", "P1", "updated");

        let mut huge = config("Forever");
        huge["expires_in_hours"] = json!(1_000_000_000_000i64);
        let err = handler.validate(&huge).unwrap_err();
        assert!(err.to_string().contains("expires_in_hours"));
        assert!(matches!(
            handler.execute(&huge, &ctx).await,
            Err(AutomationError::Validation { .. })
        ));

        let mut capped = config("Ten years");
        capped["expires_in_hours"] = json!(MAX_EXPIRY_HOURS);
        let result = handler.execute(&capped, &ctx).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_new_alert_supersedes_previous_on_same_entity() {
        let engine = Arc::new(AlertEngine::new(Arc::new(MemoryAlertStore::new())));
        let handler = CreateAlertHandler::new(Some(engine.clone()));
        let ctx = ExecutionContext::new("products", "P1", "updated");
        let manager = Principal::new(Uuid::new_v4(), vec!["inventory_manager".to_string()]);

        let first = handler.execute(&config("Stock 4"), &ctx).await.unwrap();
        let first_id: Uuid =
            serde_json::from_value(first.output.unwrap()["alert_id"].clone()).unwrap();
        handler.execute(&config("Stock 2"), &ctx).await.unwrap();

        let previous = engine.get(first_id, &manager).await.unwrap();
        assert_eq!(previous.status, AlertStatus::Resolved);
        assert_eq!(previous.source_entity_id.as_deref(), Some("P1"));
    }
}
