// Built-in action handlers
//
// Handlers hold their collaborators as `Option<Arc<_>>`. Validation never
// reads them; execution outside dry run fails with an execution error when
// the one it needs is missing.

pub mod allocate_inventory;
pub mod create_alert;
pub mod create_entity;
pub mod lookup_entity;
pub mod seek_approval;
pub mod send_email;
pub mod send_notification;
pub mod transition_status;
pub mod update_field;

use serde_json::Value;
use std::sync::Arc;

pub use allocate_inventory::{
    AllocateInventoryHandler, AllocationLine, AllocationOutcome, AllocationPriority,
    AllocationRequest, AllocationStrategy, InventoryAllocator,
};
pub use create_alert::CreateAlertHandler;
pub use create_entity::CreateEntityHandler;
pub use lookup_entity::LookupEntityHandler;
pub use seek_approval::SeekApprovalHandler;
pub use send_email::SendEmailHandler;
pub use send_notification::SendNotificationHandler;
pub use transition_status::TransitionStatusHandler;
pub use update_field::UpdateFieldHandler;

use super::entity_store::EntityStore;
use super::registry::ActionRegistry;
use super::whitelist::TableSpec;
use super::ExecutionContext;
use crate::alerts::AlertEngine;
use crate::approvals::ApprovalService;
use crate::error::{AutomationError, AutomationResult, StoreError};
use crate::notifications::NotificationSender;
use crate::services::email::EmailSender;

/// Everything the built-in handlers may talk to. Unset members are fine for
/// validation-only registries.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub entities: Option<Arc<dyn EntityStore>>,
    pub email: Option<Arc<dyn EmailSender>>,
    pub notifications: Option<Arc<dyn NotificationSender>>,
    pub alerts: Option<Arc<AlertEngine>>,
    pub approvals: Option<Arc<ApprovalService>>,
    pub allocator: Option<Arc<dyn InventoryAllocator>>,
}

/// Registry with every built-in handler wired to `collaborators`.
pub fn builtin_registry(collaborators: &Collaborators) -> ActionRegistry {
    let c = collaborators.clone();
    ActionRegistry::new()
        .with(UpdateFieldHandler::new(c.entities.clone()))
        .with(CreateEntityHandler::new(c.entities.clone()))
        .with(LookupEntityHandler::new(c.entities.clone()))
        .with(TransitionStatusHandler::new(c.entities))
        .with(SendEmailHandler::new(c.email))
        .with(SendNotificationHandler::new(c.notifications))
        .with(CreateAlertHandler::new(c.alerts))
        .with(SeekApprovalHandler::new(c.approvals))
        .with(AllocateInventoryHandler::new(c.allocator))
}

/// Registry for offline validation and the action catalog.
pub fn validation_registry() -> ActionRegistry {
    builtin_registry(&Collaborators::default())
}

pub(crate) fn collaborator<'a, T: ?Sized>(
    slot: &'a Option<Arc<T>>,
    handler: &str,
    name: &str,
) -> AutomationResult<&'a T> {
    slot.as_deref()
        .ok_or_else(|| AutomationError::execution(handler, name, "collaborator not configured"))
}

pub(crate) fn store_failure(handler: &str, table: &TableSpec, err: StoreError) -> AutomationError {
    AutomationError::execution(handler, table.name, err)
}

/// A string still carrying a placeholder. Its type is only known after resolution.
pub(crate) fn is_templated(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.contains("{{"))
}

/// Check a value fits a whitelisted column, unless it is still a template.
pub(crate) fn check_column_value(
    table: &TableSpec,
    column: &str,
    value: &Value,
    field: &str,
) -> AutomationResult<()> {
    let ty = table.column(column).map_err(|_| {
        AutomationError::validation(
            field,
            format!("column '{}' is not whitelisted on '{}'", column, table.name),
        )
    })?;
    if !is_templated(value) && !ty.accepts(value) {
        return Err(AutomationError::validation(
            field,
            format!("value is not a valid {}", ty.sql_type()),
        ));
    }
    Ok(())
}

/// Target row id: `entity_id` from the config, else the triggering entity.
pub(crate) fn target_id(config: &Value, context: &ExecutionContext) -> AutomationResult<String> {
    let id = match config.get("entity_id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        None | Some(Value::Null) => context.entity_id.clone(),
        Some(_) => {
            return Err(AutomationError::validation(
                "entity_id",
                "must be a string or number",
            ));
        }
    };
    if id.trim().is_empty() {
        return Err(AutomationError::validation("entity_id", "no target entity"));
    }
    Ok(id)
}

/// Accept a single string or a list of strings.
pub(crate) fn string_list(config: &Value, key: &str) -> AutomationResult<Vec<String>> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    AutomationError::validation(format!("{}[{}]", key, i), "must be a string")
                })
            })
            .collect(),
        Some(_) => Err(AutomationError::validation(
            key,
            "must be a string or a list of strings",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::whitelist;
    use serde_json::json;

    #[test]
    fn test_builtin_registry_covers_all_types() {
        let registry = validation_registry();
        for action_type in [
            "update_field",
            "create_entity",
            "lookup_entity",
            "transition_status",
            "send_email",
            "send_notification",
            "create_alert",
            "seek_approval",
            "allocate_inventory",
        ] {
            assert!(registry.contains(action_type), "{} missing", action_type);
        }
        assert_eq!(registry.len(), 9);
    }

    fn valid_configs() -> Vec<(&'static str, Value)> {
        let user = uuid::Uuid::new_v4().to_string();
        vec![
            ("update_field", json!({"table": "products", "field": "status", "value": "low_stock"})),
            ("create_entity", json!({"table": "customers", "fields": {"name": "Acme"}})),
            (
                "lookup_entity",
                json!({"table": "suppliers", "conditions": [{"field": "code", "operator": "equals", "value": "ACME"}]}),
            ),
            ("transition_status", json!({"table": "purchase_orders", "from": ["draft"], "to": "submitted"})),
            ("send_email", json!({"to": "ops@example.com", "subject": "Shipped", "body": "On its way"})),
            ("send_notification", json!({"user_ids": [user.clone()], "title": "Heads up", "message": "Check stock"})),
            (
                "create_alert",
                json!({"alert_type": "low_stock", "title": "Low", "recipients": {"roles": ["ops"]}}),
            ),
            ("seek_approval", json!({"approvers": [user]})),
            ("allocate_inventory", json!({"lines": [{"product_id": "p-1", "quantity": 2}], "strategy": "fefo"})),
        ]
    }

    #[tokio::test]
    async fn test_every_handler_runs_dry_without_collaborators() {
        let registry = validation_registry();
        let configs = valid_configs();
        assert_eq!(configs.len(), registry.len());

        for (action_type, config) in configs {
            let handler = registry.get(action_type).unwrap();
            assert!(handler.validate(&config).is_ok(), "{} rejected its config", action_type);

            let dry = ExecutionContext::new("orders", "ord-1", "updated").dry_run();
            let result = handler.execute(&config, &dry).await.unwrap();
            assert!(result.success, "{}", action_type);
            let output = result.output.unwrap();
            assert_eq!(output["dry_run"], true, "{}", action_type);
            assert_eq!(output["action_type"], action_type);

            let live = ExecutionContext::new("orders", "ord-1", "updated");
            match handler.execute(&config, &live).await {
                Err(AutomationError::Execution { handler: failed, message, .. }) => {
                    assert_eq!(failed, action_type);
                    assert!(message.contains("not configured"), "{}: {}", action_type, message);
                }
                other => panic!("{}: expected execution error, got {:?}", action_type, other),
            }
        }
    }

    #[test]
    fn test_check_column_value_skips_templates() {
        let products = whitelist::table("products").unwrap();
        assert!(check_column_value(products, "reorder_level", &json!("{{new_level}}"), "value").is_ok());
        assert!(check_column_value(products, "reorder_level", &json!("ten"), "value").is_err());
        assert!(check_column_value(products, "password", &json!("x"), "field").is_err());
    }

    #[test]
    fn test_target_id_defaults_to_context() {
        let ctx = ExecutionContext::new("orders", "ord-7", "updated");
        assert_eq!(target_id(&json!({}), &ctx).unwrap(), "ord-7");
        assert_eq!(target_id(&json!({"entity_id": 42}), &ctx).unwrap(), "42");
        let empty = ExecutionContext::new("orders", "", "updated");
        assert!(target_id(&json!({}), &empty).is_err());
    }

    #[test]
    fn test_string_list() {
        assert_eq!(string_list(&json!({"to": "a@x.io"}), "to").unwrap(), vec!["a@x.io"]);
        assert_eq!(string_list(&json!({"to": ["a", "b"]}), "to").unwrap().len(), 2);
        assert!(string_list(&json!({"to": [1]}), "to").is_err());
    }
}
