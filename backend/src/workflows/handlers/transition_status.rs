// transition_status - Move a row's status along an allowed edge
//
// The write is predicated on the current status still being one of `from`,
// so a concurrent transition shows up as `invalid_transition`, never as a
// silent overwrite.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::{collaborator, store_failure, string_list, target_id};
use crate::error::{AutomationError, AutomationResult};
use crate::workflows::conditions::FieldCondition;
use crate::workflows::entity_store::EntityStore;
use crate::workflows::handler::{
    ensure_object, preview, required_str, ActionHandler, DeclaresModifications,
    EntityModification, ManualExecution, ModificationKind, OutputPorts,
};
use crate::workflows::whitelist::{self, TableSpec};
use crate::workflows::{ActionResult, ExecutionContext};

const TYPE: &str = "transition_status";

pub struct TransitionStatusHandler {
    entities: Option<Arc<dyn EntityStore>>,
}

impl TransitionStatusHandler {
    pub fn new(entities: Option<Arc<dyn EntityStore>>) -> Self {
        Self { entities }
    }
}

fn status_column(table: &TableSpec) -> AutomationResult<&'static str> {
    table.status_column.ok_or_else(|| {
        AutomationError::validation("table", format!("'{}' has no status column", table.name))
    })
}

#[async_trait]
impl ActionHandler for TransitionStatusHandler {
    fn action_type(&self) -> &'static str {
        TYPE
    }

    fn description(&self) -> &'static str {
        "Change an entity's status if it is in an allowed source status"
    }

    fn validate(&self, config: &Value) -> AutomationResult<()> {
        ensure_object(config)?;
        let table = whitelist::table_from_config(config, "table")?;
        status_column(table)?;

        let from = string_list(config, "from")?;
        if from.is_empty() {
            return Err(AutomationError::validation(
                "from",
                "at least one source status is required",
            ));
        }
        let to = required_str(config, "to")?;
        if from.iter().any(|s| s == to) {
            return Err(AutomationError::validation(
                "to",
                "target status is also a source status",
            ));
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

        let store = collaborator(&self.entities, TYPE, "entity store")?;
        let table = whitelist::table_from_config(config, "table")?;
        let column = status_column(table)?;
        let from = string_list(config, "from")?;
        let to = required_str(config, "to")?;
        let id = target_id(config, context)?;

        let by_id = FieldCondition::equals(table.primary_key, Value::String(id.clone()));
        let current = store
            .select(table, std::slice::from_ref(&by_id), 1)
            .await
            .map_err(|e| store_failure(TYPE, table, e))?
            .pop()
            .ok_or_else(|| {
                AutomationError::execution(TYPE, table.name, format!("row '{}' not found", id))
            })?
            .get(column)
            .cloned()
            .unwrap_or(Value::Null);

        let current_text = current.as_str().map(str::to_string);
        if !current_text.as_ref().is_some_and(|c| from.contains(c)) {
            return Ok(ActionResult::branch(
                "invalid_transition",
                Some(json!({ "id": id, "current": current, "to": to, "allowed_from": from })),
            ));
        }

        let filters = [
            by_id,
            FieldCondition::in_list(
                column,
                from.iter().map(|s| Value::String(s.clone())).collect(),
            ),
        ];
        let mut assignments = BTreeMap::new();
        assignments.insert(column.to_string(), Value::String(to.to_string()));

        let updated = store
            .update(table, &assignments, &filters)
            .await
            .map_err(|e| store_failure(TYPE, table, e))?;
        if updated == 0 {
            // Status moved between the read and the guarded write
            return Ok(ActionResult::branch(
                "invalid_transition",
                Some(json!({ "id": id, "current": current, "to": to, "allowed_from": from })),
            ));
        }

        info!(table = table.name, id = %id, from = ?current_text, to, "Status transitioned");
        Ok(ActionResult::success(Some(json!({ "id": id, "from": current, "to": to }))))
    }

    fn manual_execution(&self) -> Option<&dyn ManualExecution> {
        Some(self)
    }

    fn output_ports(&self) -> Option<&dyn OutputPorts> {
        Some(self)
    }

    fn entity_modifications(&self) -> Option<&dyn DeclaresModifications> {
        Some(self)
    }
}

impl ManualExecution for TransitionStatusHandler {
    fn manual_parameters(&self) -> &'static [&'static str] {
        &["to"]
    }
}

impl OutputPorts for TransitionStatusHandler {
    fn ports(&self) -> &'static [&'static str] {
        &["success", "invalid_transition", "failure"]
    }
}

impl DeclaresModifications for TransitionStatusHandler {
    fn modifications(&self, config: &Value) -> Vec<EntityModification> {
        whitelist::table_from_config(config, "table")
            .ok()
            .and_then(|table| {
                table.status_column.map(|column| EntityModification {
                    table: table.name.to_string(),
                    fields: vec![column.to_string()],
                    kind: ModificationKind::Update,
                })
            })
            .into_iter()
            .collect()
    }
}
