// lookup_entity - Read-only filtered fetch with found/not_found/multiple branches

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{collaborator, store_failure};
use crate::error::{AutomationError, AutomationResult};
use crate::workflows::conditions::parse_conditions;
use crate::workflows::entity_store::EntityStore;
use crate::workflows::handler::{ensure_object, preview, ActionHandler, OutputPorts};
use crate::workflows::whitelist;
use crate::workflows::{ActionResult, ExecutionContext};

const TYPE: &str = "lookup_entity";

pub struct LookupEntityHandler {
    entities: Option<Arc<dyn EntityStore>>,
}

impl LookupEntityHandler {
    pub fn new(entities: Option<Arc<dyn EntityStore>>) -> Self {
        Self { entities }
    }
}

#[async_trait]
impl ActionHandler for LookupEntityHandler {
    fn action_type(&self) -> &'static str {
        TYPE
    }

    fn description(&self) -> &'static str {
        "Find a single row in a whitelisted table"
    }

    fn validate(&self, config: &Value) -> AutomationResult<()> {
        ensure_object(config)?;
        let table = whitelist::table_from_config(config, "table")?;
        let conditions = parse_conditions(config)?;
        if conditions.is_empty() {
            return Err(AutomationError::validation(
                "conditions",
                "at least one condition is required",
            ));
        }
        for (i, condition) in conditions.iter().enumerate() {
            condition.validate(table, i)?;
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
        let conditions = parse_conditions(config)?;

        // Two rows are enough to tell one match from several
        let mut rows = store
            .select(table, &conditions, 2)
            .await
            .map_err(|e| store_failure(TYPE, table, e))?;

        Ok(match rows.len() {
            0 => ActionResult::branch("not_found", Some(json!({ "table": table.name }))),
            1 => ActionResult::branch("found", rows.pop().map(Value::Object)),
            _ => ActionResult::branch(
                "multiple",
                Some(json!({ "table": table.name, "matches": rows })),
            ),
        })
    }

    fn output_ports(&self) -> Option<&dyn OutputPorts> {
        Some(self)
    }
}

impl OutputPorts for LookupEntityHandler {
    fn ports(&self) -> &'static [&'static str] {
        &["found", "not_found", "multiple", "failure"]
    }
}
