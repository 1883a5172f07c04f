// create_entity - Insert one row from a templated field map

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{check_column_value, collaborator, store_failure};
use crate::error::{AutomationError, AutomationResult};
use crate::workflows::entity_store::EntityStore;
use crate::workflows::handler::{
    ensure_object, preview, ActionHandler, DeclaresModifications, EntityModification,
    ModificationKind, OutputPorts,
};
use crate::workflows::whitelist::{self, IdGeneration};
use crate::workflows::{ActionResult, ExecutionContext};

const TYPE: &str = "create_entity";

pub struct CreateEntityHandler {
    entities: Option<Arc<dyn EntityStore>>,
}

impl CreateEntityHandler {
    pub fn new(entities: Option<Arc<dyn EntityStore>>) -> Self {
        Self { entities }
    }
}

fn fields(config: &Value) -> AutomationResult<&Map<String, Value>> {
    match config.get("fields") {
        Some(Value::Object(map)) if !map.is_empty() => Ok(map),
        Some(Value::Object(_)) => Err(AutomationError::validation(
            "fields",
            "at least one field is required",
        )),
        None | Some(Value::Null) => Err(AutomationError::validation("fields", "is required")),
        Some(_) => Err(AutomationError::validation("fields", "must be an object")),
    }
}

#[async_trait]
impl ActionHandler for CreateEntityHandler {
    fn action_type(&self) -> &'static str {
        TYPE
    }

    fn description(&self) -> &'static str {
        "Insert a row into a whitelisted table"
    }

    fn validate(&self, config: &Value) -> AutomationResult<()> {
        ensure_object(config)?;
        let table = whitelist::table_from_config(config, "table")?;
        for (column, value) in fields(config)? {
            check_column_value(table, column, value, &format!("fields.{}", column))?;
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

        // BTreeMap keeps column order, and so the generated statement, stable
        let mut values: BTreeMap<String, Value> = fields(config)?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if table.id_generation == IdGeneration::Uuid {
            let pk = values
                .entry(table.primary_key.to_string())
                .or_insert(Value::Null);
            if pk.is_null() {
                *pk = Value::String(Uuid::new_v4().to_string());
            }
        }

        let record = store
            .insert(table, &values)
            .await
            .map_err(|e| store_failure(TYPE, table, e))?;
        let id = record.get(table.primary_key).cloned().unwrap_or(Value::Null);
        info!(table = table.name, id = %id, "Entity created");

        Ok(ActionResult::success(Some(json!({
            "table": table.name,
            "id": id,
            "record": record
        }))))
    }

    fn output_ports(&self) -> Option<&dyn OutputPorts> {
        Some(self)
    }

    fn entity_modifications(&self) -> Option<&dyn DeclaresModifications> {
        Some(self)
    }
}

impl OutputPorts for CreateEntityHandler {
    fn ports(&self) -> &'static [&'static str] {
        &["success", "failure"]
    }
}

impl DeclaresModifications for CreateEntityHandler {
    fn modifications(&self, config: &Value) -> Vec<EntityModification> {
        match (whitelist::table_from_config(config, "table"), fields(config)) {
            (Ok(table), Ok(map)) => {
                let mut columns: Vec<String> = map.keys().cloned().collect();
                columns.sort();
                vec![EntityModification {
                    table: table.name.to_string(),
                    fields: columns,
                    kind: ModificationKind::Insert,
                }]
            }
            _ => Vec::new(),
        }
    }
}
