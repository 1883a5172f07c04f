// update_field - Set one column on the rows matching a predicate set
//
// Config:
//   table, field, value           target and new value
//   conditions                    optional predicates; default is the target row by id
//   entity_id                     optional target id, default the triggering entity
//   foreign_key                   optional {table, match_field, create_if_missing, defaults}
//                                 resolves `value` as a natural key to that table's id

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{check_column_value, collaborator, is_templated, store_failure, target_id};
use crate::error::{AutomationError, AutomationResult};
use crate::workflows::conditions::{parse_conditions, value_text, FieldCondition};
use crate::workflows::entity_store::EntityStore;
use crate::workflows::handler::{
    ensure_object, optional_bool, preview, required_str, required_value, ActionHandler,
    DeclaresModifications, EntityModification, ManualExecution, ModificationKind, OutputPorts,
};
use crate::workflows::whitelist::{self, IdGeneration, TableSpec};
use crate::workflows::{ActionResult, ExecutionContext};

const TYPE: &str = "update_field";

pub struct UpdateFieldHandler {
    entities: Option<Arc<dyn EntityStore>>,
}

struct ForeignKey {
    table: &'static TableSpec,
    match_field: String,
    create_if_missing: bool,
    defaults: BTreeMap<String, Value>,
}

impl UpdateFieldHandler {
    pub fn new(entities: Option<Arc<dyn EntityStore>>) -> Self {
        Self { entities }
    }

    fn parse_foreign_key(config: &Value) -> AutomationResult<Option<ForeignKey>> {
        let raw = match config.get("foreign_key") {
            None | Some(Value::Null) => return Ok(None),
            Some(raw @ Value::Object(_)) => raw,
            Some(_) => return Err(AutomationError::validation("foreign_key", "must be an object")),
        };

        let table = whitelist::table_from_config(raw, "table")
            .map_err(|e| qualify("foreign_key", e))?;
        let match_field = required_str(raw, "match_field").map_err(|e| qualify("foreign_key", e))?;
        if !table.natural_keys.contains(&match_field) {
            return Err(AutomationError::validation(
                "foreign_key.match_field",
                format!("'{}' is not a natural key of '{}'", match_field, table.name),
            ));
        }

        let create_if_missing =
            optional_bool(raw, "create_if_missing").map_err(|e| qualify("foreign_key", e))?;
        let mut defaults = BTreeMap::new();
        match raw.get("defaults") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (column, value) in map {
                    check_column_value(
                        table,
                        column,
                        value,
                        &format!("foreign_key.defaults.{}", column),
                    )?;
                    defaults.insert(column.clone(), value.clone());
                }
            }
            Some(_) => {
                return Err(AutomationError::validation(
                    "foreign_key.defaults",
                    "must be an object",
                ));
            }
        }

        Ok(Some(ForeignKey {
            table,
            match_field: match_field.to_string(),
            create_if_missing,
            defaults,
        }))
    }

    /// Map a natural key to the referenced row id, creating the row when allowed.
    async fn resolve_foreign_key(
        &self,
        store: &dyn EntityStore,
        fk: &ForeignKey,
        key: &Value,
    ) -> AutomationResult<Value> {
        let filter = [FieldCondition::equals(&fk.match_field, key.clone())];
        let found = store
            .select(fk.table, &filter, 2)
            .await
            .map_err(|e| store_failure(TYPE, fk.table, e))?;

        match found.len() {
            1 => Ok(found[0].get(fk.table.primary_key).cloned().unwrap_or(Value::Null)),
            0 if fk.create_if_missing => {
                let mut fields = fk.defaults.clone();
                fields.insert(fk.match_field.clone(), key.clone());
                if fk.table.id_generation == IdGeneration::Uuid {
                    fields
                        .entry(fk.table.primary_key.to_string())
                        .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
                }
                let created = store
                    .insert(fk.table, &fields)
                    .await
                    .map_err(|e| store_failure(TYPE, fk.table, e))?;
                info!(
                    table = fk.table.name,
                    key = %value_text(key),
                    "Created missing foreign key target"
                );
                Ok(created.get(fk.table.primary_key).cloned().unwrap_or(Value::Null))
            }
            0 => Err(AutomationError::execution(
                TYPE,
                fk.table.name,
                format!("no row with {} = '{}'", fk.match_field, value_text(key)),
            )),
            _ => Err(AutomationError::execution(
                TYPE,
                fk.table.name,
                format!("{} = '{}' is ambiguous", fk.match_field, value_text(key)),
            )),
        }
    }
}

fn qualify(prefix: &str, err: AutomationError) -> AutomationError {
    match err {
        AutomationError::Validation { field, message } => {
            AutomationError::validation(format!("{}.{}", prefix, field), message)
        }
        other => other,
    }
}

fn target_filters(
    table: &TableSpec,
    config: &Value,
    context: &ExecutionContext,
) -> AutomationResult<Vec<FieldCondition>> {
    let conditions = parse_conditions(config)?;
    if !conditions.is_empty() {
        return Ok(conditions);
    }
    let id = target_id(config, context)?;
    Ok(vec![FieldCondition::equals(table.primary_key, Value::String(id))])
}

#[async_trait]
impl ActionHandler for UpdateFieldHandler {
    fn action_type(&self) -> &'static str {
        TYPE
    }

    fn description(&self) -> &'static str {
        "Set a field on matching rows of a whitelisted table"
    }

    fn validate(&self, config: &Value) -> AutomationResult<()> {
        ensure_object(config)?;
        let table = whitelist::table_from_config(config, "table")?;
        let field = required_str(config, "field")?;
        if field == table.primary_key {
            return Err(AutomationError::validation(
                "field",
                "the primary key cannot be updated",
            ));
        }
        let value = required_value(config, "value")?;

        let fk = Self::parse_foreign_key(config)?;
        match &fk {
            // The stored value is the referenced id, not the key itself
            Some(_) => {
                table.column(field).map_err(|_| {
                    AutomationError::validation(
                        "field",
                        format!("column '{}' is not whitelisted on '{}'", field, table.name),
                    )
                })?;
            }
            None => check_column_value(table, field, value, "field")?,
        }
        if fk.is_some() && !is_templated(value) && value.is_null() {
            return Err(AutomationError::validation(
                "value",
                "a lookup key is required with foreign_key",
            ));
        }

        for (i, condition) in parse_conditions(config)?.iter().enumerate() {
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
        let field = required_str(config, "field")?;
        let mut value = required_value(config, "value")?.clone();

        if let Some(fk) = Self::parse_foreign_key(config)? {
            value = self.resolve_foreign_key(store, &fk, &value).await?;
        }

        let filters = target_filters(table, config, context)?;
        let mut assignments = BTreeMap::new();
        assignments.insert(field.to_string(), value.clone());

        let rows_affected = store
            .update(table, &assignments, &filters)
            .await
            .map_err(|e| store_failure(TYPE, table, e))?;
        debug!(table = table.name, field, rows_affected, "update_field executed");

        let output = json!({
            "table": table.name,
            "field": field,
            "value": value,
            "rows_affected": rows_affected
        });
        if rows_affected == 0 {
            Ok(ActionResult::branch("no_match", Some(output)))
        } else {
            Ok(ActionResult::success(Some(output)))
        }
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

impl ManualExecution for UpdateFieldHandler {
    fn manual_parameters(&self) -> &'static [&'static str] {
        &["value"]
    }
}

impl OutputPorts for UpdateFieldHandler {
    fn ports(&self) -> &'static [&'static str] {
        &["success", "no_match", "failure"]
    }
}

impl DeclaresModifications for UpdateFieldHandler {
    fn modifications(&self, config: &Value) -> Vec<EntityModification> {
        let mut declared = Vec::new();
        if let (Ok(table), Ok(field)) = (
            whitelist::table_from_config(config, "table"),
            required_str(config, "field"),
        ) {
            declared.push(EntityModification {
                table: table.name.to_string(),
                fields: vec![field.to_string()],
                kind: ModificationKind::Update,
            });
        }
        if let Ok(Some(fk)) = Self::parse_foreign_key(config) {
            if fk.create_if_missing {
                let mut fields: Vec<String> = fk.defaults.keys().cloned().collect();
                fields.push(fk.match_field.clone());
                fields.sort();
                declared.push(EntityModification {
                    table: fk.table.name.to_string(),
                    fields,
                    kind: ModificationKind::Insert,
                });
            }
        }
        declared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::entity_store::MemoryEntityStore;

    const P1: &str = "0b7c1d9e-2f64-4a53-9d8e-1a2b3c4d5e01";

    async fn store_with_products() -> Arc<MemoryEntityStore> {
        let store = Arc::new(MemoryEntityStore::new());
        store
            .seed(
                whitelist::table("products").unwrap(),
                vec![json!({"id": P1, "sku": "W-1", "status": "active", "reorder_level": 5})],
            )
            .await;
        store
    }

    #[test]
    fn test_validate_without_collaborators() {
        let handler = UpdateFieldHandler::new(None);
        assert!(handler
            .validate(&json!({"table": "products", "field": "status", "value": "{{new_status}}"}))
            .is_ok());

        let err = handler
            .validate(&json!({"table": "products; --", "field": "status", "value": 1}))
            .unwrap_err();
        assert!(err.to_string().contains("table"));

        let err = handler
            .validate(&json!({"table": "products", "field": "id", "value": P1}))
            .unwrap_err();
        assert!(err.to_string().contains("primary key"));

        assert!(handler
            .validate(&json!({"table": "products", "field": "reorder_level", "value": "lots"}))
            .is_err());
    }

    #[test]
    fn test_foreign_key_requires_natural_key() {
        let handler = UpdateFieldHandler::new(None);
        let err = handler
            .validate(&json!({
                "table": "products",
                "field": "supplier_id",
                "value": "ACME",
                "foreign_key": {"table": "suppliers", "match_field": "name"}
            }))
            .unwrap_err();
        assert!(err.to_string().contains("foreign_key.match_field"));
    }

    #[tokio::test]
    async fn test_updates_triggering_row() {
        let store = store_with_products().await;
        let handler = UpdateFieldHandler::new(Some(store.clone()));
        let ctx = ExecutionContext::new("products", P1, "updated");

        let result = handler
            .execute(&json!({"table": "products", "field": "reorder_level", "value": "12"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.port(), Some("success"));
        assert_eq!(result.output.unwrap()["rows_affected"], 1);

        let rows = store.rows(whitelist::table("products").unwrap()).await;
        assert_eq!(rows[0]["reorder_level"], json!(12));
    }

    #[tokio::test]
    async fn test_zero_matches_is_no_match_port() {
        let store = store_with_products().await;
        let handler = UpdateFieldHandler::new(Some(store));
        let ctx = ExecutionContext::new("products", P1, "updated");

        let result = handler
            .execute(
                &json!({
                    "table": "products",
                    "field": "status",
                    "value": "discontinued",
                    "conditions": [{"field": "sku", "operator": "equals", "value": "NOPE"}]
                }),
                &ctx,
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.port(), Some("no_match"));
    }

    #[tokio::test]
    async fn test_foreign_key_auto_create() {
        let store = store_with_products().await;
        let handler = UpdateFieldHandler::new(Some(store.clone()));
        let ctx = ExecutionContext::new("products", P1, "updated");
        let config = json!({
            "table": "products",
            "field": "supplier_id",
            "value": "ACME",
            "foreign_key": {
                "table": "suppliers",
                "match_field": "code",
                "create_if_missing": true,
                "defaults": {"name": "Acme Corp"}
            }
        });

        handler.execute(&config, &ctx).await.unwrap();
        handler.execute(&config, &ctx).await.unwrap();

        let suppliers = store.rows(whitelist::table("suppliers").unwrap()).await;
        assert_eq!(suppliers.len(), 1);
        let products = store.rows(whitelist::table("products").unwrap()).await;
        assert_eq!(products[0]["supplier_id"], suppliers[0]["id"]);
    }

    #[tokio::test]
    async fn test_missing_foreign_key_without_create_fails() {
        let store = store_with_products().await;
        let handler = UpdateFieldHandler::new(Some(store));
        let ctx = ExecutionContext::new("products", P1, "updated");

        let err = handler
            .execute(
                &json!({
                    "table": "products",
                    "field": "supplier_id",
                    "value": "GHOST",
                    "foreign_key": {"table": "suppliers", "match_field": "code"}
                }),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Execution { .. }));
    }

    #[tokio::test]
    async fn test_missing_store_outside_dry_run() {
        let handler = UpdateFieldHandler::new(None);
        let config = json!({"table": "products", "field": "status", "value": "x"});

        let dry = handler
            .execute(&config, &ExecutionContext::new("products", P1, "updated").dry_run())
            .await
            .unwrap();
        assert_eq!(dry.output.unwrap()["dry_run"], true);

        let err = handler
            .execute(&config, &ExecutionContext::new("products", P1, "updated"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn test_declared_modifications() {
        let handler = UpdateFieldHandler::new(None);
        let declared = handler.modifications(&json!({
            "table": "products",
            "field": "supplier_id",
            "value": "ACME",
            "foreign_key": {"table": "suppliers", "match_field": "code", "create_if_missing": true}
        }));
        assert_eq!(declared.len(), 2);
        assert_eq!(declared[1].kind, ModificationKind::Insert);
        assert_eq!(declared[1].fields, vec!["code"]);
    }
}
