// Execution Context - Snapshot of the event that caused a rule to fire

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Old and new value of one changed field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// Context for rule execution. Built by the trigger layer, one per firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub entity_id: String,
    pub entity_name: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub rule_name: Option<String>,
    pub execution_id: Uuid,
    /// Raw entity snapshot
    #[serde(default)]
    pub entity: Map<String, Value>,
    #[serde(default)]
    pub changes: BTreeMap<String, FieldChange>,
    /// Outputs of actions already executed in this run, keyed by action name
    #[serde(default)]
    pub action_outputs: Map<String, Value>,
    /// Opaque token of the durable activity running this action, if any
    #[serde(default, skip_serializing)]
    pub resume_token: Option<String>,
    /// Name of the action currently being executed
    #[serde(default)]
    pub current_action: Option<String>,
    /// Validation-only mode: handlers must not touch collaborators
    #[serde(default)]
    pub dry_run: bool,
}

impl ExecutionContext {
    pub fn new(entity_name: &str, entity_id: &str, event_type: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            entity_name: entity_name.to_string(),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            user_id: None,
            rule_id: None,
            rule_name: None,
            execution_id: Uuid::new_v4(),
            entity: Map::new(),
            changes: BTreeMap::new(),
            action_outputs: Map::new(),
            resume_token: None,
            current_action: None,
            dry_run: false,
        }
    }

    pub fn with_entity(mut self, entity: Value) -> Self {
        if let Value::Object(map) = entity {
            self.entity = map;
        }
        self
    }

    pub fn with_change(mut self, field: &str, old: Value, new: Value) -> Self {
        self.changes.insert(field.to_string(), FieldChange { old, new });
        self
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_rule(mut self, rule_id: Uuid, rule_name: &str) -> Self {
        self.rule_id = Some(rule_id);
        self.rule_name = Some(rule_name.to_string());
        self
    }

    pub fn with_resume_token(mut self, token: impl Into<String>) -> Self {
        self.resume_token = Some(token.into());
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Context metadata addressable from templates (`{{entity_id}}`, `{{context.rule_name}}`).
    pub fn metadata(&self, key: &str) -> Option<Value> {
        let value = match key {
            "entity_id" => Value::String(self.entity_id.clone()),
            "entity_name" => Value::String(self.entity_name.clone()),
            "event_type" => Value::String(self.event_type.clone()),
            "timestamp" => Value::String(self.timestamp.to_rfc3339()),
            "execution_id" => Value::String(self.execution_id.to_string()),
            "user_id" => self.user_id.map(|u| Value::String(u.to_string()))?,
            "rule_id" => self.rule_id.map(|r| Value::String(r.to_string()))?,
            "rule_name" => self.rule_name.clone().map(Value::String)?,
            _ => return None,
        };
        Some(value)
    }

    pub fn record_output(&mut self, action_name: &str, output: Value) {
        self.action_outputs.insert(action_name.to_string(), output);
    }
}
