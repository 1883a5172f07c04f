//! Action handler contract.
//!
//! Every action type is an independent [`ActionHandler`] stored in the
//! [`ActionRegistry`](super::ActionRegistry) as `Arc<dyn ActionHandler>`.
//! Optional capabilities are probed through the `Option<&dyn _>` accessors
//! rather than inherited, so a handler opts into exactly what it supports.
//!
//! `validate` never touches collaborators. A handler built with every
//! collaborator set to `None` must still validate any configuration.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::{ActionResult, ExecutionContext};
use crate::error::{AutomationError, AutomationResult};

#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Registry key, e.g. `update_field`.
    fn action_type(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    /// Check a configuration offline. Errors are field-qualified.
    fn validate(&self, config: &Value) -> AutomationResult<()>;

    /// Run the action against an already template-resolved configuration.
    ///
    /// With `context.dry_run` set the handler validates and returns a preview
    /// without touching any collaborator.
    async fn execute(
        &self,
        config: &Value,
        context: &ExecutionContext,
    ) -> AutomationResult<ActionResult>;

    fn manual_execution(&self) -> Option<&dyn ManualExecution> {
        None
    }

    fn async_behavior(&self) -> Option<&dyn AsyncAction> {
        None
    }

    fn output_ports(&self) -> Option<&dyn OutputPorts> {
        None
    }

    fn entity_modifications(&self) -> Option<&dyn DeclaresModifications> {
        None
    }
}

/// Handler can be run by a user outside of a rule, from an entity screen.
pub trait ManualExecution: Send + Sync {
    /// Config keys the user supplies when running the action by hand.
    fn manual_parameters(&self) -> &'static [&'static str];
}

/// Handler suspends the calling durable activity instead of completing inline.
pub trait AsyncAction: Send + Sync {
    /// Ports the durable engine may resume the activity on.
    fn resume_ports(&self) -> &'static [&'static str];

    fn default_timeout_hours(&self) -> Option<i32> {
        None
    }
}

/// Named branches the handler may take.
pub trait OutputPorts: Send + Sync {
    fn ports(&self) -> &'static [&'static str];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationKind {
    Insert,
    Update,
}

/// Advisory record of what an action would write. Used for impact analysis only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityModification {
    pub table: String,
    pub fields: Vec<String>,
    pub kind: ModificationKind,
}

pub trait DeclaresModifications: Send + Sync {
    fn modifications(&self, config: &Value) -> Vec<EntityModification>;
}

/// Probed capabilities of one handler, as exposed by the action catalog.
#[derive(Debug, Clone, Serialize)]
pub struct HandlerDescriptor {
    pub action_type: &'static str,
    pub description: &'static str,
    pub manual: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_parameters: Option<&'static [&'static str]>,
    pub is_async: bool,
    pub ports: &'static [&'static str],
    pub declares_modifications: bool,
}

impl HandlerDescriptor {
    pub fn probe(handler: &dyn ActionHandler) -> Self {
        let manual = handler.manual_execution();
        let ports = match (handler.output_ports(), handler.async_behavior()) {
            (Some(p), _) => p.ports(),
            (None, Some(a)) => a.resume_ports(),
            (None, None) => &[],
        };

        Self {
            action_type: handler.action_type(),
            description: handler.description(),
            manual: manual.is_some(),
            manual_parameters: manual.map(|m| m.manual_parameters()),
            is_async: handler.async_behavior().is_some(),
            ports,
            declares_modifications: handler.entity_modifications().is_some(),
        }
    }
}

// ===== Config helpers shared by handlers =====

pub(crate) fn required_str<'a>(config: &'a Value, key: &str) -> AutomationResult<&'a str> {
    match config.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            Err(AutomationError::validation(key, "is required"))
        }
        Some(_) => Err(AutomationError::validation(key, "must be a string")),
    }
}

pub(crate) fn optional_str<'a>(config: &'a Value, key: &str) -> AutomationResult<Option<&'a str>> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(AutomationError::validation(key, "must be a string")),
    }
}

pub(crate) fn required_value<'a>(config: &'a Value, key: &str) -> AutomationResult<&'a Value> {
    config
        .get(key)
        .ok_or_else(|| AutomationError::validation(key, "is required"))
}

pub(crate) fn optional_bool(config: &Value, key: &str) -> AutomationResult<bool> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(AutomationError::validation(key, "must be a boolean")),
    }
}

pub(crate) fn ensure_object(config: &Value) -> AutomationResult<()> {
    if config.is_object() {
        Ok(())
    } else {
        Err(AutomationError::validation("config", "must be an object"))
    }
}

/// Dry-run preview: what the handler would have done.
pub(crate) fn preview(action_type: &str, config: &Value) -> ActionResult {
    ActionResult::success(Some(serde_json::json!({
        "dry_run": true,
        "action_type": action_type,
        "config": config
    })))
}
