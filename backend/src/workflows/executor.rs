// Workflow Executor - Runs a rule's actions in order against one context
//
// Per action: resolve templates, dispatch through the registry, record the
// output under the action's name. A run stops at the first suspended action
// or at a failure on an action marked `stop_on_failure`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::registry::ActionRegistry;
use super::template::TemplateProcessor;
use super::{Action, ActionResult, ExecutionContext};
use crate::error::AutomationError;

/// Result of one action within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: Uuid,
    pub action_name: String,
    pub action_type: String,
    pub result: ActionResult,
}

/// Result of workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub success: bool,
    /// Name of the action that handed control to the durable engine
    pub suspended_at: Option<String>,
    /// The run ended before its last action
    pub halted: bool,
    pub actions_executed: i32,
    pub actions_failed: i32,
    pub total_duration_ms: i64,
    pub outputs: Vec<ActionOutcome>,
}

/// A field-qualified configuration problem found by `validate_rule`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RuleValidationError {
    pub action_index: usize,
    pub action_name: String,
    pub field: String,
    pub message: String,
}

#[derive(Clone)]
pub struct WorkflowExecutor {
    registry: Arc<ActionRegistry>,
    processor: TemplateProcessor,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<ActionRegistry>, processor: TemplateProcessor) -> Self {
        Self {
            registry,
            processor,
        }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Execute a single action. Handler errors become failed results.
    pub async fn execute_action(&self, action: &Action, context: &ExecutionContext) -> ActionResult {
        let start = Instant::now();

        info!(
            execution_id = %context.execution_id,
            action = %action.name,
            action_type = %action.action_type,
            dry_run = context.dry_run,
            "Executing action"
        );

        let resolved = self.processor.process(&action.config, context);
        if !resolved.is_clean() {
            warn!(
                action = %action.name,
                errors = resolved.errors.len(),
                "Unresolved template references in action config"
            );
        }

        let outcome = match self.registry.get(&action.action_type) {
            Ok(handler) => handler.execute(&resolved.value, context).await,
            Err(e) => Err(e),
        };

        let duration = start.elapsed().as_millis() as i64;
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                log_failure(action, &e);
                ActionResult::failure(&e.to_string())
            }
        };

        result
            .with_template_errors(resolved.errors)
            .with_duration(duration)
    }

    /// Execute a rule's actions in order, threading outputs through `context`.
    pub async fn execute_rule(
        &self,
        actions: &[Action],
        context: &mut ExecutionContext,
    ) -> ExecutionResult {
        let start = Instant::now();
        let mut outputs = Vec::with_capacity(actions.len());
        let mut actions_failed = 0;
        let mut suspended_at = None;
        let mut halted = false;

        for (index, action) in actions.iter().enumerate() {
            context.current_action = Some(action.name.clone());
            let result = self.execute_action(action, context).await;

            if let Some(output) = &result.output {
                context.record_output(&action.name, output.clone());
            }
            if !result.success {
                actions_failed += 1;
            }

            let suspended = result.suspended;
            let stop = !result.success && action.stop_on_failure;
            outputs.push(ActionOutcome {
                action_id: action.id,
                action_name: action.name.clone(),
                action_type: action.action_type.clone(),
                result,
            });

            if suspended {
                info!(execution_id = %context.execution_id, action = %action.name, "Rule suspended");
                suspended_at = Some(action.name.clone());
                halted = index + 1 < actions.len();
                break;
            }
            if stop {
                warn!(execution_id = %context.execution_id, action = %action.name, "Stopping rule after failed action");
                halted = index + 1 < actions.len();
                break;
            }
        }
        context.current_action = None;

        let result = ExecutionResult {
            execution_id: context.execution_id,
            success: actions_failed == 0,
            suspended_at,
            halted,
            actions_executed: outputs.len() as i32,
            actions_failed,
            total_duration_ms: start.elapsed().as_millis() as i64,
            outputs,
        };
        info!(
            execution_id = %result.execution_id,
            executed = result.actions_executed,
            failed = result.actions_failed,
            suspended = result.suspended_at.is_some(),
            "Rule execution finished"
        );
        result
    }

    /// Validate every action offline. Returns all problems, not just the first.
    pub fn validate_rule(&self, actions: &[Action]) -> Result<(), Vec<RuleValidationError>> {
        let mut errors = Vec::new();
        let mut names = HashSet::new();

        for (index, action) in actions.iter().enumerate() {
            let mut push = |field: &str, message: String| {
                errors.push(RuleValidationError {
                    action_index: index,
                    action_name: action.name.clone(),
                    field: field.to_string(),
                    message,
                });
            };

            if action.name.trim().is_empty() {
                push("name", "is required".to_string());
            } else if action.name.contains('.') {
                push("name", "must not contain '.'".to_string());
            } else if !names.insert(action.name.as_str()) {
                push("name", format!("duplicate action name '{}'", action.name));
            }

            match self.registry.validate(&action.action_type, &action.config) {
                Ok(()) => {}
                Err(AutomationError::Validation { field, message }) => {
                    push(&format!("config.{}", field), message);
                }
                Err(AutomationError::UnknownActionType(name)) => {
                    push("action_type", format!("unknown action type '{}'", name));
                }
                Err(other) => push("config", other.to_string()),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn log_failure(action: &Action, err: &AutomationError) {
    match err {
        AutomationError::Validation { .. } | AutomationError::UnknownActionType(_) => {
            warn!(action = %action.name, error = %err, "Action configuration rejected");
        }
        _ => error!(action = %action.name, error = %err, "Action failed"),
    }
}
