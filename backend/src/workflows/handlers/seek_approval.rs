// seek_approval - Create an approval request and suspend the rule
//
// The handler never waits. It records the request with the running activity's
// resume token and returns a suspended result; the approval service completes
// the activity when someone decides.

use async_trait::async_trait;
use ledgerline_shared::ApprovalType;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::{collaborator, is_templated};
use crate::approvals::{ApprovalService, NewApproval};
use crate::error::{AutomationError, AutomationResult};
use crate::workflows::handler::{
    ensure_object, optional_str, preview, ActionHandler, AsyncAction,
};
use crate::workflows::{ActionResult, ExecutionContext};

const TYPE: &str = "seek_approval";
pub const DEFAULT_TIMEOUT_HOURS: i32 = 72;

pub struct SeekApprovalHandler {
    approvals: Option<Arc<ApprovalService>>,
}

impl SeekApprovalHandler {
    pub fn new(approvals: Option<Arc<ApprovalService>>) -> Self {
        Self { approvals }
    }
}

/// Approver ids. Placeholders are let through at validation time when
/// `allow_templates` is set; they are resolved before execution.
fn approvers(config: &Value, allow_templates: bool) -> AutomationResult<Vec<Uuid>> {
    let raw = match config.get("approvers") {
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(Value::Array(_)) | None | Some(Value::Null) => {
            return Err(AutomationError::validation(
                "approvers",
                "at least one approver is required",
            ));
        }
        Some(_) => return Err(AutomationError::validation("approvers", "must be a list")),
    };

    let mut ids = Vec::with_capacity(raw.len());
    for (i, item) in raw.iter().enumerate() {
        match item.as_str().map(Uuid::parse_str) {
            Some(Ok(id)) => ids.push(id),
            _ if allow_templates && is_templated(item) => {}
            _ => {
                return Err(AutomationError::validation(
                    format!("approvers[{}]", i),
                    "must be a user id",
                ));
            }
        }
    }
    Ok(ids)
}

fn approval_type(config: &Value) -> AutomationResult<ApprovalType> {
    match optional_str(config, "approval_type")? {
        None => Ok(ApprovalType::default()),
        Some(raw) => raw
            .parse::<ApprovalType>()
            .map_err(|e| AutomationError::validation("approval_type", e.to_string())),
    }
}

fn timeout_hours(config: &Value) -> AutomationResult<i32> {
    match config.get("timeout_hours") {
        None | Some(Value::Null) => Ok(DEFAULT_TIMEOUT_HOURS),
        Some(v) => v
            .as_i64()
            .filter(|h| *h > 0)
            .and_then(|h| i32::try_from(h).ok())
            .ok_or_else(|| {
                AutomationError::validation("timeout_hours", "must be a positive whole number")
            }),
    }
}

#[async_trait]
impl ActionHandler for SeekApprovalHandler {
    fn action_type(&self) -> &'static str {
        TYPE
    }

    fn description(&self) -> &'static str {
        "Pause the rule until a listed approver decides"
    }

    fn validate(&self, config: &Value) -> AutomationResult<()> {
        ensure_object(config)?;
        approvers(config, true)?;
        approval_type(config)?;
        timeout_hours(config)?;
        optional_str(config, "message")?;
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

        let service = collaborator(&self.approvals, TYPE, "approval service")?;
        if context.resume_token.is_none() {
            warn!(
                execution_id = %context.execution_id,
                "Approval requested outside a durable activity; decision will not resume it"
            );
        }

        let request = service
            .create(NewApproval {
                execution_id: context.execution_id,
                rule_id: context.rule_id,
                action_name: context
                    .current_action
                    .clone()
                    .unwrap_or_else(|| TYPE.to_string()),
                approvers: approvers(config, false)?,
                approval_type: approval_type(config)?,
                timeout_hours: Some(timeout_hours(config)?),
                resume_token: context.resume_token.clone(),
                message: optional_str(config, "message")?.map(str::to_string),
            })
            .await?;

        Ok(ActionResult::suspended(Some(json!({
            "approval_id": request.id,
            "status": request.status,
            "timeout_hours": request.timeout_hours
        }))))
    }

    fn async_behavior(&self) -> Option<&dyn AsyncAction> {
        Some(self)
    }
}

impl AsyncAction for SeekApprovalHandler {
    fn resume_ports(&self) -> &'static [&'static str] {
        &["approved", "rejected", "timed_out"]
    }

    fn default_timeout_hours(&self) -> Option<i32> {
        Some(DEFAULT_TIMEOUT_HOURS)
    }
}
