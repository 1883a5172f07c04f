// Workflow Actions - Actions that rules execute and their results

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::template::TemplateError;

/// An action to be executed by a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    /// Registry type name, e.g. `update_field`
    pub action_type: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub stop_on_failure: bool,
}

/// Result of executing an action
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActionResult {
    pub success: bool,
    /// Named branch taken (`found`, `no_match`, `invalid_transition`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    pub output: Option<Value>,
    pub error: Option<String>,
    /// The action handed control to the durable engine and will complete later
    #[serde(default)]
    pub suspended: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template_errors: Vec<TemplateError>,
    pub duration_ms: i64,
}

impl Action {
    pub fn new(name: &str, action_type: &str, config: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            action_type: action_type.to_string(),
            config,
            stop_on_failure: false,
        }
    }

    pub fn stop_on_failure(mut self) -> Self {
        self.stop_on_failure = true;
        self
    }

    // ===== Data Action Builders =====

    pub fn update_field(table: &str, field: &str, value: Value) -> Self {
        Self::new(
            &format!("Set {} {}", table, field),
            "update_field",
            json!({
                "table": table,
                "field": field,
                "value": value
            }),
        )
    }

    pub fn create_entity(table: &str, fields: Value) -> Self {
        Self::new(
            &format!("Create {}", table),
            "create_entity",
            json!({
                "table": table,
                "fields": fields
            }),
        )
    }

    pub fn lookup_entity(name: &str, table: &str, conditions: Value) -> Self {
        Self::new(
            name,
            "lookup_entity",
            json!({
                "table": table,
                "conditions": conditions
            }),
        )
    }

    pub fn transition_status(table: &str, from: &[&str], to: &str) -> Self {
        Self::new(
            &format!("Transition {} to {}", table, to),
            "transition_status",
            json!({
                "table": table,
                "from": from,
                "to": to
            }),
        )
    }

    // ===== Notification Action Builders =====

    pub fn send_email(to: &str, subject: &str, body: &str) -> Self {
        Self::new(
            "Send Email",
            "send_email",
            json!({
                "to": to,
                "subject": subject,
                "body": body
            }),
        )
    }

    pub fn send_notification(user_id: &str, title: &str, message: &str) -> Self {
        Self::new(
            "Send Notification",
            "send_notification",
            json!({
                "user_id": user_id,
                "title": title,
                "message": message
            }),
        )
    }

    pub fn create_alert(alert_type: &str, severity: &str, title: &str, roles: &[&str]) -> Self {
        Self::new(
            &format!("Alert {}", alert_type),
            "create_alert",
            json!({
                "alert_type": alert_type,
                "severity": severity,
                "title": title,
                "message": title,
                "recipients": { "roles": roles }
            }),
        )
    }

    // ===== Control Flow Action Builders =====

    pub fn seek_approval(approvers: &[Uuid], message: &str) -> Self {
        Self::new(
            "Seek Approval",
            "seek_approval",
            json!({
                "approvers": approvers,
                "approval_type": "any",
                "message": message
            }),
        )
        .stop_on_failure()
    }
}

impl ActionResult {
    pub fn success(output: Option<Value>) -> Self {
        Self {
            success: true,
            port: Some("success".to_string()),
            output,
            ..Default::default()
        }
    }

    pub fn failure(error: &str) -> Self {
        Self {
            success: false,
            port: Some("failure".to_string()),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Successful execution that took a named branch other than `success`.
    pub fn branch(port: &str, output: Option<Value>) -> Self {
        Self {
            success: true,
            port: Some(port.to_string()),
            output,
            ..Default::default()
        }
    }

    pub fn suspended(output: Option<Value>) -> Self {
        Self {
            success: true,
            port: None,
            output,
            suspended: true,
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_template_errors(mut self, errors: Vec<TemplateError>) -> Self {
        self.template_errors = errors;
        self
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }
}

/// Pre-built action sequences for common inventory and purchasing rules
pub mod presets {
    use super::*;

    /// Actions for flagging a product whose stock fell below its reorder level
    pub fn low_stock_alert() -> Vec<Action> {
        vec![
            Action::update_field("products", "status", json!("low_stock")),
            Action::create_alert(
                "low_stock",
                "warning",
                "Stock for {{entity.sku}} is down to {{new_quantity_on_hand}}",
                &["inventory_manager"],
            ),
        ]
    }

    /// Actions for routing a large purchase order through approval
    pub fn purchase_order_approval(approvers: &[Uuid]) -> Vec<Action> {
        vec![
            Action::transition_status("purchase_orders", &["draft"], "pending_approval")
                .stop_on_failure(),
            Action::seek_approval(
                approvers,
                "Purchase order {{entity.po_number}} totals {{entity.total_amount}}",
            ),
        ]
    }

    /// Actions for confirming a shipped order to the customer
    pub fn shipment_confirmation() -> Vec<Action> {
        vec![
            Action::transition_status("orders", &["allocated", "picked"], "shipped"),
            Action::send_email(
                "{{entity.customer_email}}",
                "Order {{entity.order_number}} has shipped",
                "Your order {{entity.order_number}} is on its way.",
            ),
        ]
    }
}
