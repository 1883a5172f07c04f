// send_email - Deliver a templated message through the email sender

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{collaborator, is_templated, string_list};
use crate::error::{AutomationError, AutomationResult};
use crate::services::email::{EmailSender, OutgoingEmail};
use crate::workflows::handler::{
    ensure_object, optional_str, preview, required_str, ActionHandler, ManualExecution,
};
use crate::workflows::{ActionResult, ExecutionContext};

const TYPE: &str = "send_email";

pub struct SendEmailHandler {
    sender: Option<Arc<dyn EmailSender>>,
}

impl SendEmailHandler {
    pub fn new(sender: Option<Arc<dyn EmailSender>>) -> Self {
        Self { sender }
    }
}

fn check_addresses(config: &Value, key: &str, required: bool) -> AutomationResult<Vec<String>> {
    let addresses = string_list(config, key)?;
    if required && addresses.is_empty() {
        return Err(AutomationError::validation(key, "at least one address is required"));
    }
    for (i, address) in addresses.iter().enumerate() {
        let value = Value::String(address.clone());
        if !is_templated(&value) && !address.contains('@') {
            return Err(AutomationError::validation(
                format!("{}[{}]", key, i),
                format!("'{}' is not an email address", address),
            ));
        }
    }
    Ok(addresses)
}

#[async_trait]
impl ActionHandler for SendEmailHandler {
    fn action_type(&self) -> &'static str {
        TYPE
    }

    fn description(&self) -> &'static str {
        "Send an email"
    }

    fn validate(&self, config: &Value) -> AutomationResult<()> {
        ensure_object(config)?;
        check_addresses(config, "to", true)?;
        check_addresses(config, "cc", false)?;
        required_str(config, "subject")?;
        required_str(config, "body")?;
        optional_str(config, "html_body")?;
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

        let sender = collaborator(&self.sender, TYPE, "email sender")?;
        let email = OutgoingEmail {
            to: check_addresses(config, "to", true)?,
            cc: check_addresses(config, "cc", false)?,
            subject: required_str(config, "subject")?.to_string(),
            text_body: required_str(config, "body")?.to_string(),
            html_body: optional_str(config, "html_body")?.map(str::to_string),
        };

        sender
            .send(&email)
            .await
            .map_err(|e| AutomationError::execution(TYPE, email.to.join(", "), e))?;

        Ok(ActionResult::success(Some(json!({
            "recipients": email.to.len() + email.cc.len(),
            "subject": email.subject
        }))))
    }

    fn manual_execution(&self) -> Option<&dyn ManualExecution> {
        Some(self)
    }
}

impl ManualExecution for SendEmailHandler {
    fn manual_parameters(&self) -> &'static [&'static str] {
        &["to", "subject", "body"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::email::{EmailError, MockEmailSender};

    fn config() -> Value {
        json!({"to": ["buyer@example.com"], "subject": "PO approved", "body": "Go ahead"})
    }

    #[test]
    fn test_validate_addresses() {
        let handler = SendEmailHandler::new(None);
        assert!(handler.validate(&config()).is_ok());
        assert!(handler
            .validate(&json!({"to": "{{entity.customer_email}}", "subject": "s", "body": "b"}))
            .is_ok());
        let err = handler
            .validate(&json!({"to": ["nobody"], "subject": "s", "body": "b"}))
            .unwrap_err();
        assert!(err.to_string().contains("to[0]"));
    }

    #[tokio::test]
    async fn test_sends_through_collaborator() {
        let mut sender = MockEmailSender::new();
        sender
            .expect_send()
            .withf(|email| email.to == vec!["buyer@example.com".to_string()] && email.subject == "PO approved")
            .times(1)
            .returning(|_| Ok(()));

        let handler = SendEmailHandler::new(Some(Arc::new(sender)));
        let result = handler
            .execute(&config(), &ExecutionContext::new("purchase_orders", "po-1", "approved"))
            .await
            .unwrap();
        assert_eq!(result.output.unwrap()["recipients"], 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_is_execution_error() {
        let mut sender = MockEmailSender::new();
        sender.expect_send().returning(|email| {
            Err(EmailError::Address {
                address: email.to[0].clone(),
                message: "rejected".to_string(),
            })
        });

        let handler = SendEmailHandler::new(Some(Arc::new(sender)));
        let err = handler
            .execute(&config(), &ExecutionContext::new("purchase_orders", "po-1", "approved"))
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Execution { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_never_sends() {
        let mut sender = MockEmailSender::new();
        sender.expect_send().times(0);

        let handler = SendEmailHandler::new(Some(Arc::new(sender)));
        let result = handler
            .execute(&config(), &ExecutionContext::new("orders", "o", "shipped").dry_run())
            .await
            .unwrap();
        assert_eq!(result.output.unwrap()["dry_run"], true);
    }
}
