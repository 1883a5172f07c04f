// Workflow Automation Core
//
// Rule actions for the Ledgerline ERP: template resolution, the action
// handler contract and registry, the built-in handlers and the executor
// that runs a rule's actions in order.

pub mod actions;
pub mod conditions;
pub mod context;
pub mod entity_store;
pub mod executor;
pub mod handler;
pub mod handlers;
pub mod registry;
pub mod template;
pub mod whitelist;

pub use actions::{Action, ActionResult};
pub use conditions::{ConditionOperator, FieldCondition};
pub use context::{ExecutionContext, FieldChange};
pub use entity_store::{EntityStore, MemoryEntityStore, PgEntityStore};
pub use executor::{ActionOutcome, ExecutionResult, RuleValidationError, WorkflowExecutor};
pub use handler::{ActionHandler, HandlerDescriptor};
pub use handlers::{builtin_registry, validation_registry, Collaborators};
pub use registry::ActionRegistry;
pub use template::{TemplateError, TemplateProcessor};
