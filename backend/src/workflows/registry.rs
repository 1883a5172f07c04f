// Action Registry - Maps action type names to handlers

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{ActionHandler, HandlerDescriptor};
use crate::error::{AutomationError, AutomationResult};

/// Registry of action handlers, built once at startup and shared read-only.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. An existing handler with the same type is replaced.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        let key = handler.action_type().to_string();
        tracing::debug!(action_type = %key, "registered action handler");
        self.handlers.insert(key, handler);
    }

    pub fn with(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    pub fn get(&self, action_type: &str) -> AutomationResult<Arc<dyn ActionHandler>> {
        self.handlers
            .get(action_type)
            .cloned()
            .ok_or_else(|| AutomationError::UnknownActionType(action_type.to_string()))
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Validate a configuration for the given type without executing it.
    pub fn validate(&self, action_type: &str, config: &Value) -> AutomationResult<()> {
        self.get(action_type)?.validate(config)
    }

    /// Registered types with their probed capabilities, sorted by type.
    pub fn describe(&self) -> Vec<HandlerDescriptor> {
        let mut descriptors: Vec<HandlerDescriptor> = self
            .handlers
            .values()
            .map(|h| HandlerDescriptor::probe(h.as_ref()))
            .collect();
        descriptors.sort_by_key(|d| d.action_type);
        descriptors
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("ActionRegistry").field("handlers", &keys).finish()
    }
}
