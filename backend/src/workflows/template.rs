// Template Processor - Resolves {{placeholders}} in action configuration
//
// Pure substitution over one delimiter pair. Paths are dotted and resolved
// against the execution context; there is no expression language.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

use super::ExecutionContext;

pub const DEFAULT_MAX_DEPTH: usize = 32;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateErrorKind {
    Unresolved,
    DepthExceeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateError {
    pub kind: TemplateErrorKind,
    /// Placeholder path, or the config location for depth errors
    pub path: String,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TemplateErrorKind::Unresolved => write!(f, "unresolved placeholder '{{{{{}}}}}'", self.path),
            TemplateErrorKind::DepthExceeded => {
                write!(f, "template nesting too deep at '{}'", self.path)
            }
        }
    }
}

/// Result of processing: the substituted value plus every reference that failed.
#[derive(Debug, Clone)]
pub struct TemplateOutput {
    pub value: Value,
    pub errors: Vec<TemplateError>,
}

impl TemplateOutput {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateProcessor {
    max_depth: usize,
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl TemplateProcessor {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Process template variables in configuration
    pub fn process(&self, raw: &Value, context: &ExecutionContext) -> TemplateOutput {
        let mut errors = Vec::new();
        let value = self.process_value(raw, context, 0, "$", &mut errors);
        TemplateOutput { value, errors }
    }

    /// Convenience for a single string; always yields a string.
    pub fn render(&self, template: &str, context: &ExecutionContext) -> TemplateOutput {
        let mut errors = Vec::new();
        let value = Value::String(self.replace_embedded(template, context, &mut errors));
        TemplateOutput { value, errors }
    }

    fn process_value(
        &self,
        value: &Value,
        context: &ExecutionContext,
        depth: usize,
        location: &str,
        errors: &mut Vec<TemplateError>,
    ) -> Value {
        if depth > self.max_depth {
            errors.push(TemplateError {
                kind: TemplateErrorKind::DepthExceeded,
                path: location.to_string(),
            });
            return value.clone();
        }

        match value {
            Value::String(s) => self.process_string(s, context, errors),
            Value::Object(map) => {
                let processed: Map<String, Value> = map
                    .iter()
                    .map(|(k, v)| {
                        let child = format!("{}.{}", location, k);
                        (k.clone(), self.process_value(v, context, depth + 1, &child, errors))
                    })
                    .collect();
                Value::Object(processed)
            }
            Value::Array(items) => {
                let processed: Vec<Value> = items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let child = format!("{}[{}]", location, i);
                        self.process_value(v, context, depth + 1, &child, errors)
                    })
                    .collect();
                Value::Array(processed)
            }
            _ => value.clone(),
        }
    }

    fn process_string(
        &self,
        s: &str,
        context: &ExecutionContext,
        errors: &mut Vec<TemplateError>,
    ) -> Value {
        // A lone placeholder keeps the referenced value's JSON type
        if let Some(caps) = PLACEHOLDER.captures(s) {
            if caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len()) {
                let path = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                return match resolve_path(context, path) {
                    Some(v) => v,
                    None => {
                        errors.push(unresolved(path));
                        Value::String(s.to_string())
                    }
                };
            }
        }

        Value::String(self.replace_embedded(s, context, errors))
    }

    fn replace_embedded(
        &self,
        template: &str,
        context: &ExecutionContext,
        errors: &mut Vec<TemplateError>,
    ) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| {
                let path = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                match resolve_path(context, path) {
                    Some(v) => render_scalar(&v),
                    None => {
                        errors.push(unresolved(path));
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }
}

fn unresolved(path: &str) -> TemplateError {
    TemplateError {
        kind: TemplateErrorKind::Unresolved,
        path: path.to_string(),
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Resolve a dotted path against the context.
pub fn resolve_path(context: &ExecutionContext, path: &str) -> Option<Value> {
    if path.is_empty() {
        return None;
    }

    // old_<field> / new_<field> change aliases
    for (prefix, take_new) in [("old_", false), ("new_", true)] {
        if let Some(field) = path.strip_prefix(prefix) {
            if let Some(change) = context.changes.get(field) {
                return Some(if take_new {
                    change.new.clone()
                } else {
                    change.old.clone()
                });
            }
        }
    }

    let (root, rest) = match path.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (path, None),
    };

    match (root, rest) {
        ("entity", Some(rest)) => lookup_in_map(&context.entity, rest),
        ("context", Some(key)) => context.metadata(key),
        ("actions", Some(rest)) => lookup_in_map(&context.action_outputs, rest),
        ("changes", Some(rest)) => {
            let (field, side) = rest.rsplit_once('.')?;
            let change = context.changes.get(field)?;
            match side {
                "old" => Some(change.old.clone()),
                "new" => Some(change.new.clone()),
                _ => None,
            }
        }
        // Trigger metadata wins over snapshot keys of the same name
        (_, None) => context.metadata(root).or_else(|| lookup_in_map(&context.entity, path)),
        _ => lookup_in_map(&context.entity, path),
    }
}

fn lookup_in_map(map: &Map<String, Value>, path: &str) -> Option<Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = map.get(first)?;

    for part in parts {
        current = match current {
            Value::Object(obj) => obj.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current.clone())
}
