// Workflow Conditions - Predicates handlers attach to their storage targets

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::whitelist::{ColumnType, TableSpec};
use crate::error::{AutomationError, AutomationResult};

/// Condition operators
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    #[serde(alias = "greater_than")]
    Greater,
    #[serde(alias = "less_than")]
    Less,
    Contains,
    IsNull,
    IsNotNull,
    In,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::Greater => "greater",
            Self::Less => "less",
            Self::Contains => "contains",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::In => "in",
        }
    }

    pub fn takes_value(&self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

/// A single predicate against a whitelisted column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

impl FieldCondition {
    pub fn new(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value,
        }
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn not_equals(field: &str, value: Value) -> Self {
        Self::new(field, ConditionOperator::NotEquals, value)
    }

    pub fn greater_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::Greater, serde_json::json!(value))
    }

    pub fn less_than(field: &str, value: f64) -> Self {
        Self::new(field, ConditionOperator::Less, serde_json::json!(value))
    }

    pub fn contains(field: &str, value: &str) -> Self {
        Self::new(field, ConditionOperator::Contains, Value::String(value.to_string()))
    }

    pub fn is_null(field: &str) -> Self {
        Self::new(field, ConditionOperator::IsNull, Value::Null)
    }

    pub fn is_not_null(field: &str) -> Self {
        Self::new(field, ConditionOperator::IsNotNull, Value::Null)
    }

    pub fn in_list(field: &str, values: Vec<Value>) -> Self {
        Self::new(field, ConditionOperator::In, Value::Array(values))
    }

    /// Check the predicate is well formed for the given table.
    pub fn validate(&self, table: &TableSpec, index: usize) -> AutomationResult<ColumnType> {
        let path = format!("conditions[{}]", index);
        let column = table.column(&self.field).map_err(|_| {
            AutomationError::validation(
                format!("{}.field", path),
                format!("column '{}' is not whitelisted on '{}'", self.field, table.name),
            )
        })?;

        match self.operator {
            ConditionOperator::IsNull | ConditionOperator::IsNotNull => {}
            ConditionOperator::In => {
                if !self.value.is_array() {
                    return Err(AutomationError::validation(
                        format!("{}.value", path),
                        "'in' requires a list of values",
                    ));
                }
            }
            ConditionOperator::Greater | ConditionOperator::Less => {
                if !column.is_ordered() {
                    return Err(AutomationError::validation(
                        format!("{}.operator", path),
                        format!("'{}' cannot be ordered", self.field),
                    ));
                }
                if self.value.is_null() {
                    return Err(AutomationError::validation(
                        format!("{}.value", path),
                        "a comparison value is required",
                    ));
                }
            }
            ConditionOperator::Equals
            | ConditionOperator::NotEquals
            | ConditionOperator::Contains => {
                if self.value.is_null() {
                    return Err(AutomationError::validation(
                        format!("{}.value", path),
                        "a comparison value is required",
                    ));
                }
            }
        }

        Ok(column)
    }

    /// Evaluate against an in-memory record.
    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        let actual = record.get(&self.field).unwrap_or(&Value::Null);

        match self.operator {
            ConditionOperator::IsNull => actual.is_null(),
            ConditionOperator::IsNotNull => !actual.is_null(),
            ConditionOperator::Equals => values_equal(actual, &self.value),
            ConditionOperator::NotEquals => !actual.is_null() && !values_equal(actual, &self.value),
            ConditionOperator::Greater => {
                compare_values(actual, &self.value) == Some(Ordering::Greater)
            }
            ConditionOperator::Less => compare_values(actual, &self.value) == Some(Ordering::Less),
            ConditionOperator::Contains => {
                let haystack = value_text(actual);
                let needle = value_text(&self.value);
                !actual.is_null() && haystack.to_lowercase().contains(&needle.to_lowercase())
            }
            ConditionOperator::In => self
                .value
                .as_array()
                .map(|values| values.iter().any(|v| values_equal(actual, v)))
                .unwrap_or(false),
        }
    }
}

/// Render a JSON scalar the way it is bound as a text parameter.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => !a.is_null() && !b.is_null() && value_text(a) == value_text(b),
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(value_text(a).cmp(&value_text(b))),
    }
}

/// Parse the optional `conditions` array of a handler config.
pub fn parse_conditions(config: &Value) -> AutomationResult<Vec<FieldCondition>> {
    match config.get("conditions") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| AutomationError::validation("conditions", e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::whitelist;
    use serde_json::json;

    fn record() -> Map<String, Value> {
        json!({
            "status": "open",
            "quantity": 4,
            "notes": null,
            "name": "Blue Widget"
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_condition_builder() {
        let condition = FieldCondition::equals("status", json!("open"));
        assert_eq!(condition.field, "status");
        assert_eq!(condition.operator.as_str(), "equals");
    }

    #[test]
    fn test_operators_against_record() {
        let r = record();
        assert!(FieldCondition::equals("status", json!("open")).matches(&r));
        assert!(FieldCondition::not_equals("status", json!("closed")).matches(&r));
        assert!(FieldCondition::less_than("quantity", 10.0).matches(&r));
        assert!(!FieldCondition::greater_than("quantity", 10.0).matches(&r));
        assert!(FieldCondition::contains("name", "widget").matches(&r));
        assert!(FieldCondition::is_null("notes").matches(&r));
        assert!(FieldCondition::is_not_null("status").matches(&r));
        assert!(FieldCondition::in_list("status", vec![json!("open"), json!("held")]).matches(&r));
        assert!(FieldCondition::equals("quantity", json!("4")).matches(&r));
    }

    #[test]
    fn test_operator_aliases_deserialize() {
        let parsed: FieldCondition =
            serde_json::from_value(json!({"field": "quantity", "operator": "greater_than", "value": 1}))
                .unwrap();
        assert_eq!(parsed.operator, ConditionOperator::Greater);
    }

    #[test]
    fn test_validate_against_whitelist() {
        let orders = whitelist::table("orders").unwrap();
        assert!(FieldCondition::equals("status", json!("open")).validate(orders, 0).is_ok());
        assert!(FieldCondition::equals("secret", json!("x")).validate(orders, 0).is_err());
        assert!(FieldCondition::new("status", ConditionOperator::In, json!("open"))
            .validate(orders, 1)
            .is_err());

        let err = FieldCondition::equals("status", Value::Null)
            .validate(orders, 2)
            .unwrap_err();
        assert!(err.to_string().contains("conditions[2].value"));
    }
}
