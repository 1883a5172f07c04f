// Identifier Whitelist - Static registry of tables and columns handlers may target
//
// Every handler that turns configuration into a storage target resolves the
// table and column names here first. Identifiers never come from live schema
// introspection and configuration values are never spliced into statements.

use serde_json::Value;

use crate::error::{AutomationError, AutomationResult};

/// Storage type of a whitelisted column. Values are bound as text and cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Numeric,
    Boolean,
    Uuid,
    Timestamp,
    Json,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "bigint",
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::Uuid => "uuid",
            Self::Timestamp => "timestamptz",
            Self::Json => "jsonb",
        }
    }

    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            Self::Integer | Self::Numeric | Self::Timestamp | Self::Text
        )
    }

    /// Whether a resolved configuration value can be stored in this column.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Json, _) => true,
            (Self::Text, Value::String(_) | Value::Number(_) | Value::Bool(_)) => true,
            (Self::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (Self::Integer, Value::String(s)) => s.trim().parse::<i64>().is_ok(),
            (Self::Numeric, Value::Number(_)) => true,
            (Self::Numeric, Value::String(s)) => {
                s.trim().parse::<rust_decimal::Decimal>().is_ok()
            }
            (Self::Boolean, Value::Bool(_)) => true,
            (Self::Boolean, Value::String(s)) => matches!(s.as_str(), "true" | "false"),
            (Self::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s.trim()).is_ok(),
            (Self::Timestamp, Value::String(s)) => {
                chrono::DateTime::parse_from_rfc3339(s.trim()).is_ok()
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGeneration {
    Uuid,
    Sequence,
}

#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    pub primary_key: &'static str,
    pub id_generation: IdGeneration,
    pub status_column: Option<&'static str>,
    /// Natural keys usable for foreign-key lookups
    pub natural_keys: &'static [&'static str],
    pub columns: &'static [(&'static str, ColumnType)],
}

impl TableSpec {
    pub fn column(&self, name: &str) -> AutomationResult<ColumnType> {
        self.columns
            .iter()
            .find(|(col, _)| *col == name)
            .map(|(_, ty)| *ty)
            .ok_or_else(|| {
                AutomationError::validation(
                    name,
                    format!("column '{}' is not writable on '{}'", name, self.name),
                )
            })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(col, _)| *col == name)
    }

    pub fn primary_key_type(&self) -> ColumnType {
        self.column(self.primary_key).unwrap_or(ColumnType::Text)
    }

    pub fn touches_updated_at(&self) -> bool {
        self.has_column("updated_at")
    }
}

use ColumnType::*;

static TABLES: &[TableSpec] = &[
    TableSpec {
        name: "products",
        primary_key: "id",
        id_generation: IdGeneration::Uuid,
        status_column: Some("status"),
        natural_keys: &["sku"],
        columns: &[
            ("id", Uuid),
            ("sku", Text),
            ("name", Text),
            ("description", Text),
            ("category", Text),
            ("unit_price", Numeric),
            ("reorder_level", Integer),
            ("supplier_id", Uuid),
            ("status", Text),
            ("is_active", Boolean),
            ("created_at", Timestamp),
            ("updated_at", Timestamp),
        ],
    },
    TableSpec {
        name: "inventory_items",
        primary_key: "id",
        id_generation: IdGeneration::Uuid,
        status_column: Some("status"),
        natural_keys: &[],
        columns: &[
            ("id", Uuid),
            ("product_id", Uuid),
            ("warehouse", Text),
            ("quantity_on_hand", Integer),
            ("quantity_reserved", Integer),
            ("status", Text),
            ("updated_at", Timestamp),
        ],
    },
    TableSpec {
        name: "orders",
        primary_key: "id",
        id_generation: IdGeneration::Uuid,
        status_column: Some("status"),
        natural_keys: &["order_number"],
        columns: &[
            ("id", Uuid),
            ("order_number", Text),
            ("customer_id", Uuid),
            ("status", Text),
            ("priority", Text),
            ("total_amount", Numeric),
            ("notes", Text),
            ("created_at", Timestamp),
            ("updated_at", Timestamp),
        ],
    },
    TableSpec {
        name: "order_lines",
        primary_key: "id",
        id_generation: IdGeneration::Uuid,
        status_column: Some("status"),
        natural_keys: &[],
        columns: &[
            ("id", Uuid),
            ("order_id", Uuid),
            ("product_id", Uuid),
            ("quantity", Integer),
            ("allocated_quantity", Integer),
            ("unit_price", Numeric),
            ("status", Text),
        ],
    },
    TableSpec {
        name: "customers",
        primary_key: "id",
        id_generation: IdGeneration::Uuid,
        status_column: Some("status"),
        natural_keys: &["email"],
        columns: &[
            ("id", Uuid),
            ("name", Text),
            ("email", Text),
            ("tier", Text),
            ("credit_limit", Numeric),
            ("status", Text),
            ("created_at", Timestamp),
        ],
    },
    TableSpec {
        name: "suppliers",
        primary_key: "id",
        id_generation: IdGeneration::Uuid,
        status_column: Some("status"),
        natural_keys: &["code", "email"],
        columns: &[
            ("id", Uuid),
            ("code", Text),
            ("name", Text),
            ("email", Text),
            ("status", Text),
            ("created_at", Timestamp),
        ],
    },
    TableSpec {
        name: "purchase_orders",
        primary_key: "id",
        id_generation: IdGeneration::Uuid,
        status_column: Some("status"),
        natural_keys: &["po_number"],
        columns: &[
            ("id", Uuid),
            ("po_number", Text),
            ("supplier_id", Uuid),
            ("status", Text),
            ("total_amount", Numeric),
            ("approved_by", Uuid),
            ("metadata", Json),
            ("created_at", Timestamp),
            ("updated_at", Timestamp),
        ],
    },
    TableSpec {
        name: "shipments",
        primary_key: "id",
        id_generation: IdGeneration::Sequence,
        status_column: Some("status"),
        natural_keys: &["tracking_number"],
        columns: &[
            ("id", Integer),
            ("order_id", Uuid),
            ("carrier", Text),
            ("tracking_number", Text),
            ("status", Text),
            ("shipped_at", Timestamp),
        ],
    },
];

/// Look up a whitelisted table by name.
pub fn table(name: &str) -> AutomationResult<&'static TableSpec> {
    TABLES.iter().find(|t| t.name == name).ok_or_else(|| {
        AutomationError::validation("table", format!("table '{}' is not whitelisted", name))
    })
}

pub fn tables() -> &'static [TableSpec] {
    TABLES
}

/// Quote an identifier that has already passed the whitelist.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Read a required table name from a config object and resolve it.
pub fn table_from_config(
    config: &Value,
    key: &str,
) -> AutomationResult<&'static TableSpec> {
    let name = config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AutomationError::validation(key, "is required"))?;
    table(name).map_err(|_| {
        AutomationError::validation(key, format!("table '{}' is not whitelisted", name))
    })
}
