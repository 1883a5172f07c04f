//! Entity storage used by the data-writing handlers.
//!
//! Handlers resolve every table and column through the whitelist before they
//! reach a store. The Postgres store quotes the already validated identifiers
//! and binds each value as text, cast to the column's declared type.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::conditions::{value_text, ConditionOperator, FieldCondition};
use super::whitelist::{quote, ColumnType, IdGeneration, TableSpec};
use crate::error::{StoreError, StoreResult};

pub type Record = Map<String, Value>;

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Update matching rows. Returns rows affected.
    async fn update(
        &self,
        table: &'static TableSpec,
        assignments: &BTreeMap<String, Value>,
        filters: &[FieldCondition],
    ) -> StoreResult<u64>;

    /// Insert one row and return it as stored.
    async fn insert(
        &self,
        table: &'static TableSpec,
        fields: &BTreeMap<String, Value>,
    ) -> StoreResult<Record>;

    async fn select(
        &self,
        table: &'static TableSpec,
        filters: &[FieldCondition],
        limit: i64,
    ) -> StoreResult<Vec<Record>>;
}

fn column_type(table: &TableSpec, column: &str) -> StoreResult<ColumnType> {
    table
        .column(column)
        .map_err(|e| StoreError::Backend(e.to_string()))
}

// ===== Statement building =====

/// A bound parameter. Scalars travel as text, `in` lists as a text array.
#[derive(Debug, Clone, PartialEq)]
pub enum Bind {
    Text(Option<String>),
    TextArray(Vec<String>),
}

fn bind_text(ty: ColumnType, value: &Value) -> Option<String> {
    match (ty, value) {
        (_, Value::Null) => None,
        (ColumnType::Json, v) => Some(v.to_string()),
        (_, v) => Some(value_text(v)),
    }
}

/// Statement text plus its parameters, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Vec<Bind>,
}

impl Statement {
    fn param(&mut self, bind: Bind) -> usize {
        self.binds.push(bind);
        self.binds.len()
    }
}

fn where_clause(
    stmt: &mut Statement,
    table: &TableSpec,
    alias: &str,
    filters: &[FieldCondition],
) -> StoreResult<String> {
    let mut parts = Vec::with_capacity(filters.len());

    for filter in filters {
        let ty = column_type(table, &filter.field)?;
        let col = format!("{}.{}", alias, quote(&filter.field));
        let cast = ty.sql_type();

        let part = match filter.operator {
            ConditionOperator::IsNull => format!("{} IS NULL", col),
            ConditionOperator::IsNotNull => format!("{} IS NOT NULL", col),
            ConditionOperator::Equals => {
                let n = stmt.param(Bind::Text(bind_text(ty, &filter.value)));
                format!("{} = ${}::text::{}", col, n, cast)
            }
            ConditionOperator::NotEquals => {
                let n = stmt.param(Bind::Text(bind_text(ty, &filter.value)));
                format!("{} <> ${}::text::{}", col, n, cast)
            }
            ConditionOperator::Greater => {
                let n = stmt.param(Bind::Text(bind_text(ty, &filter.value)));
                format!("{} > ${}::text::{}", col, n, cast)
            }
            ConditionOperator::Less => {
                let n = stmt.param(Bind::Text(bind_text(ty, &filter.value)));
                format!("{} < ${}::text::{}", col, n, cast)
            }
            ConditionOperator::Contains => {
                let n = stmt.param(Bind::Text(Some(value_text(&filter.value))));
                format!("strpos(lower({}::text), lower(${})) > 0", col, n)
            }
            ConditionOperator::In => {
                let values = filter
                    .value
                    .as_array()
                    .map(|items| items.iter().filter_map(|v| bind_text(ty, v)).collect())
                    .unwrap_or_default();
                let n = stmt.param(Bind::TextArray(values));
                format!("{} = ANY(${}::text[]::{}[])", col, n, cast)
            }
        };
        parts.push(part);
    }

    if parts.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }
}

pub fn build_update(
    table: &TableSpec,
    assignments: &BTreeMap<String, Value>,
    filters: &[FieldCondition],
) -> StoreResult<Statement> {
    if assignments.is_empty() {
        return Err(StoreError::Backend("update without assignments".to_string()));
    }
    if filters.is_empty() {
        return Err(StoreError::Backend(format!(
            "refusing unfiltered update of '{}'",
            table.name
        )));
    }

    let mut stmt = Statement {
        sql: String::new(),
        binds: Vec::new(),
    };

    let mut sets = Vec::with_capacity(assignments.len() + 1);
    for (column, value) in assignments {
        let ty = column_type(table, column)?;
        let n = stmt.param(Bind::Text(bind_text(ty, value)));
        sets.push(format!("{} = ${}::text::{}", quote(column), n, ty.sql_type()));
    }
    if table.touches_updated_at() && !assignments.contains_key("updated_at") {
        sets.push(format!("{} = NOW()", quote("updated_at")));
    }

    let filter_sql = where_clause(&mut stmt, table, "t", filters)?;
    stmt.sql = format!(
        "UPDATE {} AS t SET {}{}",
        quote(table.name),
        sets.join(", "),
        filter_sql
    );
    Ok(stmt)
}

pub fn build_insert(table: &TableSpec, fields: &BTreeMap<String, Value>) -> StoreResult<Statement> {
    let mut stmt = Statement {
        sql: String::new(),
        binds: Vec::new(),
    };

    let mut columns = Vec::with_capacity(fields.len());
    let mut values = Vec::with_capacity(fields.len());
    // BTreeMap keeps column order stable across runs
    for (column, value) in fields {
        let ty = column_type(table, column)?;
        let n = stmt.param(Bind::Text(bind_text(ty, value)));
        columns.push(quote(column));
        values.push(format!("${}::text::{}", n, ty.sql_type()));
    }

    stmt.sql = if columns.is_empty() {
        format!(
            "INSERT INTO {} AS t DEFAULT VALUES RETURNING to_jsonb(t.*)",
            quote(table.name)
        )
    } else {
        format!(
            "INSERT INTO {} AS t ({}) VALUES ({}) RETURNING to_jsonb(t.*)",
            quote(table.name),
            columns.join(", "),
            values.join(", ")
        )
    };
    Ok(stmt)
}

pub fn build_select(
    table: &TableSpec,
    filters: &[FieldCondition],
    limit: i64,
) -> StoreResult<Statement> {
    let mut stmt = Statement {
        sql: String::new(),
        binds: Vec::new(),
    };
    let filter_sql = where_clause(&mut stmt, table, "t", filters)?;
    stmt.sql = format!(
        "SELECT to_jsonb(t.*) FROM {} AS t{} LIMIT {}",
        quote(table.name),
        filter_sql,
        limit.max(0)
    );
    Ok(stmt)
}

// ===== Postgres =====

#[derive(Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    binds: &'q [Bind],
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for bind in binds {
        query = match bind {
            Bind::Text(v) => query.bind(v.as_deref()),
            Bind::TextArray(v) => query.bind(v.as_slice()),
        };
    }
    query
}

fn into_record(value: Value) -> StoreResult<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Backend(format!("expected a row object, got {}", other))),
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn update(
        &self,
        table: &'static TableSpec,
        assignments: &BTreeMap<String, Value>,
        filters: &[FieldCondition],
    ) -> StoreResult<u64> {
        let stmt = build_update(table, assignments, filters)?;
        let result = bind_all(sqlx::query(&stmt.sql), &stmt.binds)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn insert(
        &self,
        table: &'static TableSpec,
        fields: &BTreeMap<String, Value>,
    ) -> StoreResult<Record> {
        let stmt = build_insert(table, fields)?;
        let row = bind_all(sqlx::query(&stmt.sql), &stmt.binds)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;
        into_record(row.try_get::<Value, _>(0)?)
    }

    async fn select(
        &self,
        table: &'static TableSpec,
        filters: &[FieldCondition],
        limit: i64,
    ) -> StoreResult<Vec<Record>> {
        let stmt = build_select(table, filters, limit)?;
        let rows = bind_all(sqlx::query(&stmt.sql), &stmt.binds)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)?;

        rows.into_iter()
            .map(|row| into_record(row.try_get::<Value, _>(0)?))
            .collect()
    }
}

// ===== In-memory =====

/// Entity tables held in memory. Used by `STORAGE_BACKEND=memory` and tests.
#[derive(Default)]
pub struct MemoryEntityStore {
    tables: RwLock<HashMap<&'static str, Vec<Record>>>,
    sequence: std::sync::atomic::AtomicI64,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rows as they would exist in the database.
    pub async fn seed(&self, table: &'static TableSpec, rows: Vec<Value>) {
        let mut tables = self.tables.write().await;
        let entries = tables.entry(table.name).or_default();
        entries.extend(rows.into_iter().filter_map(|r| match r {
            Value::Object(map) => Some(map),
            _ => None,
        }));
    }

    pub async fn rows(&self, table: &'static TableSpec) -> Vec<Record> {
        self.tables
            .read()
            .await
            .get(table.name)
            .cloned()
            .unwrap_or_default()
    }
}

/// Mirror the cast a Postgres column would apply to a text-bound value.
fn coerce(ty: ColumnType, value: &Value) -> Value {
    match (ty, value) {
        (ColumnType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| value.clone()),
        (ColumnType::Numeric, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        (ColumnType::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value.clone(),
        },
        (ColumnType::Text, Value::Number(_) | Value::Bool(_)) => Value::String(value_text(value)),
        _ => value.clone(),
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn update(
        &self,
        table: &'static TableSpec,
        assignments: &BTreeMap<String, Value>,
        filters: &[FieldCondition],
    ) -> StoreResult<u64> {
        // Same preconditions as the SQL path
        build_update(table, assignments, filters)?;

        let mut coerced = Vec::with_capacity(assignments.len());
        for (column, value) in assignments {
            coerced.push((column.clone(), coerce(column_type(table, column)?, value)));
        }

        let now = Value::String(Utc::now().to_rfc3339());
        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.name).or_default();

        let mut affected = 0;
        for row in rows.iter_mut().filter(|r| filters.iter().all(|f| f.matches(r))) {
            for (column, value) in &coerced {
                row.insert(column.clone(), value.clone());
            }
            if table.touches_updated_at() && !assignments.contains_key("updated_at") {
                row.insert("updated_at".to_string(), now.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn insert(
        &self,
        table: &'static TableSpec,
        fields: &BTreeMap<String, Value>,
    ) -> StoreResult<Record> {
        let mut record = Record::new();
        for (column, value) in fields {
            record.insert(column.clone(), coerce(column_type(table, column)?, value));
        }

        if !record.contains_key(table.primary_key) && table.id_generation == IdGeneration::Sequence
        {
            let next = self
                .sequence
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                + 1;
            record.insert(table.primary_key.to_string(), Value::from(next));
        }

        let now = Value::String(Utc::now().to_rfc3339());
        for stamp in ["created_at", "updated_at"] {
            if table.has_column(stamp) && !record.contains_key(stamp) {
                record.insert(stamp.to_string(), now.clone());
            }
        }

        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.name).or_default();

        let pk = record.get(table.primary_key).cloned();
        if let Some(pk) = pk.filter(|v| !v.is_null()) {
            if rows.iter().any(|r| r.get(table.primary_key) == Some(&pk)) {
                return Err(StoreError::UniqueViolation(format!(
                    "duplicate key {}.{} = {}",
                    table.name, table.primary_key, pk
                )));
            }
        }

        rows.push(record.clone());
        Ok(record)
    }

    async fn select(
        &self,
        table: &'static TableSpec,
        filters: &[FieldCondition],
        limit: i64,
    ) -> StoreResult<Vec<Record>> {
        for filter in filters {
            column_type(table, &filter.field)?;
        }

        let tables = self.tables.read().await;
        Ok(tables
            .get(table.name)
            .map(|rows| {
                rows.iter()
                    .filter(|r| filters.iter().all(|f| f.matches(r)))
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
