// allocate_inventory - Shape an allocation request and hand it to the allocator
//
// The handler owns validation and the mapping of the allocator's answer onto
// ports. Stock locking and reservation belong to the `InventoryAllocator`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::{collaborator, target_id};
use crate::error::{AutomationError, AutomationResult};
use crate::workflows::handler::{
    ensure_object, optional_bool, optional_str, preview, ActionHandler, ManualExecution,
    OutputPorts,
};
use crate::workflows::{ActionResult, ExecutionContext};

const TYPE: &str = "allocate_inventory";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Oldest stock first
    #[default]
    Fifo,
    /// Earliest expiry first
    Fefo,
    Lifo,
    NearestWarehouse,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocationLine {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AllocationRequest {
    pub order_id: String,
    /// Empty means every open line of the order
    pub lines: Vec<AllocationLine>,
    pub strategy: AllocationStrategy,
    pub allow_partial: bool,
    pub priority: AllocationPriority,
    pub warehouse: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocationOutcome {
    pub allocated: Vec<AllocationLine>,
    pub unfilled: Vec<AllocationLine>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryAllocator: Send + Sync {
    async fn allocate(&self, request: &AllocationRequest) -> AutomationResult<AllocationOutcome>;
}

pub struct AllocateInventoryHandler {
    allocator: Option<Arc<dyn InventoryAllocator>>,
}

impl AllocateInventoryHandler {
    pub fn new(allocator: Option<Arc<dyn InventoryAllocator>>) -> Self {
        Self { allocator }
    }

    fn request(config: &Value, context: &ExecutionContext) -> AutomationResult<AllocationRequest> {
        let order_id = match config.get("order_id") {
            None | Some(Value::Null) => target_id(config, context)?,
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(_) => {
                return Err(AutomationError::validation("order_id", "must be a non-empty string"));
            }
        };

        Ok(AllocationRequest {
            order_id,
            lines: lines(config)?,
            strategy: enum_field(config, "strategy")?,
            allow_partial: optional_bool(config, "allow_partial")?,
            priority: enum_field(config, "priority")?,
            warehouse: optional_str(config, "warehouse")?.map(str::to_string),
        })
    }
}

fn enum_field<T>(config: &Value, key: &str) -> AutomationResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match config.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|_| AutomationError::validation(key, format!("unsupported value {}", raw))),
    }
}

fn lines(config: &Value) -> AutomationResult<Vec<AllocationLine>> {
    let lines: Vec<AllocationLine> = match config.get("lines") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| AutomationError::validation("lines", e.to_string()))?,
    };
    for (i, line) in lines.iter().enumerate() {
        if line.product_id.trim().is_empty() {
            return Err(AutomationError::validation(
                format!("lines[{}].product_id", i),
                "is required",
            ));
        }
        if line.quantity <= 0 {
            return Err(AutomationError::validation(
                format!("lines[{}].quantity", i),
                "must be positive",
            ));
        }
    }
    Ok(lines)
}

#[async_trait]
impl ActionHandler for AllocateInventoryHandler {
    fn action_type(&self) -> &'static str {
        TYPE
    }

    fn description(&self) -> &'static str {
        "Reserve stock for an order"
    }

    fn validate(&self, config: &Value) -> AutomationResult<()> {
        ensure_object(config)?;
        lines(config)?;
        enum_field::<AllocationStrategy>(config, "strategy")?;
        enum_field::<AllocationPriority>(config, "priority")?;
        optional_bool(config, "allow_partial")?;
        optional_str(config, "warehouse")?;
        match config.get("order_id") {
            None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
            Some(_) => Err(AutomationError::validation("order_id", "must be a string")),
        }
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

        let allocator = collaborator(&self.allocator, TYPE, "inventory allocator")?;
        let request = Self::request(config, context)?;
        let outcome = allocator.allocate(&request).await?;

        let port = match (outcome.allocated.is_empty(), outcome.unfilled.is_empty()) {
            (_, true) => "allocated",
            (false, false) if request.allow_partial => "partial",
            _ => "unavailable",
        };
        info!(
            order_id = %request.order_id,
            strategy = ?request.strategy,
            port,
            "Inventory allocation finished"
        );

        Ok(ActionResult::branch(
            port,
            Some(json!({
                "order_id": request.order_id,
                "allocated": outcome.allocated,
                "unfilled": outcome.unfilled
            })),
        ))
    }

    fn manual_execution(&self) -> Option<&dyn ManualExecution> {
        Some(self)
    }

    fn output_ports(&self) -> Option<&dyn OutputPorts> {
        Some(self)
    }
}

impl ManualExecution for AllocateInventoryHandler {
    fn manual_parameters(&self) -> &'static [&'static str] {
        &["strategy", "allow_partial", "priority"]
    }
}

impl OutputPorts for AllocateInventoryHandler {
    fn ports(&self) -> &'static [&'static str] {
        &["allocated", "partial", "unavailable", "failure"]
    }
}
