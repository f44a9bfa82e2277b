//! Memory delete tool.

use crate::traits::{require_str, result_from_error, Tool, ToolResult};
use async_trait::async_trait;
use engram_memory::FactStore;
use serde_json::json;
use std::sync::Arc;

/// Forgets a remembered fact.
pub struct MemoryDeleteTool {
    facts: Arc<FactStore>,
}

impl MemoryDeleteTool {
    pub fn new(facts: Arc<FactStore>) -> Self {
        Self { facts }
    }
}

#[async_trait]
impl Tool for MemoryDeleteTool {
    fn name(&self) -> &str {
        "memory_delete"
    }

    fn description(&self) -> &str {
        "Forget a remembered fact. It stops appearing in search immediately."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "fact_id": {
                    "type": "string",
                    "description": "Id of the fact to forget"
                }
            },
            "required": ["fact_id"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let fact_id = require_str(&args, "fact_id")?;
        match self.facts.delete(fact_id).await {
            Ok(()) => Ok(ToolResult::success(format!("Forgot fact {fact_id}"))),
            Err(e) => Ok(result_from_error(&e)),
        }
    }
}
