//! Memory list tool.

use crate::traits::{result_from_error, usize_arg, Tool, ToolResult};
use async_trait::async_trait;
use engram_memory::FactStore;
use serde_json::json;
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 20;

/// Lists current remembered facts, newest first.
pub struct MemoryListTool {
    facts: Arc<FactStore>,
}

impl MemoryListTool {
    pub fn new(facts: Arc<FactStore>) -> Self {
        Self { facts }
    }
}

#[async_trait]
impl Tool for MemoryListTool {
    fn name(&self) -> &str {
        "memory_list"
    }

    fn description(&self) -> &str {
        "List remembered facts with their ids, newest first. Use the ids \
        with memory_update or memory_delete."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of facts (default 20)"
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let limit = usize_arg(&args, "limit", DEFAULT_LIMIT);
        match self.facts.list(limit).await {
            Ok(facts) if facts.is_empty() => {
                Ok(ToolResult::success("No facts remembered yet.".to_string()))
            }
            Ok(facts) => {
                let lines: Vec<String> = facts
                    .iter()
                    .map(|f| format!("- [{}] {}", f.id, f.snippet))
                    .collect();
                Ok(ToolResult::success(lines.join("\n")))
            }
            Err(e) => Ok(result_from_error(&e)),
        }
    }
}
