//! Memory update tool.

use crate::traits::{require_str, result_from_error, Tool, ToolResult};
use async_trait::async_trait;
use engram_memory::FactStore;
use serde_json::json;
use std::sync::Arc;

/// Replaces a remembered fact, keeping the old version as history.
pub struct MemoryUpdateTool {
    facts: Arc<FactStore>,
}

impl MemoryUpdateTool {
    pub fn new(facts: Arc<FactStore>) -> Self {
        Self { facts }
    }
}

#[async_trait]
impl Tool for MemoryUpdateTool {
    fn name(&self) -> &str {
        "memory_update"
    }

    fn description(&self) -> &str {
        "Replace an outdated fact with a corrected statement. The old \
        version is kept as history but never returned by search."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "fact_id": {
                    "type": "string",
                    "description": "Id of the fact to replace"
                },
                "statement": {
                    "type": "string",
                    "description": "The corrected statement"
                }
            },
            "required": ["fact_id", "statement"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let fact_id = require_str(&args, "fact_id")?;
        let statement = require_str(&args, "statement")?;

        match self.facts.update(fact_id, statement).await {
            Ok(report) if report.deduplicated => Ok(ToolResult::success(format!(
                "Fact {} already says that, nothing changed",
                report.fact_id
            ))),
            Ok(report) => Ok(ToolResult::success(format!(
                "Updated (new id {})",
                report.fact_id
            ))),
            Err(e) => Ok(result_from_error(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_common::IngestionConfig;
    use engram_memory::{HashedEmbedding, InMemoryVectorStore, SqliteGraph};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<FactStore>, MemoryUpdateTool) {
        let tmp = TempDir::new().unwrap();
        let graph = Arc::new(SqliteGraph::open(tmp.path()).unwrap());
        let facts = Arc::new(FactStore::new(
            graph,
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashedEmbedding::new(16)),
            IngestionConfig::default(),
        ));
        (tmp, facts.clone(), MemoryUpdateTool::new(facts))
    }

    #[tokio::test]
    async fn updates_existing_fact() {
        let (_tmp, facts, tool) = setup();
        let report = facts.add("deadline is March 1", &[]).await.unwrap();

        let result = tool
            .execute(json!({"fact_id": report.fact_id, "statement": "deadline is April 1"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.starts_with("Updated"));

        let listed = facts.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].snippet, "deadline is April 1");
    }

    #[tokio::test]
    async fn unknown_fact_is_a_recoverable_failure() {
        let (_tmp, _facts, tool) = setup();
        let result = tool
            .execute(json!({"fact_id": "no-such-id", "statement": "whatever"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(!result.store_unavailable);
        assert!(result.error.unwrap().contains("not found"));
    }
}
