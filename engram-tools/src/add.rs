//! Memory add tool.

use crate::traits::{require_str, result_from_error, Tool, ToolResult};
use async_trait::async_trait;
use engram_memory::FactStore;
use serde_json::json;
use std::sync::Arc;

/// Stores a conversational fact with its mentioned entities.
pub struct MemoryAddTool {
    facts: Arc<FactStore>,
}

impl MemoryAddTool {
    pub fn new(facts: Arc<FactStore>) -> Self {
        Self { facts }
    }
}

#[async_trait]
impl Tool for MemoryAddTool {
    fn name(&self) -> &str {
        "memory_add"
    }

    fn description(&self) -> &str {
        "Remember a fact from the conversation. Include the people, projects, \
        or concepts it mentions so related memories link together."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "statement": {
                    "type": "string",
                    "description": "The fact to remember, as one sentence"
                },
                "entities": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Names of people/projects/concepts the fact mentions"
                }
            },
            "required": ["statement"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let statement = require_str(&args, "statement")?;
        let entities: Vec<String> = args
            .get("entities")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        match self.facts.add(statement, &entities).await {
            Ok(report) if report.deduplicated => Ok(ToolResult::success(format!(
                "Already remembered (id {})",
                report.fact_id
            ))),
            Ok(report) => Ok(ToolResult::success(format!(
                "Remembered (id {})",
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

    fn setup() -> (TempDir, MemoryAddTool) {
        let tmp = TempDir::new().unwrap();
        let graph = Arc::new(SqliteGraph::open(tmp.path()).unwrap());
        let facts = Arc::new(FactStore::new(
            graph,
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashedEmbedding::new(16)),
            IngestionConfig::default(),
        ));
        (tmp, MemoryAddTool::new(facts))
    }

    #[tokio::test]
    async fn adds_and_deduplicates() {
        let (_tmp, tool) = setup();
        let first = tool
            .execute(json!({"statement": "Bob owns the billing migration", "entities": ["Bob"]}))
            .await
            .unwrap();
        assert!(first.success);
        assert!(first.output.starts_with("Remembered"));

        let second = tool
            .execute(json!({"statement": "bob OWNS the billing migration"}))
            .await
            .unwrap();
        assert!(second.success);
        assert!(second.output.starts_with("Already remembered"));
    }

    #[tokio::test]
    async fn empty_statement_fails_gracefully() {
        let (_tmp, tool) = setup();
        let result = tool.execute(json!({"statement": "  "})).await.unwrap();
        assert!(!result.success);
        assert!(!result.store_unavailable);
    }
}
