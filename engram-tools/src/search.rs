//! Memory search tool.
//!
//! Hybrid retrieval over everything remembered: facts, document chunks,
//! and tables.

use crate::traits::{require_str, result_from_error, usize_arg, Tool, ToolResult};
use async_trait::async_trait;
use engram_memory::{Evidence, HybridRetrieval};
use serde_json::json;
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 5;

/// Hybrid memory search tool.
pub struct MemorySearchTool {
    retrieval: Arc<HybridRetrieval>,
}

impl MemorySearchTool {
    pub fn new(retrieval: Arc<HybridRetrieval>) -> Self {
        Self { retrieval }
    }
}

/// Render evidence as numbered observation lines.
pub(crate) fn render_evidence(evidence: &[Evidence]) -> String {
    if evidence.is_empty() {
        return "No matching memories found.".to_string();
    }
    evidence
        .iter()
        .enumerate()
        .map(|(i, ev)| {
            format!(
                "{}. [{} {:.2}] {}",
                i + 1,
                ev.source,
                ev.score,
                ev.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search long-term memory for facts, notes, and document content \
        relevant to a query. Combines semantic and relationship search."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult> {
        let query = require_str(&args, "query")?;
        let limit = usize_arg(&args, "limit", DEFAULT_LIMIT);

        match self.retrieval.retrieve(query, limit, None, None).await {
            Ok(outcome) => {
                let mut output = render_evidence(&outcome.evidence);
                if !outcome.degraded.is_empty() {
                    let names: Vec<String> =
                        outcome.degraded.iter().map(ToString::to_string).collect();
                    output.push_str(&format!(
                        "\n(note: {} search unavailable, results may be incomplete)",
                        names.join(", ")
                    ));
                }
                Ok(ToolResult::success(output))
            }
            Err(e) => Ok(result_from_error(&e)),
        }
    }
}
