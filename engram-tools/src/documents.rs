//! Document search tool.
//!
//! Like memory search, restricted to ingested document content (chunks
//! and tables), excluding conversational facts.

use crate::search::render_evidence;
use crate::traits::{require_str, result_from_error, usize_arg, Tool, ToolResult};
use async_trait::async_trait;
use engram_memory::{HybridRetrieval, KindFilter};
use serde_json::json;
use std::sync::Arc;

const DEFAULT_LIMIT: usize = 5;

/// Document-scoped search tool.
pub struct DocumentsSearchTool {
    retrieval: Arc<HybridRetrieval>,
}

impl DocumentsSearchTool {
    pub fn new(retrieval: Arc<HybridRetrieval>) -> Self {
        Self { retrieval }
    }
}

#[async_trait]
impl Tool for DocumentsSearchTool {
    fn name(&self) -> &str {
        "documents_search"
    }

    fn description(&self) -> &str {
        "Search only ingested documents (sections, text, tables), ignoring \
        remembered conversational facts."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for in documents"
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

        match self
            .retrieval
            .retrieve(query, limit, Some(KindFilter::documents()), None)
            .await
        {
            Ok(outcome) => Ok(ToolResult::success(render_evidence(&outcome.evidence))),
            Err(e) => Ok(result_from_error(&e)),
        }
    }
}
