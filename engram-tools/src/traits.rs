//! Core Tool trait and types.
//!
//! All tools implement the `Tool` trait, providing a uniform interface
//! for the reasoning loop to discover and invoke capabilities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result from executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool succeeded.
    pub success: bool,
    /// Tool output shown to the language model as an observation.
    pub output: String,
    /// Error message if failed.
    pub error: Option<String>,
    /// True when the failure came from an unavailable backing store; the
    /// loop tracks these against its failure budget.
    #[serde(default)]
    pub store_unavailable: bool,
}

impl ToolResult {
    /// Create a successful result.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            store_unavailable: false,
        }
    }

    /// Create a failed result.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            store_unavailable: false,
        }
    }

    /// Create a failed result caused by an unreachable store.
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            store_unavailable: true,
        }
    }
}

/// Classify a memory error into the matching failure result.
pub fn result_from_error(error: &engram_common::MemoryError) -> ToolResult {
    if matches!(error, engram_common::MemoryError::StoreUnavailable { .. }) {
        ToolResult::unavailable(error.to_string())
    } else {
        ToolResult::failure(error.to_string())
    }
}

/// Tool specification for language-model function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Tool name (must match `name()` method).
    pub name: String,
    /// Human-readable description for the model.
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// Trait for memory tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with given arguments.
    ///
    /// Expected failures return a failed `ToolResult`; `Err` is reserved
    /// for bugs the loop cannot present as an observation.
    async fn execute(&self, args: serde_json::Value) -> anyhow::Result<ToolResult>;

    /// Generate a ToolSpec for function calling.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Read a required string argument.
pub fn require_str<'a>(args: &'a serde_json::Value, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing '{key}' parameter"))
}

/// Read an optional positive-integer argument with a default.
pub fn usize_arg(args: &serde_json::Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(serde_json::Value::as_u64)
        .map(|v| v as usize)
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
