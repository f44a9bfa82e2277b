//! Error taxonomy for the Engram memory system.
//!
//! Each variant maps to a distinct propagation policy:
//! - `ParseFailure` is fatal and never retried
//! - `EmbeddingFailure` is retried, then degrades a single item to text-only
//! - `StoreUnavailable` is retried with bounded backoff, then surfaced
//! - `ToolExecution` is recoverable and surfaced to the reasoning loop as
//!   an observation rather than a crash
//! - `IterationBudgetExceeded` aborts the reasoning loop with a partial answer

use thiserror::Error;

/// Result type alias using the Engram error type.
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Unified error type for the Engram core.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Malformed source document; fatal, reported to the caller.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Embedding provider failed for one or more texts.
    #[error("embedding failure: {0}")]
    EmbeddingFailure(String),

    /// A backing store (graph or vector) could not be reached.
    #[error("{store} store unavailable: {reason}")]
    StoreUnavailable { store: String, reason: String },

    /// A memory tool failed in a way the reasoning loop can recover from.
    #[error("tool '{tool}' failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// The reasoning loop hit its iteration ceiling.
    #[error("iteration budget of {budget} exceeded")]
    IterationBudgetExceeded { budget: usize },

    /// Referenced node does not exist (or is soft-deleted).
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller-supplied input was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The caller cancelled the operation between steps.
    #[error("operation cancelled")]
    Cancelled,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MemoryError {
    /// Convenience constructor for store failures.
    pub fn store_unavailable(store: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable {
            store: store.into(),
            reason: reason.to_string(),
        }
    }

    /// Convenience constructor for tool failures.
    pub fn tool(tool: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether a bounded retry with backoff is worth attempting.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::EmbeddingFailure(_)
        )
    }

    /// Whether the reasoning loop may continue after observing this error.
    pub const fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::ParseFailure(_) | Self::IterationBudgetExceeded { .. }
        )
    }
}
