//! Engram Tools - memory capabilities exposed to the reasoning loop.
//!
//! Each tool wraps one memory operation behind the uniform `Tool` trait so
//! the loop can discover, describe, and invoke them generically.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod add;
pub mod delete;
pub mod documents;
pub mod list;
pub mod search;
pub mod traits;
pub mod update;

// Re-export commonly used types
pub use add::MemoryAddTool;
pub use delete::MemoryDeleteTool;
pub use documents::DocumentsSearchTool;
pub use list::MemoryListTool;
pub use search::MemorySearchTool;
pub use traits::{result_from_error, Tool, ToolResult, ToolSpec};
pub use update::MemoryUpdateTool;

use engram_memory::{FactStore, HybridRetrieval};
use std::sync::Arc;

/// Build the standard memory toolset.
pub fn standard_tools(
    retrieval: Arc<HybridRetrieval>,
    facts: Arc<FactStore>,
) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(MemorySearchTool::new(retrieval.clone())),
        Arc::new(DocumentsSearchTool::new(retrieval)),
        Arc::new(MemoryAddTool::new(facts.clone())),
        Arc::new(MemoryUpdateTool::new(facts.clone())),
        Arc::new(MemoryDeleteTool::new(facts.clone())),
        Arc::new(MemoryListTool::new(facts)),
    ]
}
