//! Engram Agent - bounded tool-calling reasoning loop.
//!
//! The executor drives a language model against the memory tools: each
//! iteration produces either one tool call or a final answer, with hard
//! ceilings on iterations, provider retries, and store failures.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod executor;
pub mod provider;

// Re-export commonly used types
pub use executor::{parse_tool_call, AgentExecutor, AgentOutcome, LoopState, ToolCall};
pub use provider::{LlmProvider, OpenAiProvider};
