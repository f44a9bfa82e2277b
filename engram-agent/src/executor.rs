//! Bounded tool-calling reasoning loop.
//!
//! Each iteration: call the model, parse at most one tool call from the
//! response, execute it, append the observation, repeat. The loop ends when
//! the model answers in plain text, the iteration ceiling is hit, the
//! store-failure budget is exhausted, or the caller cancels.

use crate::provider::LlmProvider;
use engram_common::AgentConfig;
use engram_tools::{Tool, ToolResult};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Parsed tool call from a model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub args: serde_json::Value,
}

/// Where the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Model produced a plain-text answer.
    Answered,
    /// Iteration ceiling reached; answer is a partial summary.
    BudgetExhausted,
    /// Too many consecutive store failures, or the caller cancelled.
    Aborted,
}

/// Final output of one reasoning run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub answer: String,
    pub state: LoopState,
    pub iterations: usize,
    /// Present for non-`Answered` states; says what went wrong.
    pub diagnostic: Option<String>,
}

/// Tool-calling loop over the memory tools.
pub struct AgentExecutor {
    provider: Arc<dyn LlmProvider>,
    tools: Vec<Arc<dyn Tool>>,
    config: AgentConfig,
}

impl AgentExecutor {
    pub fn new(provider: Arc<dyn LlmProvider>, tools: Vec<Arc<dyn Tool>>, config: AgentConfig) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    /// Run the loop for one user message.
    pub async fn run(&self, user_message: &str, cancel: &CancellationToken) -> AgentOutcome {
        let system_prompt = self.build_system_prompt();
        let mut transcript = vec![format!("User: {user_message}")];
        let mut consecutive_store_failures = 0usize;
        let mut iterations = 0usize;

        loop {
            if cancel.is_cancelled() {
                return AgentOutcome {
                    answer: String::new(),
                    state: LoopState::Aborted,
                    iterations,
                    diagnostic: Some("cancelled by caller".into()),
                };
            }
            if iterations >= self.config.max_iterations {
                tracing::warn!(iterations, "Reasoning loop hit its iteration ceiling");
                return AgentOutcome {
                    answer: self.partial_answer(&transcript),
                    state: LoopState::BudgetExhausted,
                    iterations,
                    diagnostic: Some(format!(
                        "stopped after {} iterations without a final answer",
                        self.config.max_iterations
                    )),
                };
            }
            iterations += 1;

            let message = transcript.join("\n\n");
            let response = match self.complete_with_retry(&system_prompt, &message).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(error = %e, "Language model unavailable");
                    return AgentOutcome {
                        answer: String::new(),
                        state: LoopState::Aborted,
                        iterations,
                        diagnostic: Some(format!("language model unavailable: {e}")),
                    };
                }
            };

            let Some(call) = parse_tool_call(&response) else {
                return AgentOutcome {
                    answer: extract_final_answer(&response),
                    state: LoopState::Answered,
                    iterations,
                    diagnostic: None,
                };
            };

            tracing::info!(tool = %call.tool, iteration = iterations, "Executing tool");
            let result = self.execute_tool(&call).await;

            if result.store_unavailable {
                consecutive_store_failures += 1;
                if consecutive_store_failures > self.config.store_failure_budget {
                    tracing::error!(
                        failures = consecutive_store_failures,
                        "Store failure budget exhausted, aborting loop"
                    );
                    return AgentOutcome {
                        answer: self.partial_answer(&transcript),
                        state: LoopState::Aborted,
                        iterations,
                        diagnostic: Some("memory stores unavailable".into()),
                    };
                }
            } else {
                consecutive_store_failures = 0;
            }

            let observation = if result.success {
                format!("Tool '{}' succeeded:\n{}", call.tool, result.output)
            } else {
                format!(
                    "Tool '{}' failed: {}",
                    call.tool,
                    result.error.unwrap_or_else(|| "unknown error".to_string())
                )
            };
            transcript.push(format!("Assistant: {response}"));
            transcript.push(format!("Observation:\n{observation}"));
        }
    }

    async fn complete_with_retry(&self, system: &str, message: &str) -> anyhow::Result<String> {
        let mut last_err = None;
        for attempt in 0..=self.config.provider_retries {
            match self.provider.complete(Some(system), message).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Model call failed");
                    last_err = Some(e);
                    if attempt < self.config.provider_retries {
                        tokio::time::sleep(std::time::Duration::from_millis(
                            200 * (attempt as u64 + 1),
                        ))
                        .await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("model call failed")))
    }

    async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.iter().find(|t| t.name() == call.tool) else {
            return ToolResult::failure(format!(
                "Unknown tool '{}'. Available: {}",
                call.tool,
                self.tools
                    .iter()
                    .map(|t| t.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        };
        match tool.execute(call.args.clone()).await {
            Ok(result) => result,
            Err(e) => ToolResult::failure(format!("Tool '{}' error: {e}", call.tool)),
        }
    }

    /// Summarize what was learned when the loop cannot finish normally.
    fn partial_answer(&self, transcript: &[String]) -> String {
        let observations: Vec<&str> = transcript
            .iter()
            .filter(|entry| entry.starts_with("Observation:"))
            .map(String::as_str)
            .collect();
        if observations.is_empty() {
            "I could not complete the request.".to_string()
        } else {
            format!(
                "I could not finish, but here is what I found so far:\n\n{}",
                observations.join("\n\n")
            )
        }
    }

    fn build_system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You are a personal memory assistant. You remember facts and ingested \
            documents for the user and answer questions from that memory.\n\n\
            ## Tools\n\n\
            To use a tool, respond with exactly one JSON block and nothing else:\n\
            ```json\n{\"tool\": \"tool_name\", \"args\": {\"param\": \"value\"}}\n```\n\
            After each tool call you receive an observation. When you have enough \
            information, answer in plain text without any JSON.\n\n",
        );
        for tool in &self.tools {
            let spec = tool.spec();
            let _ = writeln!(prompt, "**{}**: {}", spec.name, spec.description);
            let _ = writeln!(prompt, "Parameters: {}\n", spec.parameters);
        }
        let _ = writeln!(
            prompt,
            "Current date: {}",
            chrono::Utc::now().format("%Y-%m-%d")
        );
        prompt
    }
}

/// Parse the first tool call in a model response, from a fenced JSON block
/// or inline JSON.
pub fn parse_tool_call(response: &str) -> Option<ToolCall> {
    for block in extract_json_blocks(response) {
        if let Ok(call) = serde_json::from_str::<ToolCall>(&block) {
            return Some(call);
        }
    }

    let patterns = [r#"{"tool":"#, r#"{ "tool":"#, r#"{"tool" :"#];
    for pattern in patterns {
        if let Some(start) = response.find(pattern) {
            let rest = &response[start..];
            if let Some(end) = find_matching_brace(rest) {
                if let Ok(call) = serde_json::from_str::<ToolCall>(&rest[..=end]) {
                    return Some(call);
                }
            }
        }
    }
    None
}

/// Strip JSON artifacts from a final plain-text answer.
fn extract_final_answer(response: &str) -> String {
    let mut result = response.to_string();
    while let Some(start) = result.find("```json") {
        if let Some(end) = result[start + 7..].find("```") {
            let end_pos = start + 7 + end + 3;
            result = format!("{}{}", &result[..start], &result[end_pos..]);
        } else {
            result = result[..start].to_string();
            break;
        }
    }
    result.trim().to_string()
}

/// Extract JSON blocks from markdown code fences.
fn extract_json_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut remaining = text;

    while let Some(start) = remaining.find("```json") {
        let after_marker = &remaining[start + 7..];
        let content_start = usize::from(after_marker.starts_with('\n'));

        if let Some(end) = after_marker[content_start..].find("```") {
            let json_content = &after_marker[content_start..content_start + end];
            blocks.push(json_content.trim().to_string());
            remaining = &after_marker[content_start + end + 3..];
        } else {
            let json_content = after_marker[content_start..].trim();
            if !json_content.is_empty() {
                blocks.push(json_content.to_string());
            }
            break;
        }
    }

    blocks
}

/// Find the index of the matching closing brace.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
