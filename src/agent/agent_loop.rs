//! LLM-driven search loop.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::extract_projects;
use crate::llm::{ChatMessage, LlmClient, Role, ToolCall};
use crate::marketplace::SearchError;
use crate::tools::{ToolRegistry, QUERY_FREELANCER};

use super::prompt::{build_system_prompt, build_task};
use super::{JobSearch, SearchOutcome};

/// Tool output longer than this is cut before it goes back to the model.
const MAX_TOOL_RESULT_CHARS: usize = 20_000;

/// The search agent.
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    model: String,
    max_iterations: usize,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        model: impl Into<String>,
        max_iterations: usize,
    ) -> Self {
        Self {
            llm,
            tools,
            model: model.into(),
            max_iterations,
        }
    }

    /// Run one conversation for `term` and collect its outcomes.
    ///
    /// A marketplace failure inside the search tool ends the run with that
    /// error. Other tool errors are reported back to the model.
    pub async fn run_task(&self, term: &str) -> Result<Vec<SearchOutcome>, SearchError> {
        let run_id = Uuid::new_v4();
        let mut outcomes = Vec::new();
        let mut messages = vec![
            ChatMessage::system(build_system_prompt(&self.tools)),
            ChatMessage::user(build_task(term)),
        ];
        let tool_schemas = self.tools.get_tool_schemas();

        for iteration in 0..self.max_iterations {
            tracing::debug!(%run_id, "Agent iteration {}", iteration + 1);

            let response = self
                .llm
                .chat_completion(&self.model, &messages, Some(&tool_schemas))
                .await
                .map_err(|e| SearchError::Orchestration(format!("{:#}", e)))?;

            if let Some(text) = response.content.as_deref().map(str::trim) {
                if !text.is_empty() {
                    tracing::info!(%run_id, "Agent: {}", text);
                    outcomes.push(SearchOutcome::Narrative {
                        text: text.to_string(),
                    });
                }
            }

            let tool_calls = response.tool_calls.clone().unwrap_or_default();
            if tool_calls.is_empty() {
                return Ok(outcomes);
            }

            messages.push(ChatMessage {
                role: Role::Assistant,
                content: response.content.clone(),
                tool_calls: Some(tool_calls.clone()),
                tool_call_id: None,
            });

            for tool_call in &tool_calls {
                tracing::debug!(
                    %run_id,
                    "Calling tool: {} with args: {}",
                    tool_call.function.name,
                    tool_call.function.arguments
                );

                let result_str = match self.execute_tool_call(tool_call).await {
                    Ok(output) => {
                        if tool_call.function.name == QUERY_FREELANCER {
                            let projects = extract_projects(&output)?;
                            tracing::info!(%run_id, "Tool returned {} projects", projects.len());
                            outcomes.push(SearchOutcome::Structured { projects });
                        }
                        output.to_string()
                    }
                    Err(e) => match e.downcast::<SearchError>() {
                        Ok(SearchError::EmptyQuery) => {
                            tracing::warn!(%run_id, "Model sent an empty query");
                            format!("Error: {}", SearchError::EmptyQuery)
                        }
                        Ok(marketplace_error) => {
                            tracing::error!(%run_id, "Marketplace search failed: {}", marketplace_error);
                            return Err(marketplace_error);
                        }
                        Err(e) => {
                            tracing::warn!(%run_id, "Tool {} failed: {}", tool_call.function.name, e);
                            format!("Error: {}", e)
                        }
                    },
                };

                messages.push(ChatMessage::tool_result(
                    tool_call.id.clone(),
                    truncate_for_model(&result_str, MAX_TOOL_RESULT_CHARS),
                ));
            }
        }

        tracing::warn!(
            %run_id,
            "Max iterations ({}) reached without a final answer",
            self.max_iterations
        );
        Ok(outcomes)
    }

    async fn execute_tool_call(&self, tool_call: &ToolCall) -> anyhow::Result<Value> {
        let args: Value =
            serde_json::from_str(&tool_call.function.arguments).unwrap_or(Value::Null);
        self.tools.execute(&tool_call.function.name, args).await
    }
}

#[async_trait]
impl JobSearch for Agent {
    async fn search(&self, term: &str) -> Result<Vec<SearchOutcome>, SearchError> {
        self.run_task(term).await
    }
}

/// Cut `s` to at most `max_len` bytes on a character boundary.
fn truncate_for_model(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}
