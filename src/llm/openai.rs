//! OpenAI-compatible chat-completions client.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, ChatResponse, LlmClient, ToolSchema};
use crate::http::HttpPolicy;

pub struct OpenAiClient {
    client: reqwest::Client,
    policy: HttpPolicy,
    url: String,
    api_key: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolSchema]>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatResponse,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: String, policy: HttpPolicy) -> anyhow::Result<Self> {
        Ok(Self {
            client: policy.client()?,
            policy,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
    ) -> anyhow::Result<ChatResponse> {
        let request = CompletionRequest {
            model,
            messages,
            tools: tools.filter(|t| !t.is_empty()),
        };

        let response = self
            .policy
            .send_with_retry(|| {
                self.client
                    .post(&self.url)
                    .bearer_auth(&self.api_key)
                    .json(&request)
            })
            .await
            .context("Chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completion failed with status {}: {}", status, body);
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .context("Malformed chat completion response")?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| anyhow::anyhow!("Chat completion returned no choices"))
    }
}
