//! OpenAI chat-completions client.
//!
//! Structured calls request JSON-object output but return the reply text
//! unparsed. Every response reports the prompt and completion token counts
//! so the governor can charge real usage.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CallError, Generation, Generator, Usage};
use crate::config::LlmConfig;

/// Chat-completions client for one model
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_base: String,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, config: &LlmConfig) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            temperature: config.temperature,
        })
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_input: &str,
        max_tokens: u32,
        json_mode: bool,
    ) -> Result<Generation<String>, CallError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_input,
                },
            ],
            temperature: self.temperature,
            max_tokens,
            response_format: json_mode.then_some(ResponseFormat { kind: "json_object" }),
        };

        debug!(model = %self.model, max_tokens, json_mode, "Sending chat completion");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::from_status(status.as_u16(), body));
        }

        let chat: ChatResponse = response.json().await?;
        into_generation(chat)
    }
}

fn into_generation(chat: ChatResponse) -> Result<Generation<String>, CallError> {
    let usage = chat
        .usage
        .ok_or_else(|| CallError::InvalidResponse("response carries no usage".to_string()))?;
    let output = chat
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| CallError::InvalidResponse("response carries no content".to_string()))?;

    Ok(Generation {
        output,
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    })
}

#[async_trait]
impl Generator for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_structured(
        &self,
        system_prompt: &str,
        user_input: &str,
        max_tokens: u32,
    ) -> Result<Generation<String>, CallError> {
        self.complete(system_prompt, user_input, max_tokens, true).await
    }

    async fn generate_text(
        &self,
        system_prompt: &str,
        user_input: &str,
        max_tokens: u32,
    ) -> Result<Generation<String>, CallError> {
        self.complete(system_prompt, user_input, max_tokens, false).await
    }
}
