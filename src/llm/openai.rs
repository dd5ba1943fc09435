// ABOUTME: OpenAI chat completions binding for gpt-* models
// ABOUTME: Translates canonical requests to the /v1/chat/completions wire format
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::sse::create_sse_stream;
use super::{ChatMessage, ChatRequest, ChatResponse, ChatStream, LlmProvider, StreamChunk, TokenUsage};
use crate::errors::AppError;

const API_BASE: &str = "https://api.openai.com/v1";
const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 300;
const VENDOR: &str = "openai";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for OpenAiMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_owned(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamEvent {
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

// ============================================================================
// Provider
// ============================================================================

/// OpenAI chat completions binding
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a binding with the given API key
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: &str) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client()?,
            api_key: api_key.to_owned(),
            base_url: API_BASE.to_owned(),
        })
    }

    /// Override the API base URL (local test servers)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request(request: &ChatRequest, stream: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(OpenAiMessage::from).collect(),
            max_tokens: request.max_tokens,
            stream: stream.then_some(true),
        }
    }

    async fn send(&self, payload: &OpenAiRequest) -> Result<reqwest::Response, AppError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to reach OpenAI API: {e}");
                AppError::provider(VENDOR, format!("Failed to connect: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error_response(status, &body));
        }

        Ok(response)
    }
}

fn build_client() -> Result<Client, AppError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))
}

fn parse_error_response(status: reqwest::StatusCode, body: &str) -> AppError {
    serde_json::from_str::<OpenAiErrorResponse>(body).map_or_else(
        |_| {
            AppError::provider(
                VENDOR,
                format!(
                    "API error ({status}): {}",
                    body.chars().take(200).collect::<String>()
                ),
            )
        },
        |parsed| AppError::provider(VENDOR, format!("({status}) {}", parsed.error.message)),
    )
}

fn parse_stream_data(json_str: &str) -> Option<Result<StreamChunk, AppError>> {
    match serde_json::from_str::<OpenAiStreamEvent>(json_str) {
        Ok(event) => {
            let choice = event.choices.into_iter().next()?;
            Some(Ok(StreamChunk {
                delta: choice.delta.content.unwrap_or_default(),
                is_final: choice.finish_reason.is_some(),
                finish_reason: choice.finish_reason,
            }))
        }
        Err(e) => {
            debug!("Skipping unparseable OpenAI stream event: {e}");
            None
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        VENDOR
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        let payload = Self::build_request(request, false);
        let response = self.send(&payload).await?;

        let body = response
            .text()
            .await
            .map_err(|e| AppError::provider(VENDOR, format!("Failed to read response: {e}")))?;

        let parsed: OpenAiResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse OpenAI response: {e}");
            AppError::provider(VENDOR, format!("Failed to parse response: {e}"))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::provider(VENDOR, "API returned no choices"))?;

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            model: parsed.model,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            finish_reason: choice.finish_reason,
        })
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let payload = Self::build_request(request, true);
        let response = self.send(&payload).await?;

        debug!(model = %request.model, "OpenAI stream opened");
        Ok(create_sse_stream(
            response.bytes_stream(),
            parse_stream_data,
            VENDOR,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_delta() {
        let json = r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        let chunk = parse_stream_data(json).unwrap().unwrap();
        assert_eq!(chunk.delta, "Hel");
        assert!(!chunk.is_final);
    }

    #[test]
    fn test_parse_stream_final_chunk() {
        let json = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        let chunk = parse_stream_data(json).unwrap().unwrap();
        assert!(chunk.delta.is_empty());
        assert!(chunk.is_final);
        assert_eq!(chunk.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_malformed_stream_event_skipped() {
        assert!(parse_stream_data("not json").is_none());
        assert!(parse_stream_data(r#"{"choices":[]}"#).is_none());
    }

    #[test]
    fn test_error_body_parsing() {
        let err = parse_error_response(
            reqwest::StatusCode::UNAUTHORIZED,
            r#"{"error":{"message":"Incorrect API key"}}"#,
        );
        assert!(err.message.contains("Incorrect API key"));
    }
}
