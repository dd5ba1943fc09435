// ABOUTME: Anthropic Messages API binding for claude-* models
// ABOUTME: Hoists system messages to the top-level field and decodes content block deltas
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::sse::create_sse_stream;
use super::{
    ChatRequest, ChatResponse, ChatStream, LlmProvider, MessageRole, StreamChunk, TokenUsage,
};
use crate::errors::AppError;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 300;
const VENDOR: &str = "anthropic";

/// The Messages API requires max_tokens; used when the caller sets none
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    model: String,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Streaming event envelope; the `type` field discriminates
#[derive(Debug, Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<AnthropicStreamDelta>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamDelta {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

// ============================================================================
// Provider
// ============================================================================

/// Anthropic Messages API binding
pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a binding with the given API key
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
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

    /// Convert canonical messages to the Messages API shape
    ///
    /// System messages are not legal in the `messages` array; they are
    /// concatenated into the top-level `system` field instead.
    fn build_request(request: &ChatRequest, stream: bool) -> AnthropicRequest {
        let mut system_parts = Vec::new();
        let mut messages = Vec::new();

        for msg in &request.messages {
            match msg.role {
                MessageRole::System => system_parts.push(msg.content.clone()),
                MessageRole::User | MessageRole::Assistant => messages.push(AnthropicMessage {
                    role: msg.role.as_str().to_owned(),
                    content: msg.content.clone(),
                }),
            }
        }

        AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
            stream: stream.then_some(true),
        }
    }

    async fn send(&self, payload: &AnthropicRequest) -> Result<reqwest::Response, AppError> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to reach Anthropic API: {e}");
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

fn parse_error_response(status: reqwest::StatusCode, body: &str) -> AppError {
    serde_json::from_str::<AnthropicErrorResponse>(body).map_or_else(
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
    let event = match serde_json::from_str::<AnthropicStreamEvent>(json_str) {
        Ok(event) => event,
        Err(e) => {
            debug!("Skipping unparseable Anthropic stream event: {e}");
            return None;
        }
    };

    match event.event_type.as_str() {
        "content_block_delta" => {
            let delta = event.delta.and_then(|d| d.text).unwrap_or_default();
            Some(Ok(StreamChunk {
                delta,
                is_final: false,
                finish_reason: None,
            }))
        }
        "message_delta" => {
            let stop_reason = event.delta.and_then(|d| d.stop_reason);
            stop_reason.map(|reason| {
                Ok(StreamChunk {
                    delta: String::new(),
                    is_final: true,
                    finish_reason: Some(reason),
                })
            })
        }
        "message_stop" => Some(Ok(StreamChunk {
            delta: String::new(),
            is_final: true,
            finish_reason: Some("stop".to_owned()),
        })),
        // ping, message_start, content_block_start, content_block_stop
        _ => None,
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
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

        let parsed: AnthropicResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse Anthropic response: {e}");
            AppError::provider(VENDOR, format!("Failed to parse response: {e}"))
        })?;

        let content = parsed
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<String>();

        Ok(ChatResponse {
            content,
            model: parsed.model,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
                total_tokens: u.input_tokens + u.output_tokens,
            }),
            finish_reason: parsed.stop_reason,
        })
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let payload = Self::build_request(request, true);
        let response = self.send(&payload).await?;

        debug!(model = %request.model, "Anthropic stream opened");
        Ok(create_sse_stream(
            response.bytes_stream(),
            parse_stream_data,
            VENDOR,
        ))
    }
}
