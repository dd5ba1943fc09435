// ABOUTME: Google Gemini API binding for gemini-* models
// ABOUTME: Maps canonical roles to user/model and decodes candidate part streams
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

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 300;
const VENDOR: &str = "google";

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

// ============================================================================
// Provider
// ============================================================================

/// Google Gemini API binding
pub struct GoogleProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GoogleProvider {
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

    /// Convert canonical messages to Gemini contents
    ///
    /// Gemini names the assistant role `model` and takes system text through
    /// a dedicated `systemInstruction` field.
    fn build_request(request: &ChatRequest) -> GeminiRequest {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for msg in &request.messages {
            match msg.role {
                MessageRole::System => system_parts.push(GeminiPart {
                    text: msg.content.clone(),
                }),
                MessageRole::User | MessageRole::Assistant => {
                    let role = if msg.role == MessageRole::User {
                        "user"
                    } else {
                        "model"
                    };
                    contents.push(GeminiContent {
                        role: role.to_owned(),
                        parts: vec![GeminiPart {
                            text: msg.content.clone(),
                        }],
                    });
                }
            }
        }

        GeminiRequest {
            contents,
            system_instruction: (!system_parts.is_empty())
                .then(|| GeminiSystemInstruction { parts: system_parts }),
            generation_config: request
                .max_tokens
                .map(|max_output_tokens| GeminiGenerationConfig { max_output_tokens }),
        }
    }

    async fn send(&self, url: String, payload: &GeminiRequest) -> Result<reqwest::Response, AppError> {
        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to reach Gemini API: {e}");
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
    serde_json::from_str::<GeminiErrorResponse>(body).map_or_else(
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

fn candidate_text(candidate: &GeminiCandidate) -> String {
    candidate
        .content
        .as_ref()
        .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect::<String>())
        .unwrap_or_default()
}

fn parse_stream_data(json_str: &str) -> Option<Result<StreamChunk, AppError>> {
    let response = match serde_json::from_str::<GeminiResponse>(json_str) {
        Ok(response) => response,
        Err(e) => {
            debug!("Skipping unparseable Gemini stream event: {e}");
            return None;
        }
    };

    let candidate = response.candidates.first()?;
    let delta = candidate_text(candidate);
    let finish_reason = candidate.finish_reason.clone();

    Some(Ok(StreamChunk {
        delta,
        is_final: finish_reason.is_some(),
        finish_reason,
    }))
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        VENDOR
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, request.model
        );
        let payload = Self::build_request(request);
        let response = self.send(url, &payload).await?;

        let body = response
            .text()
            .await
            .map_err(|e| AppError::provider(VENDOR, format!("Failed to read response: {e}")))?;

        let parsed: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            error!("Failed to parse Gemini response: {e}");
            AppError::provider(VENDOR, format!("Failed to parse response: {e}"))
        })?;

        let candidate = parsed
            .candidates
            .first()
            .ok_or_else(|| AppError::provider(VENDOR, "API returned no candidates"))?;

        Ok(ChatResponse {
            content: candidate_text(candidate),
            model: request.model.clone(),
            usage: parsed.usage_metadata.map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            }),
            finish_reason: candidate.finish_reason.clone(),
        })
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, request.model
        );
        let payload = Self::build_request(request);
        let response = self.send(url, &payload).await?;

        debug!(model = %request.model, "Gemini stream opened");
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
    use crate::llm::ChatMessage;

    #[test]
    fn test_assistant_role_mapped_to_model() {
        let request = ChatRequest::new(
            vec![
                ChatMessage::system("Be brief."),
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello"),
            ],
            "gemini-2.0-flash",
        )
        .with_max_tokens(128);
        let wire = GoogleProvider::build_request(&request);
        assert!(wire.system_instruction.is_some());
        assert_eq!(wire.contents.len(), 2);
        assert_eq!(wire.contents[0].role, "user");
        assert_eq!(wire.contents[1].role, "model");
        assert_eq!(
            wire.generation_config.map(|c| c.max_output_tokens),
            Some(128)
        );
    }

    #[test]
    fn test_parse_stream_candidate() {
        let json = r#"{"candidates":[{"content":{"parts":[{"text":"Hi"}],"role":"model"}}]}"#;
        let chunk = parse_stream_data(json).unwrap().unwrap();
        assert_eq!(chunk.delta, "Hi");
        assert!(!chunk.is_final);
    }

    #[test]
    fn test_parse_stream_final_candidate() {
        let json = r#"{"candidates":[{"content":{"parts":[{"text":"!"}]},"finishReason":"STOP"}]}"#;
        let chunk = parse_stream_data(json).unwrap().unwrap();
        assert_eq!(chunk.delta, "!");
        assert!(chunk.is_final);
    }

    #[test]
    fn test_empty_candidates_skipped() {
        assert!(parse_stream_data(r#"{"candidates":[]}"#).is_none());
        assert!(parse_stream_data("garbage").is_none());
    }
}
