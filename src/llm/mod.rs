// ABOUTME: LLM provider abstraction with canonical chat types and streaming support
// ABOUTME: Resolves model identifiers to vendors and hands out provider bindings
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

//! # LLM Provider Layer
//!
//! A uniform interface over heterogeneous vendor APIs. The relay speaks only
//! canonical types (`ChatMessage`, `ChatRequest`, `StreamChunk`); each vendor
//! binding translates those to its wire format and back.
//!
//! Model identifiers resolve to vendors purely by lexical prefix:
//! `gpt-*` is OpenAI, `claude-*` is Anthropic, `gemini-*` is Google.
//! Everything else is rejected with `UnknownModel` before any row is
//! written or any HTTP call is made.

mod anthropic;
mod google;
mod openai;
pub mod sse;

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;

use crate::errors::{AppError, AppResult};

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction (outbound prompts only; never persisted)
    System,
    /// User input message
    User,
    /// Assistant response message
    Assistant,
}

impl MessageRole {
    /// Convert to string representation for API calls and storage
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse a stored role string
    #[must_use]
    pub fn parse_str(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A single message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: MessageRole,
    /// Content of the message
    pub content: String,
}

impl ChatMessage {
    /// Create a new chat message
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Configuration for a chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation messages, oldest first
    pub messages: Vec<ChatMessage>,
    /// Model identifier
    pub model: String,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Whether to stream the response
    pub stream: bool,
}

impl ChatRequest {
    /// Create a new chat request with messages and a model
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            max_tokens: None,
            stream: false,
        }
    }

    /// Set the maximum tokens
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Enable streaming
    #[must_use]
    pub const fn with_streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Response from a single-shot chat completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated message content
    pub content: String,
    /// Model used for generation
    pub model: String,
    /// Token usage statistics
    pub usage: Option<TokenUsage>,
    /// Finish reason (stop, length, etc.)
    pub finish_reason: Option<String>,
}

/// Token usage statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,
    /// Number of tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
}

/// A fragment of a streaming response
///
/// Fragments are opaque text chunks in vendor-delivered order; no word or
/// sentence boundary is implied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Content delta for this fragment
    pub delta: String,
    /// Whether this is the final fragment
    pub is_final: bool,
    /// Finish reason if final
    pub finish_reason: Option<String>,
}

/// Stream type for chat completion responses
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AppError>> + Send>>;

// ============================================================================
// Provider Trait
// ============================================================================

/// LLM provider trait for chat completion
///
/// One implementation per vendor. Implementations perform exactly one
/// outbound HTTP call per operation and persist nothing.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (matches `ProviderKind::as_str`)
    fn name(&self) -> &'static str;

    /// Perform a chat completion (non-streaming)
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError>;

    /// Perform a streaming chat completion
    ///
    /// The returned stream yields fragments exactly as decoded from the
    /// vendor wire format, in order, with no reordering or batching. The
    /// stream is restartable per call but not resumable mid-stream.
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError>;
}

// ============================================================================
// Provider Resolution
// ============================================================================

/// Known vendor kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions API (gpt-*)
    OpenAi,
    /// Anthropic Messages API (claude-*)
    Anthropic,
    /// Google Gemini API (gemini-*)
    Google,
}

impl ProviderKind {
    /// Resolve a model identifier to its vendor by lexical prefix
    ///
    /// # Errors
    ///
    /// Returns `UnknownModel` for any identifier outside the accepted set.
    pub fn for_model(model: &str) -> AppResult<Self> {
        if model.starts_with("gpt-") {
            Ok(Self::OpenAi)
        } else if model.starts_with("claude-") {
            Ok(Self::Anthropic)
        } else if model.starts_with("gemini-") {
            Ok(Self::Google)
        } else {
            Err(AppError::unknown_model(model))
        }
    }

    /// Provider name used for credential lookup and wire payloads
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
        }
    }

    /// Parse a stored provider name
    #[must_use]
    pub fn parse_str(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "google" => Some(Self::Google),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Provider Factory
// ============================================================================

/// Seam between the relay and concrete provider bindings
///
/// Keys are per-user, so providers are constructed per turn rather than at
/// process startup. Tests substitute a scripted factory here.
pub trait ProviderFactory: Send + Sync {
    /// Create a provider binding for a vendor with the given API key
    ///
    /// # Errors
    ///
    /// Returns an error if the binding cannot be constructed.
    fn create(&self, kind: ProviderKind, api_key: &str) -> AppResult<Arc<dyn LlmProvider>>;
}

/// Production factory backed by the HTTP vendor bindings
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpProviderFactory;

impl ProviderFactory for HttpProviderFactory {
    fn create(&self, kind: ProviderKind, api_key: &str) -> AppResult<Arc<dyn LlmProvider>> {
        Ok(match kind {
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(api_key)?),
            ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(api_key)?),
            ProviderKind::Google => Arc::new(GoogleProvider::new(api_key)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    #[test]
    fn test_resolve_known_prefixes() {
        assert_eq!(
            ProviderKind::for_model("gpt-4o-mini").unwrap(),
            ProviderKind::OpenAi
        );
        assert_eq!(
            ProviderKind::for_model("claude-sonnet-4-20250514").unwrap(),
            ProviderKind::Anthropic
        );
        assert_eq!(
            ProviderKind::for_model("gemini-2.0-flash").unwrap(),
            ProviderKind::Google
        );
    }

    #[test]
    fn test_resolve_rejects_unknown_prefixes() {
        for model in ["llama-3-70b", "mistral-large", "", "gpt4", "claude"] {
            let err = ProviderKind::for_model(model).unwrap_err();
            assert_eq!(err.code, ErrorCode::UnknownModel, "model: {model}");
        }
    }

    #[test]
    fn test_provider_name_round_trip() {
        for kind in [
            ProviderKind::OpenAi,
            ProviderKind::Anthropic,
            ProviderKind::Google,
        ] {
            assert_eq!(ProviderKind::parse_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ProviderKind::parse_str("azure"), None);
    }

    #[test]
    fn test_message_role_round_trip() {
        for role in [MessageRole::System, MessageRole::User, MessageRole::Assistant] {
            assert_eq!(MessageRole::parse_str(role.as_str()), Some(role));
        }
        assert_eq!(MessageRole::parse_str("tool"), None);
    }

    #[test]
    fn test_chat_request_builder() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")], "gpt-4o-mini")
            .with_max_tokens(64)
            .with_streaming();
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.max_tokens, Some(64));
        assert!(request.stream);
    }
}
