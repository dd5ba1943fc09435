// ABOUTME: Streaming relay orchestrating one chat turn from validation to finalize
// ABOUTME: Persists the user message and placeholder, pumps vendor fragments, flushes once
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

//! # Streaming Relay
//!
//! One turn moves through a fixed sequence: validate the input, resolve the
//! vendor from the model prefix, load the caller's credential, resolve or
//! create the conversation, persist the user message, create an empty
//! assistant placeholder, then stream.
//!
//! All validation happens before any row is written, so a rejected turn
//! leaves the store untouched. Once streaming begins the placeholder row
//! already exists; the accumulated text is flushed into it with a single
//! write at the end of the stream (success or failure), never per fragment.
//!
//! Generation runs on a spawned producer task that feeds a bounded channel;
//! the consumer side turns fragments into relay events. Dropping the event
//! stream cancels the producer through a `CancellationToken`, so an
//! abandoned client connection stops the vendor call instead of draining it
//! in the background.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::database::{ChatManager, ConversationRecord, CredentialManager, MessageRecord};
use crate::errors::{AppError, AppResult};
use crate::llm::{
    ChatMessage, ChatRequest, LlmProvider, MessageRole, ProviderFactory, ProviderKind, StreamChunk,
};

/// Fragments buffered between the producer task and the event stream
const CHANNEL_CAPACITY: usize = 32;

/// Characters of the first prompt used for the provisional title
const TITLE_MAX_CHARS: usize = 48;

/// Title used when the first prompt is all whitespace after truncation
const FALLBACK_TITLE: &str = "New conversation";

/// Token budget for the post-turn title generation call
const TITLE_GEN_MAX_TOKENS: u32 = 24;

// ============================================================================
// Events
// ============================================================================

/// Wire events emitted over the turn's SSE stream
///
/// Exactly one `start`, zero or more `token`, then exactly one terminal
/// `done` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayEvent {
    /// Stream opened; identifiers the client needs to track the turn
    Start {
        /// Conversation the turn belongs to
        #[serde(rename = "conversationId")]
        conversation_id: String,
        /// Placeholder message being filled
        #[serde(rename = "messageId")]
        message_id: String,
        /// Whether this turn created the conversation
        #[serde(rename = "isFirstMessage")]
        is_first_message: bool,
    },
    /// One response fragment, in vendor order
    Token {
        /// Fragment text; opaque, no boundary implied
        content: String,
    },
    /// Turn completed and the assistant message was persisted
    Done {
        /// Conversation the turn belongs to
        #[serde(rename = "conversationId")]
        conversation_id: String,
        /// Message that now holds the full response
        #[serde(rename = "messageId")]
        message_id: String,
    },
    /// Turn failed after the stream opened
    Error {
        /// Human-readable failure description
        error: String,
    },
}

// ============================================================================
// Turn Input / Prepared State
// ============================================================================

/// Validated-but-unchecked input for one turn
#[derive(Debug, Clone)]
pub struct TurnInput {
    /// Existing conversation to continue, or `None` to start a new one
    pub conversation_id: Option<String>,
    /// User prompt text
    pub message: String,
    /// Model identifier; resolved to a vendor by prefix
    pub model: String,
}

/// State assembled by [`StreamingRelay::prepare_turn`]
///
/// Holding one of these means every precondition passed and the user
/// message and placeholder rows exist.
#[derive(Debug)]
pub struct PreparedTurn {
    /// Owner of the turn
    pub user_id: String,
    /// Resolved vendor
    pub kind: ProviderKind,
    /// The caller's API key for that vendor
    api_key: String,
    /// Model identifier to send to the vendor
    pub model: String,
    /// Conversation the turn runs in
    pub conversation: ConversationRecord,
    /// Whether this turn created the conversation
    pub is_first_message: bool,
    /// Persisted user message
    pub user_message: MessageRecord,
    /// Empty assistant placeholder awaiting content
    pub placeholder: MessageRecord,
}

/// Result of a completed non-streaming turn
#[derive(Debug)]
pub struct TurnResult {
    /// Conversation the turn ran in
    pub conversation_id: String,
    /// Whether this turn created the conversation
    pub is_first_message: bool,
    /// Persisted user message
    pub user_message: MessageRecord,
    /// Assistant message with its final content
    pub assistant_message: MessageRecord,
}

// ============================================================================
// Relay
// ============================================================================

/// Orchestrates chat turns against the store and the vendor bindings
#[derive(Clone)]
pub struct StreamingRelay {
    chat: ChatManager,
    credentials: CredentialManager,
    providers: Arc<dyn ProviderFactory>,
}

impl StreamingRelay {
    /// Create a relay over the given managers and provider factory
    #[must_use]
    pub fn new(
        chat: ChatManager,
        credentials: CredentialManager,
        providers: Arc<dyn ProviderFactory>,
    ) -> Self {
        Self {
            chat,
            credentials,
            providers,
        }
    }

    /// Run every precondition for a turn and persist its initial rows
    ///
    /// Ordering is load-bearing: validation, vendor resolution, credential
    /// lookup, and conversation ownership are all checked before the first
    /// insert. A failure anywhere in this method leaves no trace in the
    /// store except the conversation row when the failure happens after
    /// creation (inserts are not transactional across steps; the user
    /// message insert is the first point of no return).
    ///
    /// # Errors
    ///
    /// `ValidationError` for empty input, `UnknownModel` for an unresolvable
    /// prefix, `MissingCredential` when the user has no key for the vendor,
    /// `NotFound` for an absent or foreign-owned conversation, `StoreError`
    /// on persistence failure.
    pub async fn prepare_turn(&self, user_id: &str, input: TurnInput) -> AppResult<PreparedTurn> {
        if input.message.trim().is_empty() {
            return Err(AppError::validation("Message must not be empty"));
        }
        if input.model.trim().is_empty() {
            return Err(AppError::validation("Model must not be empty"));
        }

        let kind = ProviderKind::for_model(&input.model)?;

        let api_key = self
            .credentials
            .get(user_id, kind.as_str())
            .await?
            .ok_or_else(|| AppError::missing_credential(kind.as_str()))?;

        let (conversation, is_first_message) = match input.conversation_id {
            Some(ref conversation_id) => {
                let conversation = self
                    .chat
                    .get_conversation(conversation_id, user_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("Conversation not found"))?;
                (conversation, false)
            }
            None => {
                let title = provisional_title(&input.message);
                let conversation = self.chat.create_conversation(user_id, &title).await?;
                (conversation, true)
            }
        };

        // The prompt is stored exactly as submitted; trimming is only a
        // validation view, not a normalization step.
        let user_message = self
            .chat
            .append_message(&conversation.id, MessageRole::User, &input.message)
            .await?;

        let placeholder = self
            .chat
            .append_message(&conversation.id, MessageRole::Assistant, "")
            .await?;

        debug!(
            conversation_id = %conversation.id,
            placeholder_id = %placeholder.id,
            vendor = %kind,
            "Turn prepared"
        );

        Ok(PreparedTurn {
            user_id: user_id.to_owned(),
            kind,
            api_key,
            model: input.model,
            conversation,
            is_first_message,
            user_message,
            placeholder,
        })
    }

    /// Run a prepared turn as an event stream
    ///
    /// Emits `start`, then `token` per fragment, then `done` or `error`.
    /// Dropping the returned stream cancels generation; whatever text was
    /// accumulated by then is flushed into the placeholder best-effort.
    pub fn run_turn(self, prepared: PreparedTurn) -> impl Stream<Item = RelayEvent> + Send {
        async_stream::stream! {
            yield RelayEvent::Start {
                conversation_id: prepared.conversation.id.clone(),
                message_id: prepared.placeholder.id.clone(),
                is_first_message: prepared.is_first_message,
            };

            let provider = match self.providers.create(prepared.kind, &prepared.api_key) {
                Ok(provider) => provider,
                Err(e) => {
                    warn!(vendor = %prepared.kind, "Failed to create provider: {e}");
                    yield RelayEvent::Error { error: e.message.clone() };
                    return;
                }
            };

            let request = match self.build_history_request(&prepared, true).await {
                Ok(request) => request,
                Err(e) => {
                    yield RelayEvent::Error { error: e.message.clone() };
                    return;
                }
            };

            // Producer task: pull vendor fragments, push into the channel.
            // The drop guard cancels it when this stream is abandoned.
            let cancel = CancellationToken::new();
            let _guard = cancel.clone().drop_guard();
            let (tx, mut rx) = mpsc::channel::<Result<StreamChunk, AppError>>(CHANNEL_CAPACITY);

            let producer_cancel = cancel.clone();
            tokio::spawn(async move {
                let mut chunks = match provider.complete_stream(&request).await {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        () = producer_cancel.cancelled() => break,
                        next = chunks.next() => match next {
                            Some(item) => {
                                if tx.send(item).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            });

            let mut accumulated = String::new();
            let mut failure: Option<AppError> = None;

            while let Some(item) = rx.recv().await {
                match item {
                    Ok(chunk) => {
                        if !chunk.delta.is_empty() {
                            accumulated.push_str(&chunk.delta);
                            yield RelayEvent::Token { content: chunk.delta };
                        }
                        if chunk.is_final {
                            break;
                        }
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            drop(rx);

            if let Some(e) = failure {
                warn!(
                    conversation_id = %prepared.conversation.id,
                    "Turn failed mid-stream: {e}"
                );
                // Keep whatever arrived so the transcript is not silently
                // shortened; the client sees the error event regardless.
                if !accumulated.is_empty() {
                    if let Err(persist_err) = self
                        .chat
                        .update_message_content(&prepared.placeholder.id, &accumulated)
                        .await
                    {
                        warn!("Failed to persist partial content: {persist_err}");
                    }
                }
                yield RelayEvent::Error { error: e.message.clone() };
                return;
            }

            if let Err(e) = self.finalize_turn(&prepared, &accumulated).await {
                yield RelayEvent::Error { error: e.message.clone() };
                return;
            }

            yield RelayEvent::Done {
                conversation_id: prepared.conversation.id.clone(),
                message_id: prepared.placeholder.id.clone(),
            };
        }
    }

    /// Run a prepared turn as a single blocking completion
    ///
    /// Same persistence lifecycle as the streaming path, without the event
    /// stream: the placeholder is created first and filled at the end.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` on vendor failure or `StoreError` on
    /// persistence failure; the placeholder keeps its empty content when
    /// the vendor call fails.
    pub async fn send_turn(&self, prepared: PreparedTurn) -> AppResult<TurnResult> {
        let provider = self.providers.create(prepared.kind, &prepared.api_key)?;
        let request = self.build_history_request(&prepared, false).await?;

        let response = provider.complete(&request).await?;

        self.finalize_turn(&prepared, &response.content).await?;

        let mut assistant_message = prepared.placeholder;
        assistant_message.content = response.content;

        Ok(TurnResult {
            conversation_id: prepared.conversation.id,
            is_first_message: prepared.is_first_message,
            user_message: prepared.user_message,
            assistant_message,
        })
    }

    /// Build the vendor request from the conversation's full history
    ///
    /// The empty placeholder is excluded; everything else goes out in
    /// chronological order.
    async fn build_history_request(
        &self,
        prepared: &PreparedTurn,
        stream: bool,
    ) -> AppResult<ChatRequest> {
        let records = self.chat.get_messages(&prepared.conversation.id).await?;

        let messages: Vec<ChatMessage> = records
            .into_iter()
            .filter(|record| record.id != prepared.placeholder.id)
            .filter_map(|record| {
                MessageRole::parse_str(&record.role).map(|role| ChatMessage::new(role, record.content))
            })
            .collect();

        let mut request = ChatRequest::new(messages, prepared.model.clone());
        if stream {
            request = request.with_streaming();
        }
        Ok(request)
    }

    /// Flush the accumulated content and bump conversation metadata
    ///
    /// On the first turn, also attempts a single-shot title generation;
    /// a failure there is logged and ignored, leaving the provisional
    /// title in place.
    async fn finalize_turn(&self, prepared: &PreparedTurn, content: &str) -> AppResult<()> {
        self.chat
            .update_message_content(&prepared.placeholder.id, content)
            .await?;
        self.chat
            .touch_conversation(&prepared.conversation.id)
            .await?;

        if prepared.is_first_message {
            self.generate_title(prepared).await;
        }

        Ok(())
    }

    /// Best-effort title generation after the first completed turn
    async fn generate_title(&self, prepared: &PreparedTurn) {
        let provider = match self.providers.create(prepared.kind, &prepared.api_key) {
            Ok(provider) => provider,
            Err(e) => {
                warn!("Skipping title generation: {e}");
                return;
            }
        };

        match self.request_title(provider.as_ref(), prepared).await {
            Ok(Some(title)) => {
                if let Err(e) = self
                    .chat
                    .rename_conversation(&prepared.conversation.id, &prepared.user_id, &title)
                    .await
                {
                    warn!("Failed to store generated title: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(
                conversation_id = %prepared.conversation.id,
                "Title generation failed: {e}"
            ),
        }
    }

    async fn request_title(
        &self,
        provider: &dyn LlmProvider,
        prepared: &PreparedTurn,
    ) -> AppResult<Option<String>> {
        let request = ChatRequest::new(
            vec![
                ChatMessage::system(
                    "Generate a short title (at most six words) for a conversation that \
                     starts with the following message. Reply with the title only, no \
                     quotes or punctuation around it.",
                ),
                ChatMessage::user(prepared.user_message.content.clone()),
            ],
            prepared.model.clone(),
        )
        .with_max_tokens(TITLE_GEN_MAX_TOKENS);

        let response = provider.complete(&request).await?;
        let title = response.content.trim().trim_matches('"').trim();
        if title.is_empty() {
            return Ok(None);
        }
        Ok(Some(provisional_title(title)))
    }
}

/// Derive a provisional conversation title from the first prompt
///
/// Truncated on a character boundary; falls back to a fixed title when the
/// prompt yields nothing usable.
fn provisional_title(prompt: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return FALLBACK_TITLE.to_owned();
    }
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        trimmed.to_owned()
    } else {
        let mut title: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        title.push('…');
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provisional_title_short_prompt() {
        assert_eq!(provisional_title("Explain lifetimes"), "Explain lifetimes");
    }

    #[test]
    fn test_provisional_title_truncates_on_char_boundary() {
        let prompt = "é".repeat(100);
        let title = provisional_title(&prompt);
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn test_provisional_title_whitespace_fallback() {
        assert_eq!(provisional_title("   \n\t  "), FALLBACK_TITLE);
    }

    #[test]
    fn test_relay_event_wire_format() {
        let event = RelayEvent::Start {
            conversation_id: "c1".to_owned(),
            message_id: "m1".to_owned(),
            is_first_message: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["messageId"], "m1");
        assert_eq!(json["isFirstMessage"], true);

        let done = serde_json::to_value(RelayEvent::Done {
            conversation_id: "c1".to_owned(),
            message_id: "m1".to_owned(),
        })
        .unwrap();
        assert_eq!(done["type"], "done");

        let token = serde_json::to_value(RelayEvent::Token {
            content: "hi".to_owned(),
        })
        .unwrap();
        assert_eq!(token["type"], "token");
        assert_eq!(token["content"], "hi");
    }
}
