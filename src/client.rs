// ABOUTME: Client-side turn consumer; decodes relay SSE streams and tracks view state
// ABOUTME: Applies start/token/done/error events to an in-memory conversation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

//! # Stream Consumer
//!
//! The client half of the relay protocol. `ClientConversation` is a pure
//! state machine over [`RelayEvent`]s, usable by any frontend; `StreamClient`
//! speaks the HTTP surface, decoding the SSE body back into events with the
//! same line buffering the vendor bindings use.
//!
//! Malformed frames are logged and skipped rather than aborting the turn;
//! token order is preserved, so the rendered text always matches what the
//! relay persisted.

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{AppError, AppResult, ErrorResponse};
use crate::llm::sse::{SseEvent, SseLineBuffer};
use crate::llm::MessageRole;
use crate::relay::RelayEvent;

// ============================================================================
// Conversation View State
// ============================================================================

/// One message as rendered by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Server-assigned ID, once known
    pub id: Option<String>,
    /// Role of the sender
    pub role: MessageRole,
    /// Content accumulated so far
    pub content: String,
    /// True while the message is still being streamed
    pub pending: bool,
}

/// Terminal state of a consumed turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Turn completed; the assistant message is fully persisted server-side
    Completed {
        /// Conversation the turn ran in
        conversation_id: String,
        /// Assistant message ID
        message_id: String,
    },
    /// Turn failed after the stream opened
    Failed {
        /// Failure description from the relay
        error: String,
    },
    /// Stream ended without a terminal event (connection dropped)
    Interrupted,
}

/// Client-side conversation state machine
///
/// Pure over events: feeding the same sequence always produces the same
/// state, which keeps this testable without any transport.
#[derive(Debug, Default)]
pub struct ClientConversation {
    /// Conversation ID, known after the first `start` event
    pub conversation_id: Option<String>,
    /// Rendered messages in order
    pub messages: Vec<ClientMessage>,
    /// True between `start` and a terminal event
    pub streaming: bool,
    /// Error from the last failed turn, if any
    pub last_error: Option<String>,
}

impl ClientConversation {
    /// Create an empty conversation view
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the user's prompt and an optimistic assistant placeholder
    ///
    /// Called before the request is sent, so the UI shows the prompt
    /// immediately. The placeholder picks up its server ID from `start`.
    pub fn begin_turn(&mut self, prompt: &str) {
        self.last_error = None;
        self.messages.push(ClientMessage {
            id: None,
            role: MessageRole::User,
            content: prompt.to_owned(),
            pending: false,
        });
        self.messages.push(ClientMessage {
            id: None,
            role: MessageRole::Assistant,
            content: String::new(),
            pending: true,
        });
    }

    /// Apply one relay event to the view state
    pub fn apply_event(&mut self, event: &RelayEvent) {
        match event {
            RelayEvent::Start {
                conversation_id,
                message_id,
                ..
            } => {
                self.conversation_id = Some(conversation_id.clone());
                self.streaming = true;
                if let Some(placeholder) = self.pending_assistant() {
                    placeholder.id = Some(message_id.clone());
                }
            }
            RelayEvent::Token { content } => {
                if let Some(placeholder) = self.pending_assistant() {
                    placeholder.content.push_str(content);
                }
            }
            RelayEvent::Done { .. } => {
                self.streaming = false;
                if let Some(placeholder) = self.pending_assistant() {
                    placeholder.pending = false;
                }
            }
            RelayEvent::Error { error } => {
                self.streaming = false;
                self.last_error = Some(error.clone());
                // Partial text stays visible; the relay persisted it too
                if let Some(placeholder) = self.pending_assistant() {
                    placeholder.pending = false;
                }
            }
        }
    }

    /// Abandon the in-flight turn
    ///
    /// Removes the optimistic placeholder; the server may still have
    /// persisted partial content, which a later history fetch will show.
    pub fn abort_turn(&mut self) {
        self.streaming = false;
        if self
            .messages
            .last()
            .is_some_and(|m| m.pending && m.role == MessageRole::Assistant)
        {
            self.messages.pop();
        }
    }

    fn pending_assistant(&mut self) -> Option<&mut ClientMessage> {
        self.messages
            .iter_mut()
            .rev()
            .find(|m| m.pending && m.role == MessageRole::Assistant)
    }
}

// ============================================================================
// HTTP Stream Client
// ============================================================================

/// HTTP client for the relay's streaming endpoint
pub struct StreamClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

/// Request body sent to the streaming endpoint
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamRequestBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    message: &'a str,
    model: &'a str,
}

impl StreamClient {
    /// Create a client against a server base URL with a session token
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// Open a turn stream and decode it into relay events
    ///
    /// # Errors
    ///
    /// Returns the relay's JSON error (mapped from the response body) when
    /// the turn is rejected before the stream opens, or `StreamingError` on
    /// transport failure.
    pub async fn stream_turn(
        &self,
        conversation_id: Option<&str>,
        message: &str,
        model: &str,
    ) -> AppResult<impl Stream<Item = RelayEvent> + Send> {
        let body = StreamRequestBody {
            conversation_id,
            message,
            model,
        };

        let response = self
            .client
            .post(format!("{}/api/chat/stream", self.base_url))
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::streaming(format!("Failed to open stream: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(rejection_error(status, &body));
        }

        Ok(decode_event_stream(response.bytes_stream()))
    }
}

/// Decode an SSE byte stream into relay events
///
/// Malformed data lines are logged and skipped. Transport errors end the
/// stream; the caller observes the missing terminal event as
/// [`TurnOutcome::Interrupted`].
pub fn decode_event_stream<S>(byte_stream: S) -> impl Stream<Item = RelayEvent> + Send
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
{
    async_stream::stream! {
        let mut buffer = SseLineBuffer::new();
        tokio::pin!(byte_stream);

        while let Some(chunk) = futures_util::StreamExt::next(&mut byte_stream).await {
            match chunk {
                Ok(bytes) => {
                    for event in buffer.feed(&bytes) {
                        if let Some(relay_event) = parse_frame(&event) {
                            yield relay_event;
                        }
                    }
                }
                Err(e) => {
                    warn!("Stream transport error: {e}");
                    return;
                }
            }
        }

        for event in buffer.flush() {
            if let Some(relay_event) = parse_frame(&event) {
                yield relay_event;
            }
        }
    }
}

/// Map a pre-stream rejection to the relay's original error
///
/// The relay rejects turns with an [`ErrorResponse`] body; its code and
/// message are carried through so callers see the same error a direct API
/// consumer would. Unparseable bodies fall back to `StreamingError`.
fn rejection_error(status: reqwest::StatusCode, body: &str) -> AppError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => AppError::new(parsed.error.code, parsed.error.message),
        Err(_) => AppError::streaming(format!("Turn rejected ({status}): {body}")),
    }
}

fn parse_frame(event: &SseEvent) -> Option<RelayEvent> {
    match event {
        SseEvent::Data(json_str) => match serde_json::from_str::<RelayEvent>(json_str) {
            Ok(relay_event) => Some(relay_event),
            Err(e) => {
                warn!("Skipping malformed relay frame: {e}");
                None
            }
        },
        SseEvent::Done => None,
    }
}

/// Drive a conversation view from an event stream to its outcome
///
/// Convenience used by frontends that want the final state rather than
/// per-event control.
pub async fn consume_turn<S>(conversation: &mut ClientConversation, events: S) -> TurnOutcome
where
    S: Stream<Item = RelayEvent>,
{
    tokio::pin!(events);

    let mut outcome = TurnOutcome::Interrupted;
    while let Some(event) = futures_util::StreamExt::next(&mut events).await {
        conversation.apply_event(&event);
        match event {
            RelayEvent::Done {
                conversation_id,
                message_id,
            } => {
                outcome = TurnOutcome::Completed {
                    conversation_id,
                    message_id,
                };
                break;
            }
            RelayEvent::Error { error } => {
                outcome = TurnOutcome::Failed { error };
                break;
            }
            RelayEvent::Start { .. } | RelayEvent::Token { .. } => {}
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_event() -> RelayEvent {
        RelayEvent::Start {
            conversation_id: "c1".to_owned(),
            message_id: "m2".to_owned(),
            is_first_message: true,
        }
    }

    #[test]
    fn test_turn_accumulates_tokens_in_order() {
        let mut conversation = ClientConversation::new();
        conversation.begin_turn("hi");
        conversation.apply_event(&start_event());
        conversation.apply_event(&RelayEvent::Token {
            content: "Hel".to_owned(),
        });
        conversation.apply_event(&RelayEvent::Token {
            content: "lo".to_owned(),
        });
        conversation.apply_event(&RelayEvent::Done {
            conversation_id: "c1".to_owned(),
            message_id: "m2".to_owned(),
        });

        assert_eq!(conversation.conversation_id.as_deref(), Some("c1"));
        assert!(!conversation.streaming);
        let assistant = conversation.messages.last().unwrap();
        assert_eq!(assistant.content, "Hello");
        assert_eq!(assistant.id.as_deref(), Some("m2"));
        assert!(!assistant.pending);
    }

    #[test]
    fn test_error_keeps_partial_text() {
        let mut conversation = ClientConversation::new();
        conversation.begin_turn("hi");
        conversation.apply_event(&start_event());
        conversation.apply_event(&RelayEvent::Token {
            content: "partial".to_owned(),
        });
        conversation.apply_event(&RelayEvent::Error {
            error: "vendor went away".to_owned(),
        });

        assert_eq!(conversation.last_error.as_deref(), Some("vendor went away"));
        assert_eq!(conversation.messages.last().unwrap().content, "partial");
    }

    #[test]
    fn test_abort_removes_placeholder() {
        let mut conversation = ClientConversation::new();
        conversation.begin_turn("hi");
        conversation.apply_event(&start_event());
        conversation.abort_turn();

        assert_eq!(conversation.messages.len(), 1);
        assert_eq!(conversation.messages[0].role, MessageRole::User);
        assert!(!conversation.streaming);
    }

    #[test]
    fn test_malformed_frame_skipped() {
        assert!(parse_frame(&SseEvent::Data("not json".to_owned())).is_none());
        let frame = SseEvent::Data(r#"{"type":"token","content":"x"}"#.to_owned());
        assert_eq!(
            parse_frame(&frame),
            Some(RelayEvent::Token {
                content: "x".to_owned()
            })
        );
    }

    #[tokio::test]
    async fn test_decode_stream_skips_corrupt_frame() {
        // A garbage data line between valid frames must not end the stream
        let chunks: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from(
                "data: {\"type\":\"token\",\"content\":\"a\"}\n\n",
            )),
            Ok(bytes::Bytes::from("data: {not json at all\n\n")),
            Ok(bytes::Bytes::from(
                "data: {\"type\":\"token\",\"content\":\"b\"}\n\ndata: {\"type\":\"done\",\"conversationId\":\"c1\",\"messageId\":\"m2\"}\n\n",
            )),
        ];

        let events: Vec<RelayEvent> =
            futures_util::StreamExt::collect(decode_event_stream(tokio_stream::iter(chunks)))
                .await;

        assert_eq!(
            events,
            vec![
                RelayEvent::Token {
                    content: "a".to_owned()
                },
                RelayEvent::Token {
                    content: "b".to_owned()
                },
                RelayEvent::Done {
                    conversation_id: "c1".to_owned(),
                    message_id: "m2".to_owned(),
                },
            ]
        );
    }

    #[test]
    fn test_rejection_error_carries_relay_code() {
        let body = r#"{"error":{"code":"MISSING_CREDENTIAL","message":"No API key configured for provider 'openai'"}}"#;
        let error = rejection_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert_eq!(error.code, crate::errors::ErrorCode::MissingCredential);
        assert!(error.message.contains("openai"));

        // Non-JSON bodies (proxies, load balancers) fall back to streaming
        let error = rejection_error(reqwest::StatusCode::BAD_GATEWAY, "upstream timed out");
        assert_eq!(error.code, crate::errors::ErrorCode::StreamingError);
    }

    #[tokio::test]
    async fn test_consume_turn_outcome() {
        let events = tokio_stream::iter(vec![
            start_event(),
            RelayEvent::Token {
                content: "ok".to_owned(),
            },
            RelayEvent::Done {
                conversation_id: "c1".to_owned(),
                message_id: "m2".to_owned(),
            },
        ]);

        let mut conversation = ClientConversation::new();
        conversation.begin_turn("hi");
        let outcome = consume_turn(&mut conversation, events).await;
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                conversation_id: "c1".to_owned(),
                message_id: "m2".to_owned(),
            }
        );
    }

    #[tokio::test]
    async fn test_interrupted_stream_outcome() {
        let events = tokio_stream::iter(vec![
            start_event(),
            RelayEvent::Token {
                content: "half".to_owned(),
            },
        ]);

        let mut conversation = ClientConversation::new();
        conversation.begin_turn("hi");
        let outcome = consume_turn(&mut conversation, events).await;
        assert_eq!(outcome, TurnOutcome::Interrupted);
        assert_eq!(conversation.messages.last().unwrap().content, "half");
    }
}
