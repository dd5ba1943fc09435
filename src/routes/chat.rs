// ABOUTME: Chat route handlers for conversations, messages, and turn streaming
// ABOUTME: Every handler authenticates before touching the store or the relay
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

//! Chat routes
//!
//! Conversation CRUD plus the two turn endpoints: `POST /api/chat/stream`
//! relays the response as SSE, `POST /api/chat/send` blocks for the full
//! completion. Turn preconditions are checked before the SSE stream opens,
//! so precondition failures arrive as plain JSON error responses with real
//! status codes rather than as in-stream error events.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post, put},
    Json, Router,
};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use tokio_stream::StreamExt;
use tracing::info;

use crate::database::{ConversationRecord, ConversationSummary, MessageRecord};
use crate::errors::AppError;
use crate::relay::{RelayEvent, TurnInput};
use crate::server::ServerResources;

/// Default page size for conversation listings
const DEFAULT_LIST_LIMIT: i64 = 50;

/// Hard cap on conversation listing page size
const MAX_LIST_LIMIT: i64 = 200;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for the turn endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnRequest {
    /// Existing conversation to continue; omit to start a new one
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// User prompt text (`content` accepted as a legacy alias)
    #[serde(alias = "content")]
    pub message: String,
    /// Model identifier (vendor resolved by prefix)
    pub model: String,
}

/// Request to rename a conversation
#[derive(Debug, Deserialize)]
pub struct RenameConversationRequest {
    /// New conversation title
    pub title: String,
}

/// Pagination for conversation listing
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Max conversations to return
    #[serde(default)]
    pub limit: Option<i64>,
    /// Offset into the listing
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Response for listing conversations
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    /// Conversation summaries, most recently updated first
    pub conversations: Vec<ConversationSummary>,
}

/// Response for conversation messages
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    /// Messages in chronological order
    pub messages: Vec<MessageRecord>,
}

/// Response for the blocking turn endpoint
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurnResponse {
    /// Conversation the turn ran in
    pub conversation_id: String,
    /// Whether this turn created the conversation
    pub is_new_conversation: bool,
    /// Persisted user message
    pub user_message: MessageRecord,
    /// Assistant message with its final content
    pub assistant_message: MessageRecord,
}

// ============================================================================
// Chat Routes
// ============================================================================

/// Chat routes handler
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            // Turn endpoints
            .route("/api/chat/stream", post(Self::stream_turn))
            .route("/api/chat/send", post(Self::send_turn))
            // Conversation management
            .route("/api/chat/conversations", get(Self::list_conversations))
            .route(
                "/api/chat/conversations/:conversation_id",
                get(Self::get_conversation),
            )
            .route(
                "/api/chat/conversations/:conversation_id",
                put(Self::rename_conversation),
            )
            .route(
                "/api/chat/conversations/:conversation_id",
                delete(Self::delete_conversation),
            )
            // Messages
            .route(
                "/api/chat/conversations/:conversation_id/messages",
                get(Self::get_messages),
            )
            .with_state(resources)
    }

    /// Run a chat turn and stream the response via SSE
    ///
    /// Preconditions (validation, model resolution, credential, ownership)
    /// are checked before the stream opens; failures there return plain
    /// JSON errors. Once the stream is open, failures arrive as `error`
    /// events and the HTTP status stays 200.
    async fn stream_turn(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(request): Json<ChatTurnRequest>,
    ) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
        let auth = resources.authenticator.authenticate(&headers).await?;

        let prepared = resources
            .relay
            .prepare_turn(&auth.user_id, turn_input(request))
            .await?;

        info!(
            conversation_id = %prepared.conversation.id,
            model = %prepared.model,
            "Starting streamed turn"
        );

        let events = resources.relay.clone().run_turn(prepared);
        let stream = events.map(|event| Ok(sse_event(&event)));

        Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
    }

    /// Run a chat turn and return the full response in one body
    async fn send_turn(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(request): Json<ChatTurnRequest>,
    ) -> Result<Response, AppError> {
        let auth = resources.authenticator.authenticate(&headers).await?;

        let prepared = resources
            .relay
            .prepare_turn(&auth.user_id, turn_input(request))
            .await?;
        let result = resources.relay.send_turn(prepared).await?;

        let response = ChatTurnResponse {
            conversation_id: result.conversation_id,
            is_new_conversation: result.is_first_message,
            user_message: result.user_message,
            assistant_message: result.assistant_message,
        };

        Ok((StatusCode::OK, Json(response)).into_response())
    }

    /// List the caller's conversations
    async fn list_conversations(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<ListQuery>,
    ) -> Result<Response, AppError> {
        let auth = resources.authenticator.authenticate(&headers).await?;

        let limit = query
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);
        let offset = query.offset.unwrap_or(0).max(0);

        let conversations = resources
            .chat
            .list_conversations(&auth.user_id, limit, offset)
            .await?;

        Ok((StatusCode::OK, Json(ConversationListResponse { conversations })).into_response())
    }

    /// Get one conversation by ID
    async fn get_conversation(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let auth = resources.authenticator.authenticate(&headers).await?;

        let conversation: ConversationRecord = resources
            .chat
            .get_conversation(&conversation_id, &auth.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation not found"))?;

        Ok((StatusCode::OK, Json(conversation)).into_response())
    }

    /// Rename a conversation
    async fn rename_conversation(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
        Json(request): Json<RenameConversationRequest>,
    ) -> Result<Response, AppError> {
        let auth = resources.authenticator.authenticate(&headers).await?;

        let title = request.title.trim();
        if title.is_empty() {
            return Err(AppError::validation("Title must not be empty"));
        }

        let renamed = resources
            .chat
            .rename_conversation(&conversation_id, &auth.user_id, title)
            .await?;
        if !renamed {
            return Err(AppError::not_found("Conversation not found"));
        }

        let conversation = resources
            .chat
            .get_conversation(&conversation_id, &auth.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation not found"))?;

        Ok((StatusCode::OK, Json(conversation)).into_response())
    }

    /// Delete a conversation and its messages
    async fn delete_conversation(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let auth = resources.authenticator.authenticate(&headers).await?;

        let deleted = resources
            .chat
            .delete_conversation(&conversation_id, &auth.user_id)
            .await?;
        if !deleted {
            return Err(AppError::not_found("Conversation not found"));
        }

        info!(conversation_id = %conversation_id, "Conversation deleted");
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    /// Get all messages in a conversation
    async fn get_messages(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let auth = resources.authenticator.authenticate(&headers).await?;

        // Ownership check before reading rows scoped only by conversation
        resources
            .chat
            .get_conversation(&conversation_id, &auth.user_id)
            .await?
            .ok_or_else(|| AppError::not_found("Conversation not found"))?;

        let messages = resources.chat.get_messages(&conversation_id).await?;

        Ok((StatusCode::OK, Json(MessageListResponse { messages })).into_response())
    }
}

fn turn_input(request: ChatTurnRequest) -> TurnInput {
    TurnInput {
        conversation_id: request.conversation_id,
        message: request.message,
        model: request.model,
    }
}

/// Serialize a relay event as an SSE data frame
///
/// Serialization of these enums cannot fail; the fallback covers the type
/// signature without panicking in a handler.
fn sse_event(event: &RelayEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| {
        r#"{"type":"error","error":"Failed to serialize event"}"#.to_owned()
    });
    Event::default().data(data)
}
