// ABOUTME: Conversation and message persistence with owner-scoped access
// ABOUTME: Sole writer for the conversations and messages tables
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

//! # Conversation State Manager
//!
//! All conversation/message reads and writes go through `ChatManager`; the
//! relay never touches the store directly. Mutating operations on a
//! conversation are scoped by `user_id` in the `WHERE` clause, so a write
//! against someone else's conversation affects zero rows and is reported as
//! not-found without revealing whether the row exists.

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::llm::MessageRole;

/// Characters of the newest message kept in a listing preview
const PREVIEW_CHARS: usize = 80;

/// Database representation of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique conversation ID
    pub id: String,
    /// User ID who owns the conversation
    pub user_id: String,
    /// Conversation title (provisional until the first turn completes)
    pub title: String,
    /// When the conversation was created (RFC 3339)
    pub created_at: String,
    /// When the conversation was last updated (RFC 3339)
    pub updated_at: String,
}

/// Database representation of a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique message ID
    pub id: String,
    /// Conversation this message belongs to
    pub conversation_id: String,
    /// Role of the sender (user or assistant)
    pub role: String,
    /// Message content
    pub content: String,
    /// When the message was created (RFC 3339)
    pub created_at: String,
}

/// Summary of a conversation for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation ID
    pub id: String,
    /// Conversation title
    pub title: String,
    /// Number of messages in the conversation
    pub message_count: i64,
    /// Truncated content of the newest message, empty if none
    pub last_message: String,
    /// When the conversation was created
    pub created_at: String,
    /// When the conversation was last updated
    pub updated_at: String,
}

/// Conversation and message database operations
#[derive(Debug, Clone)]
pub struct ChatManager {
    pool: SqlitePool,
}

impl ChatManager {
    /// Create a new chat manager
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    /// Create a new conversation owned by `user_id`
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the insert fails.
    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
    ) -> AppResult<ConversationRecord> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r"
            INSERT INTO conversations (id, user_id, title, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            ",
        )
        .bind(&id)
        .bind(user_id)
        .bind(title)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create conversation: {e}")))?;

        Ok(ConversationRecord {
            id,
            user_id: user_id.to_owned(),
            title: title.to_owned(),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Get a conversation by ID, scoped to its owner
    ///
    /// Returns `None` both when the row does not exist and when it is owned
    /// by a different user.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn get_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<Option<ConversationRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, user_id, title, created_at, updated_at
            FROM conversations
            WHERE id = $1 AND user_id = $2
            ",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get conversation: {e}")))?;

        Ok(row.map(|r| ConversationRecord {
            id: r.get("id"),
            user_id: r.get("user_id"),
            title: r.get("title"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// List a user's conversations, most recently updated first
    ///
    /// Each summary carries a computed message count and a truncated preview
    /// of the newest message.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn list_conversations(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            r"
            SELECT c.id, c.title, c.created_at, c.updated_at,
                   COUNT(m.id) AS message_count,
                   COALESCE(
                       (SELECT content FROM messages
                        WHERE conversation_id = c.id
                        ORDER BY created_at DESC, rowid DESC LIMIT 1),
                       ''
                   ) AS last_message
            FROM conversations c
            LEFT JOIN messages m ON m.conversation_id = c.id
            WHERE c.user_id = $1
            GROUP BY c.id
            ORDER BY c.updated_at DESC
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list conversations: {e}")))?;

        let summaries = rows
            .into_iter()
            .map(|r| {
                let full: String = r.get("last_message");
                ConversationSummary {
                    id: r.get("id"),
                    title: r.get("title"),
                    message_count: r.get("message_count"),
                    last_message: truncate_preview(&full),
                    created_at: r.get("created_at"),
                    updated_at: r.get("updated_at"),
                }
            })
            .collect();

        Ok(summaries)
    }

    /// Rename a conversation, scoped to its owner
    ///
    /// Returns `false` when no row matched (absent or foreign-owned).
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the update fails.
    pub async fn rename_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
        title: &str,
    ) -> AppResult<bool> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            r"
            UPDATE conversations
            SET title = $1, updated_at = $2
            WHERE id = $3 AND user_id = $4
            ",
        )
        .bind(title)
        .bind(&now)
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to rename conversation: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a conversation and its messages, scoped to its owner
    ///
    /// Messages are removed first, then the conversation row; both deletes
    /// are filtered by `user_id`. Returns `false` when no conversation row
    /// matched.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if either delete fails.
    pub async fn delete_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<bool> {
        sqlx::query(
            r"
            DELETE FROM messages
            WHERE conversation_id IN (
                SELECT id FROM conversations WHERE id = $1 AND user_id = $2
            )
            ",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to delete messages: {e}")))?;

        let result = sqlx::query(
            r"
            DELETE FROM conversations
            WHERE id = $1 AND user_id = $2
            ",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to delete conversation: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Bump a conversation's `updated_at`; called once per completed turn
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the update fails.
    pub async fn touch_conversation(&self, conversation_id: &str) -> AppResult<()> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r"
            UPDATE conversations
            SET updated_at = $1
            WHERE id = $2
            ",
        )
        .bind(&now)
        .bind(conversation_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to touch conversation: {e}")))?;

        Ok(())
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    /// Append a message to a conversation
    ///
    /// Content may be empty; the relay uses this for the assistant
    /// placeholder created before generation begins.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the insert fails.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
    ) -> AppResult<MessageRecord> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let role_str = role.as_str();

        sqlx::query(
            r"
            INSERT INTO messages (id, conversation_id, role, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(role_str)
        .bind(content)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to append message: {e}")))?;

        Ok(MessageRecord {
            id,
            conversation_id: conversation_id.to_owned(),
            role: role_str.to_owned(),
            content: content.to_owned(),
            created_at: now,
        })
    }

    /// Replace a message's content in full
    ///
    /// Used exactly once per turn, at stream completion, to flush the
    /// accumulated assistant text in a single write.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the update fails or the message is gone.
    pub async fn update_message_content(&self, message_id: &str, content: &str) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE messages
            SET content = $1
            WHERE id = $2
            ",
        )
        .bind(content)
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update message content: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::database(format!(
                "Message {message_id} vanished before finalize"
            )));
        }

        Ok(())
    }

    /// Get all messages for a conversation in chronological order
    ///
    /// An empty conversation yields an empty vec, not an error.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn get_messages(&self, conversation_id: &str) -> AppResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, conversation_id, role, content, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, rowid ASC
            ",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get messages: {e}")))?;

        let messages = rows
            .into_iter()
            .map(|r| MessageRecord {
                id: r.get("id"),
                conversation_id: r.get("conversation_id"),
                role: r.get("role"),
                content: r.get("content"),
                created_at: r.get("created_at"),
            })
            .collect();

        Ok(messages)
    }
}

/// Truncate a preview on a character boundary
fn truncate_preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        content.to_owned()
    } else {
        let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
        preview.push('…');
        preview
    }
}
