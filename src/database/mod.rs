// ABOUTME: SQLite database bootstrap and schema management
// ABOUTME: Owns the connection pool handed to the chat and credential managers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

//! # Database Layer
//!
//! A thin wrapper over an `sqlx` SQLite pool. The schema is created
//! idempotently on startup; all row-level operations live in the managers
//! (`ChatManager`, `CredentialManager`), which are the only writers for the
//! tables they own.

mod chat;
mod credentials;

pub use chat::{ChatManager, ConversationRecord, ConversationSummary, MessageRecord};
pub use credentials::CredentialManager;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::errors::{AppError, AppResult};

/// Schema applied at startup. `IF NOT EXISTS` keeps restarts idempotent.
const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_user
        ON conversations(user_id, updated_at);

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_conversation
        ON messages(conversation_id, created_at);

    CREATE TABLE IF NOT EXISTS provider_credentials (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        provider TEXT NOT NULL,
        api_key TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (user_id, provider)
    );

    CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
";

/// Database handle owning the SQLite pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the database and apply the schema
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the pool cannot be created or the schema
    /// cannot be applied.
    pub async fn new(database_url: &str) -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| AppError::database(format!("Failed to open database: {e}")))?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to enable foreign keys: {e}")))?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to apply schema: {e}")))?;

        Ok(Self { pool })
    }

    /// Access the underlying pool
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Construct a chat manager over this database
    #[must_use]
    pub fn chat(&self) -> ChatManager {
        ChatManager::new(self.pool.clone())
    }

    /// Construct a credential manager over this database
    #[must_use]
    pub fn credentials(&self) -> CredentialManager {
        CredentialManager::new(self.pool.clone())
    }
}
