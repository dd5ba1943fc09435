// ABOUTME: Per-user provider API key storage
// ABOUTME: Keyed by (user_id, provider); absence is a configuration error, not a vendor error
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

/// Provider credential database operations
#[derive(Debug, Clone)]
pub struct CredentialManager {
    pool: SqlitePool,
}

impl CredentialManager {
    /// Create a new credential manager
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store an API key for (user, provider), replacing any existing one
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the upsert fails.
    pub async fn save(&self, user_id: &str, provider: &str, api_key: &str) -> AppResult<()> {
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r"
            INSERT INTO provider_credentials (id, user_id, provider, api_key, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (user_id, provider)
            DO UPDATE SET api_key = excluded.api_key, updated_at = excluded.updated_at
            ",
        )
        .bind(&id)
        .bind(user_id)
        .bind(provider)
        .bind(api_key)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to save credential: {e}")))?;

        Ok(())
    }

    /// Look up the stored API key for (user, provider)
    ///
    /// `None` means the user never configured this provider; a wrong key is
    /// only discoverable through an attempted vendor call.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn get(&self, user_id: &str, provider: &str) -> AppResult<Option<String>> {
        let row = sqlx::query(
            r"
            SELECT api_key FROM provider_credentials
            WHERE user_id = $1 AND provider = $2
            ",
        )
        .bind(user_id)
        .bind(provider)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get credential: {e}")))?;

        Ok(row.map(|r| r.get("api_key")))
    }

    /// Delete a stored credential; returns `false` when none existed
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the delete fails.
    pub async fn delete(&self, user_id: &str, provider: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            DELETE FROM provider_credentials
            WHERE user_id = $1 AND provider = $2
            ",
        )
        .bind(user_id)
        .bind(provider)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to delete credential: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// List the provider names a user has keys for (never the secrets)
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the query fails.
    pub async fn list(&self, user_id: &str) -> AppResult<Vec<String>> {
        let rows = sqlx::query(
            r"
            SELECT provider FROM provider_credentials
            WHERE user_id = $1
            ORDER BY provider ASC
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list credentials: {e}")))?;

        Ok(rows.into_iter().map(|r| r.get("provider")).collect())
    }
}
