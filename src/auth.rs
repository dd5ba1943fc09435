// ABOUTME: Request authentication against the session store
// ABOUTME: Accepts a bearer token header or auth_token cookie and yields the owning user id
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

//! # Authentication Gate
//!
//! Identity lives outside this system; the core only needs "which user is
//! making this request". `Authenticator` resolves a bearer token (from the
//! `Authorization` header, falling back to the `auth_token` cookie) through
//! the `sessions` table. Every handler authenticates before any other work.

use axum::http::HeaderMap;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

/// Resolved identity for one request
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// Authenticated user id
    pub user_id: String,
}

/// Session-token authenticator
#[derive(Debug, Clone)]
pub struct Authenticator {
    pool: SqlitePool,
}

impl Authenticator {
    /// Create a new authenticator over the session store
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Authenticate a request from its headers
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` when no token is present or the token does not
    /// match a session.
    pub async fn authenticate(&self, headers: &HeaderMap) -> AppResult<AuthResult> {
        let token = extract_bearer_token(headers)
            .ok_or_else(|| AppError::unauthorized("Missing authorization header or cookie"))?;

        let row = sqlx::query(
            r"
            SELECT user_id FROM sessions WHERE token = $1
            ",
        )
        .bind(&token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to look up session: {e}")))?;

        row.map(|r| AuthResult {
            user_id: r.get("user_id"),
        })
        .ok_or_else(|| AppError::unauthorized("Invalid or expired session token"))
    }

    /// Issue a session token for a user
    ///
    /// Used by deployment bootstrap and tests; token issuance flows proper
    /// belong to the external identity provider.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the insert fails.
    pub async fn issue_token(&self, user_id: &str) -> AppResult<String> {
        let token = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r"
            INSERT INTO sessions (token, user_id, created_at)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(&token)
        .bind(user_id)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create session: {e}")))?;

        Ok(token)
    }
}

/// Pull the bearer token from the Authorization header or auth_token cookie
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("authorization").and_then(|h| h.to_str().ok()) {
        return value
            .strip_prefix("Bearer ")
            .map(|token| token.trim().to_owned());
    }
    get_cookie_value(headers, "auth_token")
}

/// Extract a cookie value by name from the Cookie header
fn get_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get("cookie").and_then(|h| h.to_str().ok())?;
    cookies.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_owned())
    })
}
