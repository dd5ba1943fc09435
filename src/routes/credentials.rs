// ABOUTME: Provider credential route handlers
// ABOUTME: Stores and lists per-user vendor API keys without ever returning the secrets
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::errors::AppError;
use crate::llm::ProviderKind;
use crate::server::ServerResources;

/// Request to store a vendor API key
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveCredentialRequest {
    /// Vendor name (openai, anthropic, google)
    pub provider: String,
    /// API key to store
    pub api_key: String,
}

/// Response listing configured vendors
#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialListResponse {
    /// Vendor names the caller has keys for
    pub providers: Vec<String>,
}

/// Credential routes handler
pub struct CredentialRoutes;

impl CredentialRoutes {
    /// Create all credential routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/user/credentials", get(Self::list_credentials))
            .route("/api/user/credentials", put(Self::save_credential))
            .route(
                "/api/user/credentials/:provider",
                delete(Self::delete_credential),
            )
            .with_state(resources)
    }

    /// List the vendors the caller has keys for (names only)
    async fn list_credentials(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let auth = resources.authenticator.authenticate(&headers).await?;

        let providers = resources.credentials.list(&auth.user_id).await?;

        Ok((StatusCode::OK, Json(CredentialListResponse { providers })).into_response())
    }

    /// Store or replace the caller's key for a vendor
    async fn save_credential(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(request): Json<SaveCredentialRequest>,
    ) -> Result<Response, AppError> {
        let auth = resources.authenticator.authenticate(&headers).await?;

        let kind = ProviderKind::parse_str(&request.provider).ok_or_else(|| {
            AppError::validation(format!("Unknown provider '{}'", request.provider))
        })?;
        if request.api_key.trim().is_empty() {
            return Err(AppError::validation("API key must not be empty"));
        }

        resources
            .credentials
            .save(&auth.user_id, kind.as_str(), request.api_key.trim())
            .await?;

        info!(provider = %kind, "Credential saved");
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    /// Delete the caller's key for a vendor
    async fn delete_credential(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(provider): Path<String>,
    ) -> Result<Response, AppError> {
        let auth = resources.authenticator.authenticate(&headers).await?;

        let kind = ProviderKind::parse_str(&provider)
            .ok_or_else(|| AppError::validation(format!("Unknown provider '{provider}'")))?;

        let deleted = resources
            .credentials
            .delete(&auth.user_id, kind.as_str())
            .await?;
        if !deleted {
            return Err(AppError::not_found("No credential stored for this provider"));
        }

        Ok(StatusCode::NO_CONTENT.into_response())
    }
}
