// ABOUTME: HTTP server assembly; shared resources, router construction, and serve loop
// ABOUTME: Wires the database managers, authenticator, and relay into axum routes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::database::{ChatManager, CredentialManager, Database};
use crate::errors::AppResult;
use crate::llm::ProviderFactory;
use crate::relay::StreamingRelay;

/// Shared resources handed to every route handler
pub struct ServerResources {
    /// Database handle
    pub database: Database,
    /// Conversation and message operations
    pub chat: ChatManager,
    /// Provider credential operations
    pub credentials: CredentialManager,
    /// Session-token authenticator
    pub authenticator: Authenticator,
    /// Turn orchestrator
    pub relay: StreamingRelay,
}

impl ServerResources {
    /// Assemble resources over a database and a provider factory
    #[must_use]
    pub fn new(database: Database, providers: Arc<dyn ProviderFactory>) -> Self {
        let chat = database.chat();
        let credentials = database.credentials();
        let authenticator = Authenticator::new(database.pool().clone());
        let relay = StreamingRelay::new(chat.clone(), credentials.clone(), providers);

        Self {
            database,
            chat,
            credentials,
            authenticator,
            relay,
        }
    }
}

/// Build the full application router
pub fn build_router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .merge(crate::routes::ChatRoutes::routes(resources.clone()))
        .merge(crate::routes::CredentialRoutes::routes(resources))
        .layer(TraceLayer::new_for_http())
}

/// Liveness probe
async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok" })),
    )
}

/// Run the server until shutdown
///
/// # Errors
///
/// Returns an error if the database cannot be opened or the listener cannot
/// bind.
pub async fn run(config: ServerConfig, providers: Arc<dyn ProviderFactory>) -> AppResult<()> {
    let database = Database::new(&config.database_url).await?;
    let resources = Arc::new(ServerResources::new(database, providers));
    let router = build_router(resources);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| crate::errors::AppError::internal(format!("Failed to bind {addr}: {e}")))?;

    info!("Listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| crate::errors::AppError::internal(format!("Server error: {e}")))?;

    Ok(())
}

async fn shutdown_signal() {
    // Both SIGINT and a failed handler registration fall through to ctrl_c
    if tokio::signal::ctrl_c().await.is_err() {
        info!("Failed to install shutdown handler; running until killed");
        std::future::pending::<()>().await;
    }
}
