// ABOUTME: Main library entry point for the promptrelay chat relay
// ABOUTME: Streams LLM responses over SSE and keeps conversation state in SQLite
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

#![deny(unsafe_code)]

//! # Promptrelay
//!
//! The server core of a chat application: it relays streamed LLM responses
//! from vendor APIs to clients over SSE while keeping conversation state
//! durable in SQLite.
//!
//! ## Architecture
//!
//! - **llm**: canonical chat types and one binding per vendor (OpenAI,
//!   Anthropic, Google), resolved from the model prefix
//! - **database**: owner-scoped conversation, message, and credential
//!   persistence
//! - **relay**: the turn orchestrator; validates, persists, streams, and
//!   flushes the assistant message in a single final write
//! - **routes** / **server**: the axum HTTP surface
//! - **client**: the consumer half of the stream protocol
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use promptrelay::config::ServerConfig;
//! use promptrelay::errors::AppResult;
//! use promptrelay::llm::HttpProviderFactory;
//!
//! #[tokio::main]
//! async fn main() -> AppResult<()> {
//!     promptrelay::logging::init();
//!     let config = ServerConfig::from_env()?;
//!     promptrelay::server::run(config, Arc::new(HttpProviderFactory)).await
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod database;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod relay;
pub mod routes;
pub mod server;
