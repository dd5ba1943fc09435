// ABOUTME: Unified error handling with stable error codes and HTTP response mapping
// ABOUTME: Every fallible path in the relay surfaces as an AppError carrying an ErrorCode
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

//! # Unified Error Handling
//!
//! One error type for the whole crate. Each `AppError` carries an `ErrorCode`
//! that maps to an HTTP status and a stable wire identifier, so route handlers
//! can bubble errors with `?` and let the axum boundary render the JSON body.
//!
//! Failures that occur after SSE headers are committed cannot change the HTTP
//! status; they are delivered as in-stream `error` events instead (see the
//! `relay` module) and use `ErrorCode::StreamingError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Standard error codes used throughout the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed or missing required input; rejected before any side effect
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    /// No authenticated identity; checked before any other work
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    /// No stored API key for the resolved provider
    #[serde(rename = "MISSING_CREDENTIAL")]
    MissingCredential,
    /// Model identifier does not map to a known provider
    #[serde(rename = "UNKNOWN_MODEL")]
    UnknownModel,
    /// Resource absent or owned by someone else (indistinguishable on purpose)
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    /// Vendor API returned a non-success status or malformed payload
    #[serde(rename = "PROVIDER_ERROR")]
    ProviderError,
    /// Persistence failure
    #[serde(rename = "STORE_ERROR")]
    StoreError,
    /// Failure after token emission began; delivered in-stream, not as a status
    #[serde(rename = "STREAMING_ERROR")]
    StreamingError,
    /// Anything else
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::ValidationError | Self::MissingCredential | Self::UnknownModel => 400,
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::ProviderError => 502,
            // StreamingError only reaches the HTTP boundary if the stream
            // failed before any frame was written.
            Self::StoreError | Self::StreamingError | Self::Internal => 500,
        }
    }

    /// Get a user-facing description of this error
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ValidationError => "The provided input is invalid",
            Self::Unauthorized => "Authentication is required to access this resource",
            Self::MissingCredential => "No API key is configured for the requested provider",
            Self::UnknownModel => "The requested model is not recognized",
            Self::NotFound => "The requested resource was not found",
            Self::ProviderError => "The upstream provider reported an error",
            Self::StoreError => "A storage operation failed",
            Self::StreamingError => "The response stream failed",
            Self::Internal => "An internal server error occurred",
        }
    }
}

/// Unified error type for the application
#[derive(Debug, Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Source error for error chaining
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new error with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Attach a source error for chaining
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Invalid or missing input
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// No authenticated identity
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// No stored credential for (user, provider)
    pub fn missing_credential(provider: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::MissingCredential,
            format!("No API key configured for provider '{provider}'"),
        )
    }

    /// Unrecognized model identifier
    pub fn unknown_model(model: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::UnknownModel,
            format!("Unknown model '{model}': expected a gpt-, claude-, or gemini- prefix"),
        )
    }

    /// Resource not found (or not owned by the caller)
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::NotFound,
            format!("{} not found", resource.into()),
        )
    }

    /// Vendor API failure, carrying the vendor's detail
    pub fn provider(vendor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ProviderError,
            format!("{}: {}", vendor.into(), message.into()),
        )
    }

    /// Persistence failure
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreError, message)
    }

    /// Mid-stream failure
    pub fn streaming(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StreamingError, message)
    }

    /// Internal server error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// HTTP error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorResponseDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponseDetails {
    pub code: ErrorCode,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        Self {
            error: ErrorResponseDetails {
                code: error.code,
                message: error.message,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // Store failures must not leak internals to clients
        let body = if self.code == ErrorCode::StoreError {
            ErrorResponse {
                error: ErrorResponseDetails {
                    code: self.code,
                    message: self.code.description().to_owned(),
                },
            }
        } else {
            ErrorResponse::from(self)
        };
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(ErrorCode::Internal, error.to_string())
    }
}
