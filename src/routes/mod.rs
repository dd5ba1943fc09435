// ABOUTME: HTTP route handler modules
// ABOUTME: Each route group owns its request/response types and handlers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

pub mod chat;
pub mod credentials;

pub use chat::ChatRoutes;
pub use credentials::CredentialRoutes;
