// ABOUTME: Test helper module exports
// ABOUTME: HTTP request utilities shared by the integration tests

pub mod axum_test;
