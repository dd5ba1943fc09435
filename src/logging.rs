// ABOUTME: Tracing subscriber setup for the server binary
// ABOUTME: Honors RUST_LOG via EnvFilter, defaulting to info-level output
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber
///
/// Uses `RUST_LOG` when set, otherwise `info` for this crate and `warn`
/// for dependencies. Calling this twice is a no-op (the second init fails
/// silently), which keeps test processes happy.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,promptrelay=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
