// ABOUTME: Environment-driven server configuration
// ABOUTME: Reads bind address, port, and database URL from the process environment
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

use std::env;

use crate::errors::{AppError, AppResult};

/// Environment variable for the HTTP listen port
const HTTP_PORT_ENV: &str = "PROMPTRELAY_HTTP_PORT";

/// Environment variable for the bind host
const BIND_HOST_ENV: &str = "PROMPTRELAY_BIND_HOST";

/// Environment variable for the SQLite database URL
const DATABASE_URL_ENV: &str = "PROMPTRELAY_DATABASE_URL";

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_BIND_HOST: &str = "127.0.0.1";
const DEFAULT_DATABASE_URL: &str = "sqlite:promptrelay.db?mode=rwc";

/// Server configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// Bind host (defaults to loopback)
    pub bind_host: String,
    /// SQLite database URL
    pub database_url: String,
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if `PROMPTRELAY_HTTP_PORT` is set but not a valid port.
    pub fn from_env() -> AppResult<Self> {
        let http_port = match env::var(HTTP_PORT_ENV) {
            Ok(raw) => raw.parse::<u16>().map_err(|_| {
                AppError::validation(format!("{HTTP_PORT_ENV} must be a port number, got '{raw}'"))
            })?,
            Err(_) => DEFAULT_HTTP_PORT,
        };

        Ok(Self {
            http_port,
            bind_host: env::var(BIND_HOST_ENV).unwrap_or_else(|_| DEFAULT_BIND_HOST.to_owned()),
            database_url: env::var(DATABASE_URL_ENV)
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_owned()),
        })
    }

    /// Socket address string for binding the listener
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.http_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            bind_host: DEFAULT_BIND_HOST.to_owned(),
            database_url: "sqlite::memory:".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_addr_format() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
    }
}
