// ABOUTME: Server binary; parses flags, initializes logging, and runs the relay
// ABOUTME: Environment configuration with command-line overrides
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Promptrelay Contributors

use anyhow::Result;
use clap::Parser;
use promptrelay::{config::ServerConfig, llm::HttpProviderFactory, logging, server};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "promptrelay-server")]
#[command(about = "Promptrelay - streaming chat relay with conversation persistence")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override database URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    info!(
        "Starting promptrelay-server on {} (database: {})",
        config.bind_addr(),
        config.database_url
    );

    server::run(config, Arc::new(HttpProviderFactory)).await?;
    Ok(())
}
