// SPDX-License-Identifier: Apache-2.0

//! Binary entry point for the RepoMind HTTP server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use repomind_core::{AppState, load_config, load_config_from};
use repomind_server::logging::init_logging;

/// Chat with an AI assistant about a GitHub repository or profile.
#[derive(Debug, Parser)]
#[command(name = "repomind-server", version, about)]
struct Args {
    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Config file (defaults to the platform config directory).
    #[arg(long, env = "REPOMIND_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let config = match &args.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let state = Arc::new(AppState::new(config));

    repomind_server::run_http(state, &args.host, args.port).await
}
