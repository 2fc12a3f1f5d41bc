// SPDX-License-Identifier: Apache-2.0

//! Logging initialization for the RepoMind server.
//!
//! Uses `tracing` with `tracing-subscriber` for structured logging.
//! Log level can be controlled via the `RUST_LOG` environment variable.
//!
//! # Examples
//!
//! ```bash
//! # Default: info for repomind, quieter dependencies
//! repomind-server
//!
//! # Debug output for troubleshooting
//! RUST_LOG=repomind=debug repomind-server
//! ```

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "repomind=info,tower_http=warn,octocrab=error,reqwest=error";

/// Initialize the logging subsystem.
///
/// Logs go to stderr. Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init();
}
