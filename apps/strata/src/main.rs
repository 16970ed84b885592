//! # Strata - Bitemporal Knowledge Graph Server
//!
//! The main binary for the Strata multi-tenant graph engine.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for tenant and graph operations on a journal file
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                apps/strata (THE BINARY)              │
//! │                                                      │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────┐  │
//! │   │    CLI      │    │  HTTP API   │    │ Config  │  │
//! │   │   (clap)    │    │   (axum)    │    │ (toml)  │  │
//! │   └──────┬──────┘    └──────┬──────┘    └────┬────┘  │
//! │          └──────────────────┼────────────────┘       │
//! │                             ▼                        │
//! │                     ┌───────────────┐                │
//! │                     │  strata-core  │                │
//! │                     │  (THE ENGINE) │                │
//! │                     └───────────────┘                │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server on a journal
//! strata --data graph.redb server --host 0.0.0.0 --port 3000
//!
//! # CLI operations
//! strata --data graph.redb tenant create acme --name "Acme Corp"
//! strata --data graph.redb ingest --tenant acme --file people.json
//! strata --data graph.redb query --tenant acme --file knows.json
//! ```

use clap::Parser;
use strata::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // STRATA_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("STRATA_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "strata=info,strata_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
