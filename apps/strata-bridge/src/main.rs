//! # Strata Bridge
//!
//! Entry point for the pass-through HTTP bridge to the Strata core.
//!
//! Reads configuration from environment variables:
//! - `STRATA_CORE_URL`: core server URL (default: `http://localhost:3000`)
//! - `STRATA_BRIDGE_ADDR`: listen address (default: `0.0.0.0:8000`)
//! - `STRATA_BRIDGE_TIMEOUT_SECS`: timeout towards the core (default: 30)
//! - `STRATA_BRIDGE_BODY_LIMIT_BYTES`: largest accepted request body (default: 8 MiB)

use strata_bridge::{BridgeConfig, CoreClient, run_bridge};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "strata_bridge=info,tower_http=debug".into());

    if std::env::var("STRATA_LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = BridgeConfig::from_env();
    tracing::info!(
        core = %config.core_url,
        timeout_secs = config.timeout.as_secs(),
        "Strata bridge starting"
    );

    let client = CoreClient::new(config.core_url.clone(), config.timeout)?;
    run_bridge(&config, client).await?;
    Ok(())
}
