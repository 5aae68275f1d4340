//! Price oracle - standalone service
//!
//! Runs the refresh, warm-up and durable flush loops against the configured
//! cache snapshot until interrupted. Hosts embedding the library register
//! their own price sources; this binary only keeps the snapshot maintained.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use oracle_cache::JsonFileStore;
use oracle_core::{system_clock, OracleConfig};
use oracle_price_feed::SourceRegistry;
use oracle_service::Oracle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting price oracle v{}", env!("CARGO_PKG_VERSION"));

    let config_path = env::var("ORACLE_CONFIG").ok().map(PathBuf::from);
    let config = OracleConfig::load(config_path.as_deref())?;

    let snapshot =
        env::var("ORACLE_SNAPSHOT").unwrap_or_else(|_| "oracle-cache.json".to_string());
    let store = Arc::new(JsonFileStore::open(&snapshot).await?);

    let oracle = Oracle::new(config, Arc::new(SourceRegistry::new()), store, system_clock())?;
    oracle.start();

    info!("Durable snapshot at {}", snapshot);
    info!("Press Ctrl+C to shutdown");

    shutdown_signal().await?;

    oracle.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => {
                res?;
                info!("Received Ctrl+C");
            }
            _ = terminate.recv() => {
                info!("Received termination signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
