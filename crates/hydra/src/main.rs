//! Hydra binary
//!
//! Starts a fleet of heads and runs until interrupted.

use clap::Parser;
use hydra::{Hydra, HydraConfig};
use hydra_metrics::Metrics;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hydra=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = HydraConfig::parse();
    tracing::info!(heads = config.nsybils, "Starting Hydra");

    let fleet = Hydra::start(config, Metrics::with_default_views()).await?;
    tokio::signal::ctrl_c().await?;
    fleet.shutdown().await?;

    Ok(())
}
