//! # MAL Broker Node
//!
//! Entry point: configuration, telemetry, broker endpoint, Ctrl+C shutdown.

use anyhow::{Context, Result};
use mal_node::{BrokerNode, NodeConfig};
use mal_telemetry::init_telemetry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from_env().context("Invalid node configuration")?;
    let _telemetry = init_telemetry(config.telemetry.clone())
        .await
        .context("Failed to initialize telemetry")?;

    info!("===========================================");
    info!("  MAL Broker Node v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    let node = BrokerNode::new(config).context("Failed to start broker node")?;
    node.start();

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    node.shutdown().await;
    Ok(())
}
