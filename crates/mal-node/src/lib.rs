//! # MAL Broker Node
//!
//! Hosts a publish-subscribe broker on an in-process MAL network and exports
//! engine statistics to Prometheus.
//!
//! ## Startup Sequence
//!
//! 1. Load [`NodeConfig`] from the environment
//! 2. Initialize telemetry (logs, optional OTLP spans, metrics registry)
//! 3. Bind the broker endpoint and enable its broker
//! 4. Spawn the statistics exporter
//! 5. Run until Ctrl+C, then close the endpoint

pub mod config;

pub use config::{ConfigError, NodeConfig};

use mal_broker::Broker;
use mal_interaction::{InProcessNetwork, MalEndpoint, TransportError};
use mal_telemetry::metrics::{
    BROKER_PUBLISHERS, BROKER_SUBSCRIPTIONS, DECODE_ERRORS, MESSAGES_RECEIVED, MESSAGES_SENT,
    NOTIFICATIONS_EMITTED, PROTOCOL_VIOLATIONS, PUBLISHES_ACCEPTED, PUBLISHES_REJECTED,
    TRANSACTIONS_COMPLETED, TRANSACTIONS_FAILED, TRANSACTIONS_PENDING, TRANSACTIONS_REGISTERED,
    TRANSACTIONS_TIMED_OUT, TRANSMIT_ERRORS, UNKNOWN_TRANSACTION_STAGES,
};
use mal_telemetry::advance;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Node startup failures.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind broker endpoint: {0}")]
    Bind(#[from] TransportError),
}

/// A broker endpoint plus the network it lives on.
pub struct BrokerNode {
    config: NodeConfig,
    network: Arc<InProcessNetwork>,
    endpoint: MalEndpoint,
    broker: Arc<Broker>,
    shutdown_tx: watch::Sender<bool>,
    exporter: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerNode {
    /// Bind the broker endpoint on a fresh in-process network.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        Self::with_network(config, InProcessNetwork::new())
    }

    /// Bind the broker endpoint on an existing network.
    pub fn with_network(config: NodeConfig, network: Arc<InProcessNetwork>) -> Result<Self, NodeError> {
        config.validate()?;
        let endpoint =
            MalEndpoint::bind_in_process(&network, config.broker_uri.clone(), config.engine.clone())?;
        let broker = endpoint.enable_broker();
        let (shutdown_tx, _) = watch::channel(false);

        info!(uri = %config.broker_uri, "Broker node created");
        Ok(Self {
            config,
            network,
            endpoint,
            broker,
            shutdown_tx,
            exporter: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn network(&self) -> &Arc<InProcessNetwork> {
        &self.network
    }

    #[must_use]
    pub fn endpoint(&self) -> &MalEndpoint {
        &self.endpoint
    }

    #[must_use]
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Spawn the periodic statistics exporter.
    pub fn start(&self) {
        let endpoint = self.endpoint.clone();
        let broker = Arc::clone(&self.broker);
        let interval = self.config.stats_interval;
        let mut shutdown = self.shutdown_tx.subscribe();

        let handle: JoinHandle<()> = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => export_stats(&endpoint, &broker),
                }
            }
            export_stats(&endpoint, &broker);
            debug!("Statistics exporter stopped");
        });
        *self.exporter.lock() = Some(handle);
        info!(
            uri = %self.config.broker_uri,
            interval_ms = interval.as_millis() as u64,
            "Broker node started"
        );
    }

    /// Stop the exporter and close the endpoint.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(true);
        let exporter = self.exporter.lock().take();
        if let Some(handle) = exporter {
            let _ = handle.await;
        }
        self.endpoint.close().await;
        info!("Broker node stopped");
    }
}

/// Copy engine and broker statistics into the Prometheus registry.
pub fn export_stats(endpoint: &MalEndpoint, broker: &Broker) {
    let registry = endpoint.registry().snapshot();
    advance(&TRANSACTIONS_REGISTERED, registry.registered);
    advance(&TRANSACTIONS_COMPLETED, registry.completed);
    advance(&TRANSACTIONS_TIMED_OUT, registry.timeouts);
    advance(&TRANSACTIONS_FAILED, registry.failed);
    advance(&PROTOCOL_VIOLATIONS, registry.rejected);
    advance(&UNKNOWN_TRANSACTION_STAGES, registry.unknown);
    TRANSACTIONS_PENDING.set(gauge(registry.pending));

    let traffic = endpoint.stats();
    advance(&MESSAGES_SENT, traffic.messages_sent);
    advance(&MESSAGES_RECEIVED, traffic.messages_received);
    advance(&TRANSMIT_ERRORS, traffic.transmit_errors);
    advance(&DECODE_ERRORS, traffic.decode_errors);

    let snapshot = broker.snapshot();
    advance(&NOTIFICATIONS_EMITTED, snapshot.notifications_emitted);
    advance(&PUBLISHES_ACCEPTED, snapshot.publishes_accepted);
    advance(&PUBLISHES_REJECTED, snapshot.publishes_rejected);
    BROKER_SUBSCRIPTIONS.set(gauge(snapshot.subscriptions));
    BROKER_PUBLISHERS.set(gauge(snapshot.publishers));

    debug!(
        pending = registry.pending,
        subscriptions = snapshot.subscriptions,
        publishers = snapshot.publishers,
        "Statistics exported"
    );
}

fn gauge(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
