//! Prometheus metrics for MAL processes.
//!
//! All metrics follow the naming convention: `mal_<component>_<metric>_<unit>`
//!
//! The engine keeps its own atomic counters; a process exports them here
//! periodically with [`advance`] (counters) and `set` (gauges).

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // TRANSACTION METRICS
    // =========================================================================

    pub static ref TRANSACTIONS_REGISTERED: IntCounter = IntCounter::new(
        "mal_transactions_registered_total",
        "Transactions opened by local consumers"
    ).expect("metric creation failed");

    pub static ref TRANSACTIONS_COMPLETED: IntCounter = IntCounter::new(
        "mal_transactions_completed_total",
        "Transactions that reached a terminal stage"
    ).expect("metric creation failed");

    pub static ref TRANSACTIONS_TIMED_OUT: IntCounter = IntCounter::new(
        "mal_transactions_timed_out_total",
        "Synchronous calls that expired"
    ).expect("metric creation failed");

    pub static ref TRANSACTIONS_FAILED: IntCounter = IntCounter::new(
        "mal_transactions_failed_total",
        "Transactions ended by a transmit error or shutdown"
    ).expect("metric creation failed");

    /// Out-of-sequence or duplicate stages for a known transaction
    pub static ref PROTOCOL_VIOLATIONS: IntCounter = IntCounter::new(
        "mal_protocol_violations_total",
        "Stages rejected by the interaction state machine"
    ).expect("metric creation failed");

    pub static ref UNKNOWN_TRANSACTION_STAGES: IntCounter = IntCounter::new(
        "mal_unknown_transaction_stages_total",
        "Stages dropped because their transaction was unknown"
    ).expect("metric creation failed");

    pub static ref TRANSACTIONS_PENDING: IntGauge = IntGauge::new(
        "mal_transactions_pending",
        "Transactions currently awaiting a stage"
    ).expect("metric creation failed");

    // =========================================================================
    // ENDPOINT METRICS
    // =========================================================================

    pub static ref MESSAGES_SENT: IntCounter = IntCounter::new(
        "mal_endpoint_messages_sent_total",
        "Messages handed to the transport"
    ).expect("metric creation failed");

    pub static ref MESSAGES_RECEIVED: IntCounter = IntCounter::new(
        "mal_endpoint_messages_received_total",
        "Messages decoded from the transport"
    ).expect("metric creation failed");

    pub static ref TRANSMIT_ERRORS: IntCounter = IntCounter::new(
        "mal_endpoint_transmit_errors_total",
        "Messages the transport refused"
    ).expect("metric creation failed");

    pub static ref DECODE_ERRORS: IntCounter = IntCounter::new(
        "mal_endpoint_decode_errors_total",
        "Frames dropped because they could not be decoded"
    ).expect("metric creation failed");

    // =========================================================================
    // BROKER METRICS
    // =========================================================================

    pub static ref NOTIFICATIONS_EMITTED: IntCounter = IntCounter::new(
        "mal_broker_notifications_emitted_total",
        "NOTIFY messages produced by the broker"
    ).expect("metric creation failed");

    pub static ref PUBLISHES_ACCEPTED: IntCounter = IntCounter::new(
        "mal_broker_publishes_accepted_total",
        "PUBLISH batches filtered and fanned out"
    ).expect("metric creation failed");

    pub static ref PUBLISHES_REJECTED: IntCounter = IntCounter::new(
        "mal_broker_publishes_rejected_total",
        "PUBLISH batches rejected as a whole"
    ).expect("metric creation failed");

    pub static ref BROKER_SUBSCRIPTIONS: IntGauge = IntGauge::new(
        "mal_broker_subscriptions",
        "Live consumer subscriptions"
    ).expect("metric creation failed");

    pub static ref BROKER_PUBLISHERS: IntGauge = IntGauge::new(
        "mal_broker_publishers",
        "Registered publishers"
    ).expect("metric creation failed");
}

/// Handle to the populated registry.
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Transactions
        Box::new(TRANSACTIONS_REGISTERED.clone()),
        Box::new(TRANSACTIONS_COMPLETED.clone()),
        Box::new(TRANSACTIONS_TIMED_OUT.clone()),
        Box::new(TRANSACTIONS_FAILED.clone()),
        Box::new(PROTOCOL_VIOLATIONS.clone()),
        Box::new(UNKNOWN_TRANSACTION_STAGES.clone()),
        Box::new(TRANSACTIONS_PENDING.clone()),
        // Endpoint
        Box::new(MESSAGES_SENT.clone()),
        Box::new(MESSAGES_RECEIVED.clone()),
        Box::new(TRANSMIT_ERRORS.clone()),
        Box::new(DECODE_ERRORS.clone()),
        // Broker
        Box::new(NOTIFICATIONS_EMITTED.clone()),
        Box::new(PUBLISHES_ACCEPTED.clone()),
        Box::new(PUBLISHES_REJECTED.clone()),
        Box::new(BROKER_SUBSCRIPTIONS.clone()),
        Box::new(BROKER_PUBLISHERS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Raise `counter` to `total`. Totals never go down, so a lower value is
/// ignored.
pub fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
