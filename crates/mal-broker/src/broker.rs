//! # Broker Notify Engine
//!
//! Holds consumer subscriptions and publisher registrations, partitioned by
//! operation, and turns each PUBSUB initiating stage into the replies and
//! notifications it causes.

use crate::matcher::{entity_key_matches, DomainMatching};
use crate::subscription::{update_keys, SubscriptionDetails};
use mal_types::{
    EntityKey, ErrorBody, Identifier, InteractionStage, InteractionType, MalMessage, MessageBody,
    MessageHeader, NotifyMessage, OperationKey, StandardError, Subscription, TransactionId,
    UpdateBatch, Uri,
};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Subscriber count at which filtering switches to the rayon pool.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 32;

/// Broker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    pub domain_matching: DomainMatching,
    /// Filter subscribers in parallel once a partition holds at least this
    /// many subscriptions.
    pub parallel_threshold: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            domain_matching: DomainMatching::default(),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

/// Reasons the broker refuses a PUBSUB message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Not an initiating PUBSUB stage.
    #[error("Unexpected {interaction} stage {stage} at broker")]
    UnexpectedStage {
        interaction: InteractionType,
        stage: InteractionStage,
    },

    /// Body variant does not fit the stage.
    #[error("Stage {stage} expects a {expected} body, got {found}")]
    BadBody {
        stage: InteractionStage,
        expected: &'static str,
        found: &'static str,
    },

    /// A value column has a different length than the header list.
    #[error("Malformed batch: column {column} has {len} values for {expected} updates")]
    MalformedBatch {
        column: usize,
        len: usize,
        expected: usize,
    },

    #[error("Publisher {uri} is not registered")]
    UnknownPublisher { uri: Uri },

    /// The update key is outside the publisher's registered keys.
    #[error("Key {key} is not registered by {uri}")]
    KeyNotRegistered { uri: Uri, key: EntityKey },

    #[error("Update key {key} contains a wildcard")]
    WildcardUpdate { key: EntityKey },
}

impl BrokerError {
    /// The standard error sent back to the originator.
    #[must_use]
    pub fn standard_error(&self) -> StandardError {
        match self {
            Self::UnexpectedStage { .. } => StandardError::IncorrectState,
            Self::BadBody { .. } | Self::MalformedBatch { .. } | Self::WildcardUpdate { .. } => {
                StandardError::BadEncoding
            }
            Self::UnknownPublisher { .. } | Self::KeyNotRegistered { .. } => StandardError::Unknown,
        }
    }
}

/// Broker counters.
#[derive(Debug, Default)]
pub struct BrokerStats {
    pub publishes_accepted: AtomicU64,
    pub publishes_rejected: AtomicU64,
    pub notifications_emitted: AtomicU64,
}

/// Point-in-time broker statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerSnapshot {
    pub subscriptions: usize,
    pub publishers: usize,
    pub publishes_accepted: u64,
    pub publishes_rejected: u64,
    pub notifications_emitted: u64,
}

#[derive(Debug)]
struct PublisherEntry {
    keys: Vec<EntityKey>,
    transaction_id: TransactionId,
}

#[derive(Debug, Default)]
struct Partition {
    /// consumer URI -> subscription id -> state
    consumers: HashMap<Uri, HashMap<Identifier, Arc<SubscriptionDetails>>>,
    publishers: HashMap<Uri, PublisherEntry>,
}

impl Partition {
    fn subscription_count(&self) -> usize {
        self.consumers.values().map(HashMap::len).sum()
    }

    fn is_empty(&self) -> bool {
        self.consumers.is_empty() && self.publishers.is_empty()
    }
}

/// The publish-subscribe broker.
///
/// Registration state lives behind one `RwLock`; PUBLISH takes a snapshot of
/// the matching partition under the read lock and filters outside it.
pub struct Broker {
    config: BrokerConfig,
    partitions: RwLock<HashMap<OperationKey, Partition>>,
    stats: BrokerStats,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            partitions: RwLock::new(HashMap::new()),
            stats: BrokerStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Process one initiating PUBSUB stage and return every message it
    /// causes: the ack, error replies and NOTIFYs.
    pub fn handle(&self, message: &MalMessage) -> Result<Vec<MalMessage>, BrokerError> {
        let header = &message.header;
        if header.interaction_type != InteractionType::PubSub || header.is_error_message {
            return Err(BrokerError::UnexpectedStage {
                interaction: header.interaction_type,
                stage: header.interaction_stage,
            });
        }

        let stage = header.interaction_stage;
        let (ack_stage, result) = match stage {
            InteractionStage::REGISTER => (
                InteractionStage::REGISTER_ACK,
                self.handle_register(header, &message.body),
            ),
            InteractionStage::PUBLISH_REGISTER => (
                InteractionStage::PUBLISH_REGISTER_ACK,
                self.handle_publish_register(header, &message.body),
            ),
            InteractionStage::PUBLISH => (InteractionStage::PUBLISH, self.handle_publish(header, &message.body)),
            InteractionStage::DEREGISTER => (
                InteractionStage::DEREGISTER_ACK,
                self.handle_deregister(header, &message.body),
            ),
            InteractionStage::PUBLISH_DEREGISTER => {
                self.remove_publisher(&header.operation_key(), &header.uri_from);
                (InteractionStage::PUBLISH_DEREGISTER_ACK, Ok(Vec::new()))
            }
            _ => {
                return Err(BrokerError::UnexpectedStage {
                    interaction: header.interaction_type,
                    stage,
                })
            }
        };

        match result {
            Ok(notifications) if stage == InteractionStage::PUBLISH => Ok(notifications),
            Ok(_) => Ok(vec![MalMessage::new(
                header.reply(ack_stage, false),
                MessageBody::Empty,
            )]),
            Err(error) => {
                warn!(
                    uri = %header.uri_from,
                    transaction_id = %header.transaction_id,
                    stage = header.stage_name(),
                    %error,
                    "PUBSUB stage rejected"
                );
                let mut reply = header.reply(ack_stage, true);
                if stage == InteractionStage::PUBLISH {
                    // PUBLISH errors belong to the publisher's registration.
                    if let Some(registration) = self.registration_of(header) {
                        reply.transaction_id = registration;
                    }
                }
                Ok(vec![MalMessage::error(
                    reply,
                    ErrorBody::new(error.standard_error()),
                )])
            }
        }
    }

    /// PUBLISH_REGISTER transaction of the sender of `header`, if known.
    fn registration_of(&self, header: &MessageHeader) -> Option<TransactionId> {
        self.partitions
            .read()
            .get(&header.operation_key())
            .and_then(|partition| partition.publishers.get(&header.uri_from))
            .map(|publisher| publisher.transaction_id)
    }

    fn handle_register(
        &self,
        header: &MessageHeader,
        body: &MessageBody,
    ) -> Result<Vec<MalMessage>, BrokerError> {
        let MessageBody::Register(subscription) = body else {
            return Err(bad_body(header, "register", body));
        };
        self.register(header, subscription);
        Ok(Vec::new())
    }

    /// Create or replace a consumer subscription.
    ///
    /// A REGISTER with an existing id replaces the previous entity requests
    /// wholesale.
    pub fn register(&self, header: &MessageHeader, subscription: &Subscription) {
        let details = Arc::new(SubscriptionDetails::new(header, subscription));
        let mut partitions = self.partitions.write();
        let replaced = partitions
            .entry(header.operation_key())
            .or_default()
            .consumers
            .entry(header.uri_from.clone())
            .or_default()
            .insert(subscription.id.clone(), details)
            .is_some();

        debug!(
            consumer = %header.uri_from,
            subscription = %subscription.id,
            replaced,
            "Subscription registered"
        );
    }

    fn handle_deregister(
        &self,
        header: &MessageHeader,
        body: &MessageBody,
    ) -> Result<Vec<MalMessage>, BrokerError> {
        let MessageBody::Deregister(ids) = body else {
            return Err(bad_body(header, "deregister", body));
        };
        self.deregister(&header.operation_key(), &header.uri_from, ids);
        Ok(Vec::new())
    }

    /// Remove subscriptions of `consumer`. An id of `*` removes all of them.
    /// Returns the number removed.
    pub fn deregister(&self, operation: &OperationKey, consumer: &Uri, ids: &[Identifier]) -> usize {
        let mut partitions = self.partitions.write();
        let Some(partition) = partitions.get_mut(operation) else {
            return 0;
        };

        let removed = match partition.consumers.get_mut(consumer) {
            Some(subscriptions) if ids.iter().any(Identifier::is_wildcard) => {
                let count = subscriptions.len();
                subscriptions.clear();
                count
            }
            Some(subscriptions) => ids
                .iter()
                .filter(|id| subscriptions.remove(*id).is_some())
                .count(),
            None => 0,
        };

        if partition
            .consumers
            .get(consumer)
            .is_some_and(HashMap::is_empty)
        {
            partition.consumers.remove(consumer);
        }
        if partition.is_empty() {
            partitions.remove(operation);
        }

        debug!(consumer = %consumer, removed, "Subscriptions deregistered");
        removed
    }

    fn handle_publish_register(
        &self,
        header: &MessageHeader,
        body: &MessageBody,
    ) -> Result<Vec<MalMessage>, BrokerError> {
        let MessageBody::PublishRegister(keys) = body else {
            return Err(bad_body(header, "publish_register", body));
        };

        let mut partitions = self.partitions.write();
        partitions
            .entry(header.operation_key())
            .or_default()
            .publishers
            .insert(
                header.uri_from.clone(),
                PublisherEntry {
                    keys: keys.clone(),
                    transaction_id: header.transaction_id,
                },
            );

        debug!(publisher = %header.uri_from, keys = keys.len(), "Publisher registered");
        Ok(Vec::new())
    }

    fn remove_publisher(&self, operation: &OperationKey, publisher: &Uri) {
        let mut partitions = self.partitions.write();
        if let Some(partition) = partitions.get_mut(operation) {
            if partition.publishers.remove(publisher).is_some() {
                debug!(publisher = %publisher, "Publisher deregistered");
            }
            if partition.is_empty() {
                partitions.remove(operation);
            }
        }
    }

    fn handle_publish(
        &self,
        header: &MessageHeader,
        body: &MessageBody,
    ) -> Result<Vec<MalMessage>, BrokerError> {
        let MessageBody::Publish(batch) = body else {
            self.stats.publishes_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(bad_body(header, "publish", body));
        };

        match self.publish(header, batch) {
            Ok(notifications) => {
                self.stats.publishes_accepted.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .notifications_emitted
                    .fetch_add(notifications.len() as u64, Ordering::Relaxed);
                Ok(notifications)
            }
            Err(error) => {
                self.stats.publishes_rejected.fetch_add(1, Ordering::Relaxed);
                Err(error)
            }
        }
    }

    /// Validate a publish batch and build one NOTIFY per subscription with at
    /// least one eligible update. A bad batch produces no notifications.
    pub fn publish(
        &self,
        header: &MessageHeader,
        batch: &UpdateBatch,
    ) -> Result<Vec<MalMessage>, BrokerError> {
        let update_keys = update_keys(header, batch)?;

        let operation = header.operation_key();
        let subscribers: Vec<(Uri, Arc<SubscriptionDetails>)> = {
            let partitions = self.partitions.read();
            let partition = partitions.get(&operation);
            let publisher = partition.and_then(|p| p.publishers.get(&header.uri_from));
            let Some(publisher) = publisher else {
                return Err(BrokerError::UnknownPublisher {
                    uri: header.uri_from.clone(),
                });
            };
            if let Some(update) = batch.headers.iter().find(|update| {
                !publisher
                    .keys
                    .iter()
                    .any(|registered| entity_key_matches(registered, &update.key))
            }) {
                return Err(BrokerError::KeyNotRegistered {
                    uri: header.uri_from.clone(),
                    key: update.key.clone(),
                });
            }
            if publisher.transaction_id != header.transaction_id {
                debug!(
                    publisher = %header.uri_from,
                    expected = %publisher.transaction_id,
                    got = %header.transaction_id,
                    "PUBLISH transaction differs from PUBLISH_REGISTER"
                );
            }

            partition
                .map(|p| {
                    p.consumers
                        .iter()
                        .flat_map(|(uri, subs)| subs.values().map(move |s| (uri.clone(), Arc::clone(s))))
                        .collect()
                })
                .unwrap_or_default()
        };

        let mode = self.config.domain_matching;
        let notify = |(consumer, details): &(Uri, Arc<SubscriptionDetails>)| {
            details
                .filter(&update_keys, batch, mode)
                .map(|notify| notify_message(header, consumer, details, notify))
        };

        let notifications: Vec<MalMessage> = if subscribers.len() >= self.config.parallel_threshold {
            subscribers.par_iter().filter_map(notify).collect()
        } else {
            subscribers.iter().filter_map(notify).collect()
        };

        debug!(
            publisher = %header.uri_from,
            updates = batch.len(),
            subscribers = subscribers.len(),
            notifications = notifications.len(),
            "Publish processed"
        );
        Ok(notifications)
    }

    /// Drop every subscription and publisher registration held for `uri`.
    /// Called when the peer disconnects.
    pub fn remove_consumer(&self, uri: &Uri) -> usize {
        let mut partitions = self.partitions.write();
        let mut removed = 0;
        for partition in partitions.values_mut() {
            if let Some(subscriptions) = partition.consumers.remove(uri) {
                removed += subscriptions.len();
            }
            partition.publishers.remove(uri);
        }
        partitions.retain(|_, partition| !partition.is_empty());

        if removed > 0 {
            info!(consumer = %uri, removed, "Dropped subscriptions of departed consumer");
        }
        removed
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.partitions
            .read()
            .values()
            .map(Partition::subscription_count)
            .sum()
    }

    #[must_use]
    pub fn publisher_count(&self) -> usize {
        self.partitions
            .read()
            .values()
            .map(|partition| partition.publishers.len())
            .sum()
    }

    #[must_use]
    pub fn stats(&self) -> &BrokerStats {
        &self.stats
    }

    #[must_use]
    pub fn snapshot(&self) -> BrokerSnapshot {
        BrokerSnapshot {
            subscriptions: self.subscription_count(),
            publishers: self.publisher_count(),
            publishes_accepted: self.stats.publishes_accepted.load(Ordering::Relaxed),
            publishes_rejected: self.stats.publishes_rejected.load(Ordering::Relaxed),
            notifications_emitted: self.stats.notifications_emitted.load(Ordering::Relaxed),
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

fn bad_body(header: &MessageHeader, expected: &'static str, body: &MessageBody) -> BrokerError {
    BrokerError::BadBody {
        stage: header.interaction_stage,
        expected,
        found: body.kind(),
    }
}

/// NOTIFY header: broker to consumer on the REGISTER transaction, in the
/// publish domain, with the consumer's requested QoS.
fn notify_message(
    publish: &MessageHeader,
    consumer: &Uri,
    details: &SubscriptionDetails,
    notify: NotifyMessage,
) -> MalMessage {
    let register = details.register_header();
    let header = MessageHeader {
        uri_from: publish.uri_to.clone(),
        uri_to: consumer.clone(),
        authentication_id: register.authentication_id.clone(),
        timestamp: mal_types::now_millis(),
        qos_level: register.qos_level,
        priority: register.priority,
        domain: publish.domain.clone(),
        network_zone: publish.network_zone.clone(),
        session: publish.session,
        session_name: publish.session_name.clone(),
        interaction_type: InteractionType::PubSub,
        interaction_stage: InteractionStage::NOTIFY,
        transaction_id: details.register_transaction(),
        service_area: publish.service_area,
        service: publish.service,
        operation: publish.operation,
        area_version: publish.area_version,
        is_error_message: false,
        supplements: Vec::new(),
    };
    MalMessage::new(header, MessageBody::Notify(notify))
}
