//! # Publishers and Providers
//!
//! A [`MalProvider`] serves one service on an endpoint and hands out
//! [`MalPublisher`]s for its PUBSUB operations. Publishers are cached per
//! [`PublisherKey`]; the cache lives until the provider closes.

use crate::domain::registry::CallMode;
use crate::ports::inbound::{InteractionHandler, InteractionListener};
use crate::service::endpoint::MalEndpoint;
use mal_types::{
    Domain, EntityKey, HeaderTemplate, Identifier, InteractionStage, InteractionType, MalError,
    MalMessage, MessageBody, QoSLevel, ServiceKey, SessionType, TransactionId, UpdateBatch, Uri,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything that makes two publishers of one provider distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublisherKey {
    pub operation: u16,
    pub domain: Domain,
    pub network_zone: Identifier,
    pub session: SessionType,
    pub session_name: Identifier,
    pub qos_level: QoSLevel,
    pub priority: u32,
}

impl PublisherKey {
    /// Live, best-effort publisher in the `GROUND` zone.
    pub fn new(operation: u16, domain: Domain) -> Self {
        Self {
            operation,
            domain,
            network_zone: Identifier::from("GROUND"),
            session: SessionType::default(),
            session_name: Identifier::from("LIVE"),
            qos_level: QoSLevel::default(),
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session: SessionType, session_name: impl Into<Identifier>) -> Self {
        self.session = session;
        self.session_name = session_name.into();
        self
    }

    #[must_use]
    pub fn with_network_zone(mut self, zone: impl Into<Identifier>) -> Self {
        self.network_zone = zone.into();
        self
    }

    #[must_use]
    pub fn with_qos(mut self, qos_level: QoSLevel, priority: u32) -> Self {
        self.qos_level = qos_level;
        self.priority = priority;
        self
    }

    /// Deterministic cache key, e.g. `3|esa.mission|GROUND|LIVE|LIVE|BESTEFFORT|0`.
    ///
    /// Backslashes, `|` and `.` inside identifiers are escaped with `\`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut key = self.operation.to_string();
        key.push('|');
        for (index, part) in self.domain.parts().iter().enumerate() {
            if index > 0 {
                key.push('.');
            }
            push_escaped(&mut key, part.as_str());
        }
        key.push('|');
        push_escaped(&mut key, self.network_zone.as_str());
        key.push_str(&format!("|{}|", self.session));
        push_escaped(&mut key, self.session_name.as_str());
        key.push_str(&format!("|{}|{}", self.qos_level, self.priority));
        key
    }

    fn template(&self, broker: &Uri, service: ServiceKey) -> HeaderTemplate {
        HeaderTemplate::new(broker.clone(), service, self.domain.clone())
            .with_network_zone(self.network_zone.clone())
            .with_session(self.session, self.session_name.clone())
            .with_qos(self.qos_level, self.priority)
    }
}

/// Publishing side of one PUBSUB operation.
pub struct MalPublisher {
    endpoint: MalEndpoint,
    key: PublisherKey,
    template: HeaderTemplate,
    registration: Mutex<Option<TransactionId>>,
}

impl MalPublisher {
    fn new(endpoint: MalEndpoint, broker: &Uri, service: ServiceKey, key: PublisherKey) -> Self {
        let template = key.template(broker, service);
        Self {
            endpoint,
            key,
            template,
            registration: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn key(&self) -> &PublisherKey {
        &self.key
    }

    /// Transaction id of the current PUBLISH_REGISTER, if registered.
    #[must_use]
    pub fn registration(&self) -> Option<TransactionId> {
        *self.registration.lock()
    }

    /// PUBLISH_REGISTER `keys` with the broker. PUBLISH errors for this
    /// publisher are reported to `listener`.
    pub async fn register(
        &self,
        keys: Vec<EntityKey>,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId, MalError> {
        let header = self.template.header(
            self.endpoint.uri(),
            InteractionType::PubSub,
            InteractionStage::PUBLISH_REGISTER,
            self.key.operation,
        );
        let ack = self
            .endpoint
            .call(
                header,
                MessageBody::PublishRegister(keys),
                CallMode::BlockingThenAsync(listener),
                None,
            )
            .await?;

        let transaction_id = ack.header.transaction_id;
        let previous = self.registration.lock().replace(transaction_id);
        if let Some(previous) = previous.filter(|previous| *previous != transaction_id) {
            self.endpoint.registry().remove(previous);
        }
        info!(
            broker = %self.template.uri_to,
            operation = self.key.operation,
            transaction_id = %transaction_id,
            "Publisher registered"
        );
        Ok(transaction_id)
    }

    /// Fire one PUBLISH. Fails locally if the batch is malformed or the
    /// publisher is not registered; broker-side rejections arrive at the
    /// registration listener.
    pub async fn publish(&self, batch: UpdateBatch) -> Result<(), MalError> {
        if let Err((column, len)) = batch.validate() {
            return Err(MalError::Validation(format!(
                "column {column} has {len} values for {} updates",
                batch.len()
            )));
        }
        if let Some(update) = batch.headers.iter().find(|update| !update.key.is_concrete()) {
            return Err(MalError::Validation(format!(
                "published key {} contains a wildcard",
                update.key
            )));
        }
        let Some(transaction_id) = self.registration() else {
            return Err(MalError::IncorrectState(
                "publisher is not registered".into(),
            ));
        };

        let mut header = self.template.header(
            self.endpoint.uri(),
            InteractionType::PubSub,
            InteractionStage::PUBLISH,
            self.key.operation,
        );
        header.transaction_id = transaction_id;
        debug!(transaction_id = %transaction_id, updates = batch.len(), "Publishing");
        self.endpoint
            .transmit(&MalMessage::new(header, MessageBody::Publish(batch)))
            .await
    }

    /// PUBLISH_DEREGISTER. A publisher that never registered succeeds
    /// without contacting the broker.
    pub async fn deregister(&self) -> Result<(), MalError> {
        let Some(registration) = self.registration() else {
            return Ok(());
        };
        let header = self.template.header(
            self.endpoint.uri(),
            InteractionType::PubSub,
            InteractionStage::PUBLISH_DEREGISTER,
            self.key.operation,
        );
        self.endpoint
            .call(header, MessageBody::Empty, CallMode::Blocking, None)
            .await?;

        self.registration.lock().take();
        self.endpoint.registry().remove(registration);
        info!(broker = %self.template.uri_to, operation = self.key.operation, "Publisher deregistered");
        Ok(())
    }
}

fn push_escaped(key: &mut String, text: &str) {
    for c in text.chars() {
        if matches!(c, '\\' | '|' | '.') {
            key.push('\\');
        }
        key.push(c);
    }
}

/// Publishers of one provider, one per [`PublisherKey`].
#[derive(Default)]
pub struct PublisherCache {
    publishers: Mutex<HashMap<String, Arc<MalPublisher>>>,
}

impl PublisherCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached publisher for `key`, created with `create` on first use.
    pub fn get_or_create<F>(&self, key: &PublisherKey, create: F) -> Arc<MalPublisher>
    where
        F: FnOnce() -> MalPublisher,
    {
        let mut publishers = self.publishers.lock();
        Arc::clone(
            publishers
                .entry(key.cache_key())
                .or_insert_with(|| Arc::new(create())),
        )
    }

    /// Drop every entry and return them.
    pub fn invalidate(&self) -> Vec<Arc<MalPublisher>> {
        self.publishers.lock().drain().map(|(_, publisher)| publisher).collect()
    }

    pub fn len(&self) -> usize {
        self.publishers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.lock().is_empty()
    }
}

/// Provider of one service on an endpoint.
pub struct MalProvider {
    endpoint: MalEndpoint,
    service: ServiceKey,
    broker: Option<Uri>,
    cache: PublisherCache,
}

impl MalProvider {
    /// Serve `service` on `endpoint` with `handler`.
    pub fn new(endpoint: MalEndpoint, service: ServiceKey, handler: Arc<dyn InteractionHandler>) -> Self {
        endpoint.register_handler(service, handler);
        Self {
            endpoint,
            service,
            broker: None,
            cache: PublisherCache::new(),
        }
    }

    /// Publish through the broker at `broker`.
    #[must_use]
    pub fn with_broker(mut self, broker: Uri) -> Self {
        self.broker = Some(broker);
        self
    }

    #[must_use]
    pub fn service(&self) -> ServiceKey {
        self.service
    }

    #[must_use]
    pub fn cache(&self) -> &PublisherCache {
        &self.cache
    }

    /// The publisher for `key`, shared by every caller asking for it.
    pub fn publisher(&self, key: PublisherKey) -> Result<Arc<MalPublisher>, MalError> {
        let Some(broker) = self.broker.as_ref() else {
            return Err(MalError::IncorrectState(format!(
                "provider {} has no broker",
                self.service
            )));
        };
        Ok(self.cache.get_or_create(&key, || {
            MalPublisher::new(self.endpoint.clone(), broker, self.service, key.clone())
        }))
    }

    /// Stop serving: deregister every registered publisher, empty the cache
    /// and remove the handler. The endpoint stays open.
    pub async fn close(&self) {
        for publisher in self.cache.invalidate() {
            if let Err(error) = publisher.deregister().await {
                warn!(operation = publisher.key().operation, %error, "Publisher deregister failed on close");
            }
        }
        self.endpoint.unregister_handler(&self.service);
        info!(service = %self.service, "Provider closed");
    }
}
