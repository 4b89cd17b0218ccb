//! # MAL Endpoint
//!
//! One bound URI and everything that routes through it.
//!
//! ```text
//!                 ┌──────────────── receive loop ────────────────┐
//! InboundFrames ─►│ decode ─► initiating? ──yes── PUBSUB? ─yes─► Broker ─► NOTIFY / ack
//!                 │                │                  └──no──► InteractionHandler (task)
//!                 │                └──no──────────────────────► TransactionRegistry
//!                 └──────────────────────────────────────────────┘
//! ```
//!
//! Frames are processed in delivery order by a single task, so stages of one
//! transaction reach the registry in the order the transport produced them.
//! Provider handlers run on their own tasks and never hold up the loop.

use crate::adapters::InProcessNetwork;
use crate::config::EngineConfig;
use crate::domain::registry::{CallMode, CompletionOutcome, TransactionRegistry, WaiterResult};
use crate::domain::state_machine::{
    check_initiating, expects_reply, is_initiating, next_reply_stage, pubsub_reply_stage,
};
use crate::ports::inbound::{InteractionHandler, InteractionListener};
use crate::ports::outbound::{
    InboundFrame, InboundFrames, TransmitErrorListener, Transport, TransportError,
};
use crate::service::provider::{
    ActiveInteractions, InteractionContext, InvokeInteraction, ProgressInteraction,
    RequestInteraction, SendInteraction, SubmitInteraction,
};
use crate::service::sender::{EndpointSnapshot, MessageSender};
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use mal_broker::Broker;
use mal_types::{
    ErrorBody, Identifier, InteractionStage, InteractionType, MalError, MalMessage, MessageBody,
    MessageHeader, OperationKey, ServiceKey, StandardError, TransactionId, Uri,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Consumer-side record of a live subscription: (broker, operation, id).
pub(crate) type SubscriptionSlot = (Uri, OperationKey, Identifier);

struct EndpointInner {
    uri: Uri,
    config: EngineConfig,
    sender: Arc<MessageSender>,
    registry: TransactionRegistry,
    handlers: DashMap<ServiceKey, Arc<dyn InteractionHandler>>,
    broker: RwLock<Option<Arc<Broker>>>,
    active: ActiveInteractions,
    subscriptions: DashMap<SubscriptionSlot, TransactionId>,
    shutdown: watch::Sender<bool>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// A bound MAL endpoint: consumer, provider and (optionally) broker roles
/// share its URI, transport and transaction registry.
#[derive(Clone)]
pub struct MalEndpoint {
    inner: Arc<EndpointInner>,
}

impl MalEndpoint {
    /// Start an endpoint over an already bound transport.
    ///
    /// Spawns the receive loop, so this must run inside a Tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, inbox: InboundFrames, config: EngineConfig) -> Self {
        let uri = transport.local_uri().clone();
        let sender = Arc::new(MessageSender::new(transport, config.codec.codec()));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(EndpointInner {
            uri,
            config,
            sender,
            registry: TransactionRegistry::new(),
            handlers: DashMap::new(),
            broker: RwLock::new(None),
            active: Arc::new(DashSet::new()),
            subscriptions: DashMap::new(),
            shutdown,
            receive_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let task = tokio::spawn(receive_loop(Arc::clone(&inner), inbox, shutdown_rx));
        *inner.receive_task.lock() = Some(task);

        info!(
            uri = %inner.uri,
            codec = inner.sender.codec().name(),
            "MAL endpoint started"
        );
        Self { inner }
    }

    /// Bind `uri` on an in-process network and start an endpoint on it.
    pub fn bind_in_process(
        network: &Arc<InProcessNetwork>,
        uri: impl Into<Uri>,
        config: EngineConfig,
    ) -> Result<Self, TransportError> {
        let (transport, inbox) = network.bind(uri.into())?;
        Ok(Self::start(transport, inbox, config))
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn registry(&self) -> &TransactionRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn stats(&self) -> EndpointSnapshot {
        self.inner.sender.stats.snapshot()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of provider interactions that have not sent a terminal stage.
    #[must_use]
    pub fn active_interactions(&self) -> usize {
        self.inner.active.len()
    }

    pub fn set_transmit_listener(&self, listener: Option<Arc<dyn TransmitErrorListener>>) {
        self.inner.sender.set_transmit_listener(listener);
    }

    // =========================================================================
    // PROVIDER AND BROKER ROLES
    // =========================================================================

    /// Serve `service` with `handler`, replacing any previous handler.
    pub fn register_handler(&self, service: ServiceKey, handler: Arc<dyn InteractionHandler>) {
        if self.inner.handlers.insert(service, handler).is_some() {
            debug!(uri = %self.inner.uri, %service, "Handler replaced");
        } else {
            info!(uri = %self.inner.uri, %service, "Handler registered");
        }
    }

    pub fn unregister_handler(&self, service: &ServiceKey) -> bool {
        self.inner.handlers.remove(service).is_some()
    }

    /// Host a broker on this endpoint. Idempotent.
    pub fn enable_broker(&self) -> Arc<Broker> {
        let mut slot = self.inner.broker.write();
        if let Some(broker) = slot.as_ref() {
            return Arc::clone(broker);
        }
        let broker = Arc::new(Broker::new(self.inner.config.broker));
        *slot = Some(Arc::clone(&broker));
        info!(uri = %self.inner.uri, "Broker enabled");
        broker
    }

    #[must_use]
    pub fn broker(&self) -> Option<Arc<Broker>> {
        self.inner.broker.read().clone()
    }

    // =========================================================================
    // CONSUMER ROLE
    // =========================================================================

    /// Open a transaction and suspend until its first blocking stage
    /// arrives, fails or `timeout` (default: the configured one) elapses.
    ///
    /// Error stages come back as [`MalError::Remote`].
    pub async fn call(
        &self,
        header: MessageHeader,
        body: MessageBody,
        mode: CallMode,
        timeout: Option<Duration>,
    ) -> Result<MalMessage, MalError> {
        if matches!(mode, CallMode::Async(_)) {
            return Err(MalError::IncorrectState(
                "a blocking call needs a blocking mode".into(),
            ));
        }
        let (id, receiver) = self.open(header, body, mode).await?;
        let Some(mut receiver) = receiver else {
            self.inner.registry.remove(id);
            return Err(MalError::IncorrectState(format!(
                "transaction {id} has no waiter"
            )));
        };

        let after = timeout.unwrap_or(self.inner.config.default_timeout);
        match tokio::time::timeout(after, &mut receiver).await {
            Ok(result) => result.map_err(|_| MalError::Shutdown)?,
            Err(_) => {
                // A stage may have won the race; then the receiver holds it.
                self.inner.registry.timeout(id, after);
                receiver.await.map_err(|_| MalError::Shutdown)?
            }
        }
    }

    /// Open a transaction whose every stage goes to `listener`.
    pub async fn call_async(
        &self,
        header: MessageHeader,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId, MalError> {
        let (id, _) = self.open(header, body, CallMode::Async(listener)).await?;
        Ok(id)
    }

    /// Fire an initiating stage that expects no reply (SEND).
    pub async fn send_one_way(
        &self,
        mut header: MessageHeader,
        body: MessageBody,
    ) -> Result<TransactionId, MalError> {
        self.ensure_open()?;
        check_initiating(header.interaction_type, header.interaction_stage)
            .map_err(|violation| MalError::IncorrectState(violation.to_string()))?;
        let id = self.inner.registry.allocate_id();
        header.transaction_id = id;
        header.uri_from = self.inner.uri.clone();
        self.inner
            .sender
            .send(&MalMessage::new(header, body))
            .await?;
        Ok(id)
    }

    /// Send an already complete message as is.
    pub async fn transmit(&self, message: &MalMessage) -> Result<(), MalError> {
        self.ensure_open()?;
        self.inner.sender.send(message).await
    }

    async fn open(
        &self,
        mut header: MessageHeader,
        body: MessageBody,
        mode: CallMode,
    ) -> Result<(TransactionId, Option<oneshot::Receiver<WaiterResult>>), MalError> {
        self.ensure_open()?;
        let interaction = header.interaction_type;
        let stage = header.interaction_stage;
        check_initiating(interaction, stage)
            .map_err(|violation| MalError::IncorrectState(violation.to_string()))?;
        if !expects_reply(interaction, stage) {
            return Err(MalError::IncorrectState(format!(
                "{interaction} stage {stage} expects no reply"
            )));
        }

        let (id, receiver) = self
            .inner
            .registry
            .begin(interaction, stage, header.uri_to.clone(), mode);
        header.transaction_id = id;
        header.uri_from = self.inner.uri.clone();

        if let Err(error) = self.inner.sender.send(&MalMessage::new(header, body)).await {
            self.inner.registry.remove(id);
            return Err(error);
        }
        Ok((id, receiver))
    }

    fn ensure_open(&self) -> Result<(), MalError> {
        if self.is_closed() {
            Err(MalError::Shutdown)
        } else {
            Ok(())
        }
    }

    pub(crate) fn track_subscription(&self, slot: SubscriptionSlot, id: TransactionId) {
        if let Some(previous) = self.inner.subscriptions.insert(slot, id) {
            if previous != id {
                self.inner.registry.remove(previous);
            }
        }
    }

    /// Forget the subscriptions named by `ids` (`*` for all on that broker
    /// and operation) and their REGISTER transactions.
    pub(crate) fn forget_subscriptions(&self, broker: &Uri, operation: &OperationKey, ids: &[Identifier]) {
        let all = ids.iter().any(Identifier::is_wildcard);
        let registry = &self.inner.registry;
        self.inner.subscriptions.retain(|(uri, op, id), transaction| {
            let hit = uri == broker && op == operation && (all || ids.contains(id));
            if hit {
                registry.remove(*transaction);
            }
            !hit
        });
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Stop receiving, fail every pending transaction with SHUTDOWN and
    /// unbind the transport. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.shutdown.send(true);
        let task = self.inner.receive_task.lock().take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                warn!(uri = %self.inner.uri, %error, "Receive loop ended abnormally");
            }
        }

        let failed = self.inner.registry.fail_all(&MalError::Shutdown);
        self.inner.subscriptions.clear();
        self.inner.sender.transport().close().await;
        info!(uri = %self.inner.uri, failed, "MAL endpoint closed");
    }
}

async fn receive_loop(
    inner: Arc<EndpointInner>,
    mut inbox: InboundFrames,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = inbox.recv() => match frame {
                Some(InboundFrame::Encoded(bytes)) => inner.on_frame(bytes).await,
                Some(InboundFrame::PeerLost(uri)) => inner.on_peer_lost(&uri),
                None => break,
            },
        }
    }
    debug!(uri = %inner.uri, "Receive loop stopped");
}

impl EndpointInner {
    async fn on_frame(&self, bytes: Bytes) {
        let message = match self.sender.codec().decode(&bytes) {
            Ok(message) => message,
            Err(error) => {
                self.sender.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(uri = %self.uri, %error, bytes = bytes.len(), "Dropping undecodable frame");
                return;
            }
        };
        self.sender.stats.messages_received.fetch_add(1, Ordering::Relaxed);
        self.dispatch(message).await;
    }

    fn on_peer_lost(&self, peer: &Uri) {
        let broker = self.broker.read().clone();
        if let Some(broker) = broker {
            broker.remove_consumer(peer);
        }

        // Stages past the ack have no timeout; the lost peer ends them here.
        let lost = MalError::Transmit {
            uri: peer.clone(),
            code: StandardError::DestinationLost,
            reason: format!("peer {peer} disconnected"),
        };
        if self.registry.fail_peer(peer, &lost) > 0 {
            self.subscriptions.retain(|(uri, _, _), _| uri != peer);
        }
    }

    async fn dispatch(&self, message: MalMessage) {
        let header = &message.header;
        debug!(
            from = %header.uri_from,
            transaction_id = %header.transaction_id,
            interaction = %header.interaction_type,
            stage = header.stage_name(),
            is_error = header.is_error_message,
            "Message received"
        );

        if header.is_error_message || !is_initiating(header.interaction_type, header.interaction_stage) {
            // Rejections and unknown ids are logged and counted by the registry.
            let outcome = self.registry.complete(message);
            if matches!(outcome, CompletionOutcome::Delivered { terminal: true }) {
                debug!(uri = %self.uri, "Transaction finished");
            }
            return;
        }

        if header.interaction_type == InteractionType::PubSub {
            self.dispatch_to_broker(&message).await;
        } else {
            self.dispatch_to_provider(message).await;
        }
    }

    async fn dispatch_to_broker(&self, message: &MalMessage) {
        let header = &message.header;
        let broker = self.broker.read().clone();
        let replies = match broker {
            Some(broker) => broker.handle(message).unwrap_or_else(|error| {
                vec![MalMessage::error(
                    header.reply(pubsub_reply_stage(header.interaction_stage), true),
                    ErrorBody::new(error.standard_error()),
                )]
            }),
            None => {
                warn!(
                    uri = %self.uri,
                    from = %header.uri_from,
                    stage = header.stage_name(),
                    "PUBSUB stage received but no broker is hosted here"
                );
                vec![MalMessage::error(
                    header.reply(pubsub_reply_stage(header.interaction_stage), true),
                    ErrorBody::new(StandardError::UnsupportedOperation),
                )]
            }
        };

        for reply in replies {
            let is_notify = reply.header.interaction_stage == InteractionStage::NOTIFY;
            if self.sender.send(&reply).await.is_ok() && is_notify {
                self.sender.stats.notifications_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn dispatch_to_provider(&self, message: MalMessage) {
        let header = &message.header;
        let service = header.service_key();
        let handler = self
            .handlers
            .get(&service)
            .map(|entry| Arc::clone(entry.value()));

        let Some(handler) = handler else {
            let code = if self.handlers.iter().any(|entry| entry.key().area == service.area) {
                StandardError::UnsupportedOperation
            } else {
                StandardError::UnsupportedArea
            };
            warn!(uri = %self.uri, %service, operation = header.operation, %code, "No handler for service");
            self.refuse(header, code).await;
            return;
        };

        let key = (header.uri_from.clone(), header.transaction_id);
        if !self.active.insert(key) {
            warn!(
                from = %header.uri_from,
                transaction_id = %header.transaction_id,
                "Duplicate initiating stage for an active interaction"
            );
            return;
        }

        let context = InteractionContext::new(
            message.header.clone(),
            Arc::clone(&self.sender),
            Arc::clone(&self.active),
        );
        tokio::spawn(run_handler(handler, context, message.body));
    }

    /// Answer an initiating stage with an error without involving a handler.
    async fn refuse(&self, header: &MessageHeader, code: StandardError) {
        let Some(stage) = next_reply_stage(header.interaction_type, None) else {
            return;
        };
        let reply = MalMessage::error(header.reply(stage, true), ErrorBody::new(code));
        let _ = self.sender.send(&reply).await;
    }
}

async fn run_handler(
    handler: Arc<dyn InteractionHandler>,
    context: InteractionContext,
    body: MessageBody,
) {
    let interaction = context.interaction_type();
    let result = match interaction {
        InteractionType::Send => handler.on_send(SendInteraction::new(context.clone()), body).await,
        InteractionType::Submit => {
            handler
                .on_submit(SubmitInteraction::new(context.clone()), body)
                .await
        }
        InteractionType::Request => {
            handler
                .on_request(RequestInteraction::new(context.clone()), body)
                .await
        }
        InteractionType::Invoke => {
            handler
                .on_invoke(InvokeInteraction::new(context.clone()), body)
                .await
        }
        InteractionType::Progress => {
            handler
                .on_progress(ProgressInteraction::new(context.clone()), body)
                .await
        }
        InteractionType::PubSub => return,
    };

    if let Err(error) = result {
        if interaction == InteractionType::Send {
            warn!(transaction_id = %context.header().transaction_id, %error, "SEND handler failed");
        } else {
            context.fail(&error).await;
        }
    }
}
