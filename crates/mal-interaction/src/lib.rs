//! # MAL Interaction
//!
//! The message exchange engine: it drives every interaction pattern between
//! consumers, providers and brokers over an interchangeable transport.
//!
//! ## Interaction Patterns
//!
//! | Pattern | Caller blocks for | Listener receives |
//! |---------|-------------------|-------------------|
//! | SEND | nothing | nothing |
//! | SUBMIT | SUBMIT_ACK | - |
//! | REQUEST | REQUEST_RESPONSE | - |
//! | INVOKE | INVOKE_ACK | INVOKE_RESPONSE |
//! | PROGRESS | PROGRESS_ACK | PROGRESS_UPDATE*, PROGRESS_RESPONSE |
//! | PUBSUB REGISTER | REGISTER_ACK | NOTIFY* |
//! | PUBSUB PUBLISH_REGISTER | PUBLISH_REGISTER_ACK | PUBLISH errors |
//! | PUBSUB (PUBLISH_)DEREGISTER | the ack | - |
//!
//! Any stage may be replaced by an error stage, which ends the transaction.
//!
//! ## Module Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  service/  - MalEndpoint, MalConsumer, MalProvider, MalPublisher │
//! │  adapters/ - InProcessNetwork binding                            │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ports/inbound.rs  - InteractionHandler, InteractionListener    │
//! │  ports/outbound.rs - Transport, TransmitErrorListener           │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  domain/state_machine.rs - the stage transition table           │
//! │  domain/registry.rs      - TransactionRegistry                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let network = InProcessNetwork::new();
//! let broker = MalEndpoint::bind_in_process(&network, "inproc://broker", EngineConfig::default())?;
//! broker.enable_broker();
//!
//! let endpoint = MalEndpoint::bind_in_process(&network, "inproc://consumer", EngineConfig::default())?;
//! let consumer = MalConsumer::new(endpoint, HeaderTemplate::new("inproc://broker", SERVICE, domain));
//! let (listener, mut notifications) = ChannelListener::new();
//! consumer.register(OPERATION, subscription, Arc::new(listener)).await?;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::panic))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{InProcessNetwork, InProcessTransport};
pub use config::{ConfigError, EngineConfig, DEFAULT_TIMEOUT};
pub use domain::{
    CallMode, CompletionOutcome, Delivery, PendingStats, ProtocolViolation, RegistrySnapshot,
    StageTransition, TransactionRegistry,
};
pub use ports::{
    ChannelListener, InboundFrame, InboundFrames, InteractionHandler, InteractionListener,
    ListenerEvent, ListenerStream, TransmitErrorListener, Transport, TransportError,
};
pub use service::{
    EndpointSnapshot, InteractionContext, InvokeInteraction, MalConsumer, MalEndpoint,
    MalProvider, MalPublisher, ProgressInteraction, PublisherCache, PublisherKey,
    RequestInteraction, SendInteraction, SubmitInteraction,
};
