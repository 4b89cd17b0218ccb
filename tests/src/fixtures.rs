//! # Test Fixtures
//!
//! A small MAL deployment on one in-process network: a broker endpoint, a
//! provider endpoint serving [`SERVICE`] with [`ScriptedHandler`], and a
//! consumer endpoint.

use async_trait::async_trait;
use mal_interaction::{
    EngineConfig, InProcessNetwork, InteractionHandler, InvokeInteraction, ListenerEvent,
    ListenerStream, MalConsumer, MalEndpoint, ProgressInteraction, RequestInteraction,
    SendInteraction, SubmitInteraction,
};
use mal_types::{Domain, Element, HeaderTemplate, MalError, MessageBody, ServiceKey, Uri};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// The service every fixture provider serves.
pub const SERVICE: ServiceKey = ServiceKey::new(200, 1, 1);

/// Answers with the request body.
pub const OP_ECHO: u16 = 1;
/// Handler returns a validation error before replying.
pub const OP_FAIL: u16 = 2;
/// Handler returns without replying.
pub const OP_SILENT: u16 = 3;
/// Handler acknowledges, then fails.
pub const OP_FAIL_AFTER_ACK: u16 = 4;
/// PUBSUB operation used by the broker flows.
pub const OP_MONITOR: u16 = 10;

/// Upper bound for waiting on a single event in a test.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Mission domain used throughout.
pub fn mission() -> Domain {
    Domain::from_dotted("esa.mission")
}

/// Provider logic selected by operation number.
pub struct ScriptedHandler {
    sends: mpsc::UnboundedSender<MessageBody>,
}

impl ScriptedHandler {
    /// The handler plus the channel SEND bodies arrive on.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MessageBody>) {
        let (sends, received) = mpsc::unbounded_channel();
        (Arc::new(Self { sends }), received)
    }
}

fn rejected() -> MalError {
    MalError::Validation("operation rejected by provider".into())
}

#[async_trait]
impl InteractionHandler for ScriptedHandler {
    async fn on_send(&self, _interaction: SendInteraction, body: MessageBody) -> Result<(), MalError> {
        let _ = self.sends.send(body);
        Ok(())
    }

    async fn on_submit(&self, interaction: SubmitInteraction, _body: MessageBody) -> Result<(), MalError> {
        match interaction.header().operation {
            OP_FAIL => Err(rejected()),
            OP_SILENT => Ok(()),
            _ => interaction.ack().await,
        }
    }

    async fn on_request(&self, interaction: RequestInteraction, body: MessageBody) -> Result<(), MalError> {
        match interaction.header().operation {
            OP_FAIL => Err(rejected()),
            OP_SILENT => Ok(()),
            _ => interaction.reply(body).await,
        }
    }

    async fn on_invoke(&self, interaction: InvokeInteraction, body: MessageBody) -> Result<(), MalError> {
        match interaction.header().operation {
            OP_FAIL => Err(rejected()),
            OP_SILENT => Ok(()),
            OP_FAIL_AFTER_ACK => {
                interaction.ack().await?;
                Err(rejected())
            }
            _ => {
                interaction.ack().await?;
                interaction.reply(body).await
            }
        }
    }

    async fn on_progress(&self, interaction: ProgressInteraction, body: MessageBody) -> Result<(), MalError> {
        match interaction.header().operation {
            OP_FAIL => Err(rejected()),
            OP_SILENT => Ok(()),
            OP_FAIL_AFTER_ACK => {
                interaction.ack().await?;
                Err(rejected())
            }
            _ => {
                interaction.ack().await?;
                for step in 1..=2 {
                    interaction
                        .update(MessageBody::Elements(vec![Element::Long(step)]))
                        .await?;
                }
                interaction.reply(body).await
            }
        }
    }
}

/// Broker, provider and consumer endpoints on one network.
pub struct Cluster {
    pub network: Arc<InProcessNetwork>,
    pub broker: MalEndpoint,
    pub provider: MalEndpoint,
    pub consumer: MalEndpoint,
    /// SEND bodies received by the provider.
    pub sends: mpsc::UnboundedReceiver<MessageBody>,
}

impl Cluster {
    pub fn start() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let network = InProcessNetwork::new();
        let broker = bind(&network, "broker", &config);
        broker.enable_broker();

        let provider = bind(&network, "provider", &config);
        let (handler, sends) = ScriptedHandler::new();
        provider.register_handler(SERVICE, handler);

        let consumer = bind(&network, "consumer", &config);
        Self {
            network,
            broker,
            provider,
            consumer,
            sends,
        }
    }

    /// A consumer of [`SERVICE`] at the provider.
    pub fn service_consumer(&self) -> MalConsumer {
        MalConsumer::new(
            self.consumer.clone(),
            HeaderTemplate::new(self.provider.uri().clone(), SERVICE, mission()),
        )
    }

    /// A consumer of [`SERVICE`] at the broker.
    pub fn broker_consumer(&self, endpoint: &MalEndpoint) -> MalConsumer {
        MalConsumer::new(
            endpoint.clone(),
            HeaderTemplate::new(self.broker.uri().clone(), SERVICE, mission()),
        )
    }

    /// Another endpoint on the same network.
    pub fn endpoint(&self, prefix: &str) -> MalEndpoint {
        bind(&self.network, prefix, self.broker.config())
    }

    pub fn broker_uri(&self) -> Uri {
        self.broker.uri().clone()
    }

    pub async fn shutdown(&self) {
        self.consumer.close().await;
        self.provider.close().await;
        self.broker.close().await;
    }
}

fn bind(network: &Arc<InProcessNetwork>, prefix: &str, config: &EngineConfig) -> MalEndpoint {
    MalEndpoint::bind_in_process(network, network.unique_uri(prefix), config.clone())
        .unwrap_or_else(|error| panic!("bind {prefix}: {error}"))
}

/// Next listener event, failing the test if none arrives in time.
pub async fn next_event(stream: &mut ListenerStream) -> ListenerEvent {
    match tokio::time::timeout(EVENT_TIMEOUT, stream.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("listener stream closed"),
        Err(_) => panic!("no listener event within {EVENT_TIMEOUT:?}"),
    }
}

/// Poll `condition` until it holds or [`EVENT_TIMEOUT`] passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
