//! # Inbound Ports
//!
//! Traits implemented by code that sits on top of the engine:
//!
//! | Trait | Implemented by | Called for |
//! |-------|----------------|------------|
//! | [`InteractionListener`] | consumers | async stages (INVOKE_RESPONSE, PROGRESS_UPDATE, NOTIFY, ...) |
//! | [`InteractionHandler`] | providers | each initiating stage routed to the provider role |

use crate::service::provider::{
    InvokeInteraction, ProgressInteraction, RequestInteraction, SendInteraction,
    SubmitInteraction,
};
use async_trait::async_trait;
use mal_types::{MalError, MalMessage, MessageBody, StandardError, TransactionId};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::debug;

/// Receives the asynchronous stages of a consumer call.
///
/// Called from the endpoint's receive loop; implementations must not block.
pub trait InteractionListener: Send + Sync {
    /// A stage for the listened transaction. Error stages have
    /// `header.is_error_message` set and an [`mal_types::ErrorBody`].
    fn on_message(&self, message: &MalMessage);

    /// The transaction ended locally: transmit error or endpoint shutdown.
    fn on_failure(&self, transaction_id: TransactionId, error: &MalError) {
        debug!(transaction_id = %transaction_id, %error, "Listener ignored failure");
    }
}

/// Event yielded by a [`ListenerStream`].
pub type ListenerEvent = Result<MalMessage, MalError>;

/// Listener that forwards everything into an unbounded channel.
#[derive(Clone)]
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<ListenerEvent>,
}

impl ChannelListener {
    /// Create the listener and the stream it feeds.
    pub fn new() -> (Self, ListenerStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, ListenerStream { receiver })
    }
}

impl InteractionListener for ChannelListener {
    fn on_message(&self, message: &MalMessage) {
        if self.sender.send(Ok(message.clone())).is_err() {
            debug!(
                transaction_id = %message.header.transaction_id,
                "Listener stream dropped"
            );
        }
    }

    fn on_failure(&self, _transaction_id: TransactionId, error: &MalError) {
        let _ = self.sender.send(Err(error.clone()));
    }
}

/// Receiving side of a [`ChannelListener`].
pub struct ListenerStream {
    receiver: mpsc::UnboundedReceiver<ListenerEvent>,
}

impl ListenerStream {
    /// Next event, or `None` once every listener clone is gone.
    pub async fn recv(&mut self) -> Option<ListenerEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is queued.
    pub fn try_recv(&mut self) -> Option<ListenerEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for ListenerStream {
    type Item = ListenerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

fn unsupported() -> MalError {
    MalError::remote(StandardError::UnsupportedOperation)
}

/// Provider-side business logic for one service.
///
/// Each method receives the request body and a context that can send the
/// replies the pattern allows. Returning `Err` before a terminal reply was
/// sent makes the endpoint send that error at the next legal stage.
/// Unimplemented operations answer UNSUPPORTED_OPERATION.
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    async fn on_send(&self, interaction: SendInteraction, body: MessageBody) -> Result<(), MalError> {
        let _ = (interaction, body);
        Err(unsupported())
    }

    async fn on_submit(
        &self,
        interaction: SubmitInteraction,
        body: MessageBody,
    ) -> Result<(), MalError> {
        let _ = (interaction, body);
        Err(unsupported())
    }

    async fn on_request(
        &self,
        interaction: RequestInteraction,
        body: MessageBody,
    ) -> Result<(), MalError> {
        let _ = (interaction, body);
        Err(unsupported())
    }

    async fn on_invoke(
        &self,
        interaction: InvokeInteraction,
        body: MessageBody,
    ) -> Result<(), MalError> {
        let _ = (interaction, body);
        Err(unsupported())
    }

    async fn on_progress(
        &self,
        interaction: ProgressInteraction,
        body: MessageBody,
    ) -> Result<(), MalError> {
        let _ = (interaction, body);
        Err(unsupported())
    }
}
