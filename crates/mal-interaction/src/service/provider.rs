//! # Provider Interactions
//!
//! Reply contexts handed to an [`InteractionHandler`](crate::ports::InteractionHandler).
//! Each pattern gets its own type exposing only the replies it allows; the
//! stage table still checks every reply, so calling one twice or out of
//! order fails with [`MalError::IncorrectState`].
//!
//! | Type | Replies |
//! |------|---------|
//! | [`SendInteraction`] | none |
//! | [`SubmitInteraction`] | `ack`, `error` |
//! | [`RequestInteraction`] | `reply`, `error` |
//! | [`InvokeInteraction`] | `ack`, `reply`, `error` |
//! | [`ProgressInteraction`] | `ack`, `update`, `update_error`, `reply`, `error` |

use crate::domain::state_machine::{next_reply_stage, provider_transition};
use crate::service::sender::MessageSender;
use dashmap::DashSet;
use mal_types::{
    ErrorBody, InteractionStage, InteractionType, MalError, MalMessage, MessageBody, MessageHeader,
    TransactionId, Uri,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Interactions a provider endpoint is currently serving, keyed by
/// (consumer URI, transaction id).
pub(crate) type ActiveInteractions = Arc<DashSet<(Uri, TransactionId)>>;

struct ContextInner {
    header: MessageHeader,
    sender: Arc<MessageSender>,
    last_sent: Mutex<Option<InteractionStage>>,
    terminated: AtomicBool,
    active: ActiveInteractions,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.active
            .remove(&(self.header.uri_from.clone(), self.header.transaction_id));
    }
}

/// Shared reply state of one provider-side interaction.
#[derive(Clone)]
pub struct InteractionContext {
    inner: Arc<ContextInner>,
}

impl InteractionContext {
    pub(crate) fn new(
        header: MessageHeader,
        sender: Arc<MessageSender>,
        active: ActiveInteractions,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                header,
                sender,
                last_sent: Mutex::new(None),
                terminated: AtomicBool::new(false),
                active,
            }),
        }
    }

    /// Header of the initiating message.
    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        &self.inner.header
    }

    #[must_use]
    pub fn interaction_type(&self) -> InteractionType {
        self.inner.header.interaction_type
    }

    /// Whether a terminal stage has been sent.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    /// Send the reply at `stage`, after checking it against the stage table.
    async fn reply(
        &self,
        stage: InteractionStage,
        body: MessageBody,
        is_error: bool,
    ) -> Result<(), MalError> {
        let header = &self.inner.header;
        let mut last_sent = self.inner.last_sent.lock().await;
        if self.is_terminated() {
            return Err(MalError::IncorrectState(format!(
                "{} transaction {} already finished",
                header.interaction_type, header.transaction_id
            )));
        }

        let step = provider_transition(header.interaction_type, *last_sent, stage, is_error)
            .map_err(|violation| MalError::IncorrectState(violation.to_string()))?;

        let message = if is_error {
            let error = match body {
                MessageBody::Error(error) => error,
                other => {
                    return Err(MalError::IncorrectState(format!(
                        "error reply needs an error body, got {}",
                        other.kind()
                    )))
                }
            };
            MalMessage::error(header.reply(stage, true), error)
        } else {
            MalMessage::new(header.reply(stage, false), body)
        };

        // The stage counts as sent only once the transport took it.
        self.inner.sender.send(&message).await?;
        *last_sent = Some(stage);
        if step.terminal {
            self.inner.terminated.store(true, Ordering::Release);
            self.inner
                .active
                .remove(&(header.uri_from.clone(), header.transaction_id));
        }
        Ok(())
    }

    /// Send `error` at the next stage the pattern allows.
    pub async fn error(&self, error: ErrorBody) -> Result<(), MalError> {
        let next = {
            let last_sent = self.inner.last_sent.lock().await;
            next_reply_stage(self.interaction_type(), *last_sent)
        };
        let Some(stage) = next else {
            return Err(MalError::IncorrectState(format!(
                "{} allows no further error reply",
                self.interaction_type()
            )));
        };
        self.reply(stage, MessageBody::Error(error), true).await
    }

    /// Report a failed handler to the consumer, unless a terminal stage has
    /// already gone out.
    pub(crate) async fn fail(&self, error: &MalError) {
        if self.is_terminated() {
            debug!(
                transaction_id = %self.header().transaction_id,
                %error,
                "Handler failed after terminal reply"
            );
            return;
        }
        if let Err(reply_error) = self.error(ErrorBody::from_error(error)).await {
            debug!(
                transaction_id = %self.header().transaction_id,
                %reply_error,
                "Could not report handler failure"
            );
        }
    }
}

/// SEND: nothing can be sent back.
#[derive(Clone)]
pub struct SendInteraction {
    context: InteractionContext,
}

impl SendInteraction {
    pub(crate) fn new(context: InteractionContext) -> Self {
        Self { context }
    }

    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        self.context.header()
    }
}

/// SUBMIT: one acknowledgement or error.
#[derive(Clone)]
pub struct SubmitInteraction {
    context: InteractionContext,
}

impl SubmitInteraction {
    pub(crate) fn new(context: InteractionContext) -> Self {
        Self { context }
    }

    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        self.context.header()
    }

    pub async fn ack(&self) -> Result<(), MalError> {
        self.context
            .reply(InteractionStage::SUBMIT_ACK, MessageBody::Empty, false)
            .await
    }

    pub async fn error(&self, error: ErrorBody) -> Result<(), MalError> {
        self.context.error(error).await
    }
}

/// REQUEST: one response or error.
#[derive(Clone)]
pub struct RequestInteraction {
    context: InteractionContext,
}

impl RequestInteraction {
    pub(crate) fn new(context: InteractionContext) -> Self {
        Self { context }
    }

    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        self.context.header()
    }

    pub async fn reply(&self, body: MessageBody) -> Result<(), MalError> {
        self.context
            .reply(InteractionStage::REQUEST_RESPONSE, body, false)
            .await
    }

    pub async fn error(&self, error: ErrorBody) -> Result<(), MalError> {
        self.context.error(error).await
    }
}

/// INVOKE: acknowledgement, then a response. An error at either stage ends it.
#[derive(Clone)]
pub struct InvokeInteraction {
    context: InteractionContext,
}

impl InvokeInteraction {
    pub(crate) fn new(context: InteractionContext) -> Self {
        Self { context }
    }

    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        self.context.header()
    }

    pub async fn ack(&self) -> Result<(), MalError> {
        self.context
            .reply(InteractionStage::INVOKE_ACK, MessageBody::Empty, false)
            .await
    }

    pub async fn reply(&self, body: MessageBody) -> Result<(), MalError> {
        self.context
            .reply(InteractionStage::INVOKE_RESPONSE, body, false)
            .await
    }

    /// Error at the next stage: the ack if none was sent, else the response.
    pub async fn error(&self, error: ErrorBody) -> Result<(), MalError> {
        self.context.error(error).await
    }
}

/// PROGRESS: acknowledgement, any number of updates, then a response.
#[derive(Clone)]
pub struct ProgressInteraction {
    context: InteractionContext,
}

impl ProgressInteraction {
    pub(crate) fn new(context: InteractionContext) -> Self {
        Self { context }
    }

    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        self.context.header()
    }

    pub async fn ack(&self) -> Result<(), MalError> {
        self.context
            .reply(InteractionStage::PROGRESS_ACK, MessageBody::Empty, false)
            .await
    }

    pub async fn update(&self, body: MessageBody) -> Result<(), MalError> {
        self.context
            .reply(InteractionStage::PROGRESS_UPDATE, body, false)
            .await
    }

    /// Error as an update stage. Ends the interaction.
    pub async fn update_error(&self, error: ErrorBody) -> Result<(), MalError> {
        self.context
            .reply(InteractionStage::PROGRESS_UPDATE, MessageBody::Error(error), true)
            .await
    }

    pub async fn reply(&self, body: MessageBody) -> Result<(), MalError> {
        self.context
            .reply(InteractionStage::PROGRESS_RESPONSE, body, false)
            .await
    }

    /// Error at the next stage: the ack if none was sent, else the response.
    pub async fn error(&self, error: ErrorBody) -> Result<(), MalError> {
        self.context.error(error).await
    }
}
