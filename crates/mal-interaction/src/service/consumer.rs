//! # Consumer
//!
//! Typed calls for each interaction pattern against one remote service.
//! Blocking calls return the first stage the caller waits for; later stages
//! of INVOKE, PROGRESS and REGISTER go to the listener passed in.

use crate::domain::registry::CallMode;
use crate::ports::inbound::InteractionListener;
use crate::service::endpoint::MalEndpoint;
use mal_types::{
    HeaderTemplate, Identifier, InteractionStage, InteractionType, MalError, MalMessage,
    MessageBody, MessageHeader, Subscription, TransactionId,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Client side of one remote service, bound to a local endpoint.
#[derive(Clone)]
pub struct MalConsumer {
    endpoint: MalEndpoint,
    template: HeaderTemplate,
    timeout: Option<Duration>,
}

impl MalConsumer {
    pub fn new(endpoint: MalEndpoint, template: HeaderTemplate) -> Self {
        Self {
            endpoint,
            template,
            timeout: None,
        }
    }

    /// Override the endpoint's default timeout for this consumer's calls.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn template(&self) -> &HeaderTemplate {
        &self.template
    }

    #[must_use]
    pub fn endpoint(&self) -> &MalEndpoint {
        &self.endpoint
    }

    fn header(&self, interaction: InteractionType, stage: InteractionStage, operation: u16) -> MessageHeader {
        self.template
            .header(self.endpoint.uri(), interaction, stage, operation)
    }

    async fn blocking(
        &self,
        interaction: InteractionType,
        stage: InteractionStage,
        operation: u16,
        body: MessageBody,
        mode: CallMode,
    ) -> Result<MalMessage, MalError> {
        let header = self.header(interaction, stage, operation);
        self.endpoint.call(header, body, mode, self.timeout).await
    }

    async fn non_blocking(
        &self,
        interaction: InteractionType,
        stage: InteractionStage,
        operation: u16,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId, MalError> {
        let header = self.header(interaction, stage, operation);
        self.endpoint.call_async(header, body, listener).await
    }

    // =========================================================================
    // ONE-SHOT PATTERNS
    // =========================================================================

    pub async fn send(&self, operation: u16, body: MessageBody) -> Result<TransactionId, MalError> {
        let header = self.header(InteractionType::Send, InteractionStage::SEND, operation);
        self.endpoint.send_one_way(header, body).await
    }

    /// SUBMIT and wait for the acknowledgement.
    pub async fn submit(&self, operation: u16, body: MessageBody) -> Result<MalMessage, MalError> {
        self.blocking(InteractionType::Submit, InteractionStage::SUBMIT, operation, body, CallMode::Blocking)
            .await
    }

    /// REQUEST and wait for the response.
    pub async fn request(&self, operation: u16, body: MessageBody) -> Result<MalMessage, MalError> {
        self.blocking(InteractionType::Request, InteractionStage::REQUEST, operation, body, CallMode::Blocking)
            .await
    }

    /// INVOKE and wait for the acknowledgement; the response goes to
    /// `listener`.
    pub async fn invoke(
        &self,
        operation: u16,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<MalMessage, MalError> {
        self.blocking(
            InteractionType::Invoke,
            InteractionStage::INVOKE,
            operation,
            body,
            CallMode::BlockingThenAsync(listener),
        )
        .await
    }

    /// PROGRESS and wait for the acknowledgement; updates and the response
    /// go to `listener`.
    pub async fn progress(
        &self,
        operation: u16,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<MalMessage, MalError> {
        self.blocking(
            InteractionType::Progress,
            InteractionStage::PROGRESS,
            operation,
            body,
            CallMode::BlockingThenAsync(listener),
        )
        .await
    }

    pub async fn submit_async(
        &self,
        operation: u16,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId, MalError> {
        self.non_blocking(InteractionType::Submit, InteractionStage::SUBMIT, operation, body, listener)
            .await
    }

    pub async fn request_async(
        &self,
        operation: u16,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId, MalError> {
        self.non_blocking(InteractionType::Request, InteractionStage::REQUEST, operation, body, listener)
            .await
    }

    pub async fn invoke_async(
        &self,
        operation: u16,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId, MalError> {
        self.non_blocking(InteractionType::Invoke, InteractionStage::INVOKE, operation, body, listener)
            .await
    }

    pub async fn progress_async(
        &self,
        operation: u16,
        body: MessageBody,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId, MalError> {
        self.non_blocking(InteractionType::Progress, InteractionStage::PROGRESS, operation, body, listener)
            .await
    }

    // =========================================================================
    // PUBSUB
    // =========================================================================

    /// REGISTER `subscription` with the broker at the template's URI.
    ///
    /// Returns once the broker acknowledged; NOTIFYs then go to `listener`.
    /// Registering an id again replaces the earlier subscription.
    pub async fn register(
        &self,
        operation: u16,
        subscription: Subscription,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId, MalError> {
        let subscription_id = subscription.id.clone();
        let ack = self
            .blocking(
                InteractionType::PubSub,
                InteractionStage::REGISTER,
                operation,
                MessageBody::Register(subscription),
                CallMode::BlockingThenAsync(listener),
            )
            .await?;

        let transaction_id = ack.header.transaction_id;
        self.track(operation, subscription_id.clone(), transaction_id);
        info!(
            broker = %self.template.uri_to,
            subscription = %subscription_id,
            transaction_id = %transaction_id,
            "Subscription registered"
        );
        Ok(transaction_id)
    }

    /// REGISTER without waiting; the ack and every NOTIFY go to `listener`.
    pub async fn register_async(
        &self,
        operation: u16,
        subscription: Subscription,
        listener: Arc<dyn InteractionListener>,
    ) -> Result<TransactionId, MalError> {
        let subscription_id = subscription.id.clone();
        let transaction_id = self
            .non_blocking(
                InteractionType::PubSub,
                InteractionStage::REGISTER,
                operation,
                MessageBody::Register(subscription),
                listener,
            )
            .await?;
        self.track(operation, subscription_id, transaction_id);
        Ok(transaction_id)
    }

    /// DEREGISTER the given subscription ids (`*` for all of them).
    pub async fn deregister(&self, operation: u16, ids: Vec<Identifier>) -> Result<MalMessage, MalError> {
        let ack = self
            .blocking(
                InteractionType::PubSub,
                InteractionStage::DEREGISTER,
                operation,
                MessageBody::Deregister(ids.clone()),
                CallMode::Blocking,
            )
            .await?;

        self.endpoint.forget_subscriptions(
            &self.template.uri_to,
            &self.template.service.operation(operation),
            &ids,
        );
        Ok(ack)
    }

    fn track(&self, operation: u16, subscription_id: Identifier, transaction_id: TransactionId) {
        self.endpoint.track_subscription(
            (
                self.template.uri_to.clone(),
                self.template.service.operation(operation),
                subscription_id,
            ),
            transaction_id,
        );
    }
}
