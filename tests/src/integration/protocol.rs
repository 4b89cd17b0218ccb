//! # Protocol Enforcement
//!
//! A hand-driven peer bound directly to the network sends stages the way a
//! faulty or hostile provider would. The consumer endpoint must reject
//! out-of-order stages, drop stages of unknown transactions, ignore replies
//! from peers other than the addressed one, fail transactions whose peer
//! disconnects and refuse initiating stages for services it does not provide.

#[cfg(test)]
mod tests {
    use crate::fixtures::{eventually, mission, next_event, Cluster, EVENT_TIMEOUT, OP_ECHO, SERVICE};
    use bytes::Bytes;
    use mal_interaction::{
        ChannelListener, InProcessTransport, InboundFrame, InboundFrames, MalConsumer, Transport,
    };
    use mal_types::{
        CodecKind, Element, HeaderTemplate, InteractionStage, InteractionType, MalError, MalMessage,
        MessageBody, MessageCodec, StandardError, TransactionId,
    };
    use std::sync::Arc;

    // =============================================================================
    // ROGUE PEER
    // =============================================================================

    /// A raw transport that speaks MAL by hand.
    struct RoguePeer {
        transport: Arc<InProcessTransport>,
        inbox: InboundFrames,
        codec: Arc<dyn MessageCodec>,
    }

    impl RoguePeer {
        fn bind(cluster: &Cluster) -> Self {
            let uri = cluster.network.unique_uri("rogue");
            let (transport, inbox) = cluster.network.bind(uri).unwrap();
            Self {
                transport,
                inbox,
                codec: CodecKind::default().codec(),
            }
        }

        async fn receive(&mut self) -> MalMessage {
            loop {
                let frame = tokio::time::timeout(EVENT_TIMEOUT, self.inbox.recv())
                    .await
                    .expect("no frame for rogue peer")
                    .expect("rogue inbox closed");
                if let InboundFrame::Encoded(bytes) = frame {
                    return self.codec.decode(&bytes).unwrap();
                }
            }
        }

        async fn answer(&self, request: &MalMessage, stage: InteractionStage, body: MessageBody) {
            let reply = MalMessage::new(request.header.reply(stage, false), body);
            let frame = self.codec.encode(&reply).unwrap();
            self.transport
                .send(&request.header.uri_from, Bytes::from(frame))
                .await
                .unwrap();
        }

        /// Reply to a transaction addressed to another peer, under this
        /// peer's own URI.
        async fn intercept(&self, request: &MalMessage, stage: InteractionStage, body: MessageBody) {
            let mut header = request.header.reply(stage, false);
            header.uri_from = self.transport.local_uri().clone();
            let frame = self.codec.encode(&MalMessage::new(header, body)).unwrap();
            self.transport
                .send(&request.header.uri_from, Bytes::from(frame))
                .await
                .unwrap();
        }
    }

    fn consumer_of(cluster: &Cluster, rogue: &RoguePeer) -> MalConsumer {
        MalConsumer::new(
            cluster.consumer.clone(),
            HeaderTemplate::new(rogue.transport.local_uri().clone(), SERVICE, mission()),
        )
    }

    fn result(text: &str) -> MessageBody {
        MessageBody::Elements(vec![Element::String(text.to_string())])
    }

    // =============================================================================
    // STAGE ORDER
    // =============================================================================

    #[tokio::test]
    async fn test_response_before_ack_is_rejected() {
        let cluster = Cluster::start();
        let mut rogue = RoguePeer::bind(&cluster);
        let consumer = consumer_of(&cluster, &rogue);
        let (listener, mut events) = ChannelListener::new();

        let id = consumer
            .invoke_async(OP_ECHO, MessageBody::Empty, Arc::new(listener))
            .await
            .unwrap();
        let invoke = rogue.receive().await;
        assert_eq!(invoke.header.interaction_type, InteractionType::Invoke);
        assert_eq!(invoke.header.transaction_id, id);

        rogue
            .answer(&invoke, InteractionStage::INVOKE_RESPONSE, result("early"))
            .await;
        let registry = cluster.consumer.registry();
        assert!(eventually(|| registry.snapshot().rejected == 1).await);
        assert!(registry.is_pending(id));
        assert!(events.try_recv().is_none());

        rogue.answer(&invoke, InteractionStage::INVOKE_ACK, MessageBody::Empty).await;
        let ack = next_event(&mut events).await.unwrap();
        assert_eq!(ack.header.interaction_stage, InteractionStage::INVOKE_ACK);

        rogue
            .answer(&invoke, InteractionStage::INVOKE_RESPONSE, result("done"))
            .await;
        let response = next_event(&mut events).await.unwrap();
        assert_eq!(response.header.interaction_stage, InteractionStage::INVOKE_RESPONSE);
        assert_eq!(response.body, result("done"));
        assert!(!registry.is_pending(id));

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_terminal_stage_is_unknown() {
        let cluster = Cluster::start();
        let mut rogue = RoguePeer::bind(&cluster);
        let consumer = consumer_of(&cluster, &rogue);
        let (listener, mut events) = ChannelListener::new();

        consumer
            .request_async(OP_ECHO, MessageBody::Empty, Arc::new(listener))
            .await
            .unwrap();
        let request = rogue.receive().await;

        rogue
            .answer(&request, InteractionStage::REQUEST_RESPONSE, result("first"))
            .await;
        let response = next_event(&mut events).await.unwrap();
        assert_eq!(response.body, result("first"));

        rogue
            .answer(&request, InteractionStage::REQUEST_RESPONSE, result("again"))
            .await;
        let registry = cluster.consumer.registry();
        assert!(eventually(|| registry.snapshot().unknown == 1).await);
        assert!(events.try_recv().is_none());
        assert_eq!(registry.pending_count(), 0);

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_stage_for_unknown_transaction_is_dropped() {
        let cluster = Cluster::start();
        let mut rogue = RoguePeer::bind(&cluster);
        let consumer = consumer_of(&cluster, &rogue);
        let (listener, mut events) = ChannelListener::new();

        consumer
            .submit_async(OP_ECHO, MessageBody::Empty, Arc::new(listener))
            .await
            .unwrap();
        let mut submit = rogue.receive().await;
        submit.header.transaction_id = TransactionId::new(u64::MAX);

        rogue.answer(&submit, InteractionStage::SUBMIT_ACK, MessageBody::Empty).await;
        let registry = cluster.consumer.registry();
        assert!(eventually(|| registry.snapshot().unknown == 1).await);
        assert_eq!(registry.pending_count(), 1);
        assert!(events.try_recv().is_none());

        cluster.shutdown().await;
    }

    // =============================================================================
    // PEER BINDING
    // =============================================================================

    #[tokio::test]
    async fn test_reply_from_other_peer_is_rejected() {
        let cluster = Cluster::start();
        let mut rogue = RoguePeer::bind(&cluster);
        let impostor = RoguePeer::bind(&cluster);
        let consumer = consumer_of(&cluster, &rogue);
        let (listener, mut events) = ChannelListener::new();

        let id = consumer
            .request_async(OP_ECHO, MessageBody::Empty, Arc::new(listener))
            .await
            .unwrap();
        let request = rogue.receive().await;

        impostor
            .intercept(&request, InteractionStage::REQUEST_RESPONSE, result("forged"))
            .await;
        let registry = cluster.consumer.registry();
        assert!(eventually(|| registry.snapshot().rejected == 1).await);
        assert!(registry.is_pending(id));
        assert!(events.try_recv().is_none());

        rogue
            .answer(&request, InteractionStage::REQUEST_RESPONSE, result("genuine"))
            .await;
        let response = next_event(&mut events).await.unwrap();
        assert_eq!(response.body, result("genuine"));
        assert!(!registry.is_pending(id));

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_peer_loss_after_ack_fails_the_transaction() {
        let cluster = Cluster::start();
        let mut rogue = RoguePeer::bind(&cluster);
        let consumer = consumer_of(&cluster, &rogue);
        let (listener, mut events) = ChannelListener::new();

        let id = consumer
            .invoke_async(OP_ECHO, MessageBody::Empty, Arc::new(listener))
            .await
            .unwrap();
        let invoke = rogue.receive().await;
        rogue.answer(&invoke, InteractionStage::INVOKE_ACK, MessageBody::Empty).await;
        let ack = next_event(&mut events).await.unwrap();
        assert_eq!(ack.header.interaction_stage, InteractionStage::INVOKE_ACK);

        rogue.transport.close().await;
        let lost = next_event(&mut events).await.unwrap_err();
        assert!(matches!(
            lost,
            MalError::Transmit {
                code: StandardError::DestinationLost,
                ..
            }
        ));

        let registry = cluster.consumer.registry();
        assert!(!registry.is_pending(id));
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.snapshot().failed, 1);

        cluster.shutdown().await;
    }

    // =============================================================================
    // DISPATCH
    // =============================================================================

    #[tokio::test]
    async fn test_initiating_stage_without_handler_is_refused() {
        let cluster = Cluster::start();
        let mut rogue = RoguePeer::bind(&cluster);

        // The consumer endpoint serves nothing.
        let header = HeaderTemplate::new(cluster.consumer.uri().clone(), SERVICE, mission()).header(
            rogue.transport.local_uri(),
            InteractionType::Request,
            InteractionStage::REQUEST,
            OP_ECHO,
        );
        let frame = rogue
            .codec
            .encode(&MalMessage::new(header, MessageBody::Empty))
            .unwrap();
        rogue
            .transport
            .send(cluster.consumer.uri(), Bytes::from(frame))
            .await
            .unwrap();

        let refusal = rogue.receive().await;
        assert!(refusal.header.is_error_message);
        assert_eq!(refusal.header.interaction_stage, InteractionStage::REQUEST_RESPONSE);
        assert_eq!(refusal.error_code(), Some(StandardError::UnsupportedArea));

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_garbage_frame_is_counted_and_dropped() {
        let cluster = Cluster::start();
        let rogue = RoguePeer::bind(&cluster);

        rogue
            .transport
            .send(cluster.provider.uri(), Bytes::from_static(b"\xff\x00not a message"))
            .await
            .unwrap();
        assert!(eventually(|| cluster.provider.stats().decode_errors == 1).await);

        let response = cluster
            .service_consumer()
            .request(OP_ECHO, result("still alive"))
            .await
            .unwrap();
        assert_eq!(response.body, result("still alive"));

        cluster.shutdown().await;
    }
}
