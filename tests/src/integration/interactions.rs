//! # Interaction Pattern Flows
//!
//! Consumer and provider endpoints exchanging every non-PUBSUB pattern over
//! the in-process network:
//!
//! 1. **Happy paths**: SEND, SUBMIT, REQUEST, INVOKE and PROGRESS stage order
//! 2. **Provider errors**: handler failures before and after the ack
//! 3. **Local failures**: timeout, transmit error, endpoint shutdown
//! 4. **Dispatch**: unsupported area and operation

#[cfg(test)]
mod tests {
    use crate::fixtures::{
        next_event, Cluster, EVENT_TIMEOUT, OP_ECHO, OP_FAIL, OP_FAIL_AFTER_ACK, OP_SILENT,
        SERVICE,
    };
    use mal_interaction::{ChannelListener, MalConsumer, TransmitErrorListener, TransportError};
    use mal_types::{
        Element, HeaderTemplate, InteractionStage, MalError, MessageBody, MessageHeader,
        ServiceKey, StandardError, Uri,
    };
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinSet;

    fn payload(text: &str) -> MessageBody {
        MessageBody::Elements(vec![Element::String(text.to_string())])
    }

    // =============================================================================
    // HAPPY PATHS
    // =============================================================================

    #[tokio::test]
    async fn test_submit_returns_ack() {
        let cluster = Cluster::start();
        let consumer = cluster.service_consumer();

        let ack = consumer.submit(OP_ECHO, MessageBody::Empty).await.unwrap();
        assert_eq!(ack.header.interaction_stage, InteractionStage::SUBMIT_ACK);
        assert!(!ack.header.is_error_message);
        assert_eq!(cluster.consumer.registry().pending_count(), 0);

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_echoes_body() {
        let cluster = Cluster::start();
        let consumer = cluster.service_consumer();

        let response = consumer.request(OP_ECHO, payload("ping")).await.unwrap();
        assert_eq!(response.header.interaction_stage, InteractionStage::REQUEST_RESPONSE);
        assert_eq!(response.header.uri_from, *cluster.provider.uri());
        assert_eq!(response.body, payload("ping"));

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_invoke_ack_then_response_to_listener() {
        let cluster = Cluster::start();
        let consumer = cluster.service_consumer();
        let (listener, mut events) = ChannelListener::new();

        let ack = consumer
            .invoke(OP_ECHO, payload("calibrate"), Arc::new(listener))
            .await
            .unwrap();
        assert_eq!(ack.header.interaction_stage, InteractionStage::INVOKE_ACK);

        let response = next_event(&mut events).await.unwrap();
        assert_eq!(response.header.interaction_stage, InteractionStage::INVOKE_RESPONSE);
        assert_eq!(response.header.transaction_id, ack.header.transaction_id);
        assert_eq!(response.body, payload("calibrate"));
        assert!(!cluster.consumer.registry().is_pending(ack.header.transaction_id));

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_progress_stages_arrive_in_order() {
        let cluster = Cluster::start();
        let consumer = cluster.service_consumer();
        let (listener, mut events) = ChannelListener::new();

        let ack = consumer
            .progress(OP_ECHO, payload("dump"), Arc::new(listener))
            .await
            .unwrap();
        assert_eq!(ack.header.interaction_stage, InteractionStage::PROGRESS_ACK);

        let mut stages = Vec::new();
        let mut bodies = Vec::new();
        for _ in 0..3 {
            let message = next_event(&mut events).await.unwrap();
            stages.push(message.header.interaction_stage);
            bodies.push(message.body);
        }
        assert_eq!(
            stages,
            vec![
                InteractionStage::PROGRESS_UPDATE,
                InteractionStage::PROGRESS_UPDATE,
                InteractionStage::PROGRESS_RESPONSE,
            ]
        );
        assert_eq!(bodies[0], MessageBody::Elements(vec![Element::Long(1)]));
        assert_eq!(bodies[1], MessageBody::Elements(vec![Element::Long(2)]));
        assert_eq!(bodies[2], payload("dump"));
        assert_eq!(cluster.consumer.registry().pending_count(), 0);

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_reaches_handler() {
        let mut cluster = Cluster::start();
        let consumer = cluster.service_consumer();

        consumer.send(OP_ECHO, payload("heartbeat")).await.unwrap();
        let received = tokio::time::timeout(EVENT_TIMEOUT, cluster.sends.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, payload("heartbeat"));
        assert_eq!(cluster.consumer.registry().pending_count(), 0);

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_request_async_delivers_response_to_listener() {
        let cluster = Cluster::start();
        let consumer = cluster.service_consumer();
        let (listener, mut events) = ChannelListener::new();

        let id = consumer
            .request_async(OP_ECHO, payload("status"), Arc::new(listener))
            .await
            .unwrap();

        let response = next_event(&mut events).await.unwrap();
        assert_eq!(response.header.transaction_id, id);
        assert_eq!(response.header.interaction_stage, InteractionStage::REQUEST_RESPONSE);
        assert_eq!(response.body, payload("status"));

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_get_unique_transactions() {
        let cluster = Cluster::start();
        let consumer = cluster.service_consumer();

        let mut calls = JoinSet::new();
        for n in 0..32_i64 {
            let consumer = consumer.clone();
            calls.spawn(async move {
                let body = MessageBody::Elements(vec![Element::Long(n)]);
                let response = consumer.request(OP_ECHO, body.clone()).await.unwrap();
                assert_eq!(response.body, body);
                response.header.transaction_id
            });
        }

        let mut ids = HashSet::new();
        while let Some(id) = calls.join_next().await {
            assert!(ids.insert(id.unwrap()));
        }
        assert_eq!(ids.len(), 32);
        assert_eq!(cluster.consumer.registry().pending_count(), 0);

        cluster.shutdown().await;
    }

    // =============================================================================
    // PROVIDER ERRORS
    // =============================================================================

    #[tokio::test]
    async fn test_handler_error_returns_remote_error() {
        let cluster = Cluster::start();
        let consumer = cluster.service_consumer();

        let result = consumer.request(OP_FAIL, payload("bad")).await;
        assert!(matches!(
            result,
            Err(MalError::Remote {
                code: StandardError::BadEncoding,
                ..
            })
        ));
        assert_eq!(cluster.consumer.registry().pending_count(), 0);
        assert_eq!(cluster.provider.active_interactions(), 0);

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_invoke_error_after_ack_reaches_listener() {
        let cluster = Cluster::start();
        let consumer = cluster.service_consumer();
        let (listener, mut events) = ChannelListener::new();

        let ack = consumer
            .invoke(OP_FAIL_AFTER_ACK, payload("slew"), Arc::new(listener))
            .await
            .unwrap();
        assert_eq!(ack.header.interaction_stage, InteractionStage::INVOKE_ACK);

        let error = next_event(&mut events).await.unwrap();
        assert!(error.header.is_error_message);
        assert_eq!(error.header.interaction_stage, InteractionStage::INVOKE_RESPONSE);
        assert_eq!(error.error_code(), Some(StandardError::BadEncoding));
        assert!(!cluster.consumer.registry().is_pending(ack.header.transaction_id));

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_progress_error_after_ack_reaches_listener() {
        let cluster = Cluster::start();
        let consumer = cluster.service_consumer();
        let (listener, mut events) = ChannelListener::new();

        consumer
            .progress(OP_FAIL_AFTER_ACK, payload("dump"), Arc::new(listener))
            .await
            .unwrap();

        let error = next_event(&mut events).await.unwrap();
        assert!(error.header.is_error_message);
        assert_eq!(error.header.interaction_stage, InteractionStage::PROGRESS_RESPONSE);
        assert_eq!(cluster.consumer.registry().pending_count(), 0);

        cluster.shutdown().await;
    }

    // =============================================================================
    // LOCAL FAILURES
    // =============================================================================

    #[tokio::test]
    async fn test_silent_provider_times_out() {
        let cluster = Cluster::start();
        let consumer = cluster
            .service_consumer()
            .with_timeout(Duration::from_millis(100));

        let started = tokio::time::Instant::now();
        let result = consumer.request(OP_SILENT, payload("lost")).await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        match result {
            Err(MalError::Timeout { after, .. }) => assert_eq!(after, Duration::from_millis(100)),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(cluster.consumer.registry().pending_count(), 0);
        assert_eq!(cluster.consumer.registry().snapshot().timeouts, 1);

        cluster.shutdown().await;
    }

    #[derive(Default)]
    struct RecordingTransmitListener {
        failures: Mutex<Vec<(Uri, TransportError)>>,
    }

    impl TransmitErrorListener for RecordingTransmitListener {
        fn on_transmit_error(&self, header: &MessageHeader, error: &TransportError) {
            self.failures.lock().push((header.uri_to.clone(), error.clone()));
        }
    }

    #[tokio::test]
    async fn test_unknown_destination_fails_call() {
        let cluster = Cluster::start();
        let recorder = Arc::new(RecordingTransmitListener::default());
        cluster
            .consumer
            .set_transmit_listener(Some(Arc::clone(&recorder) as Arc<dyn TransmitErrorListener>));
        let consumer = MalConsumer::new(
            cluster.consumer.clone(),
            HeaderTemplate::new("inproc://nowhere", SERVICE, crate::fixtures::mission()),
        );

        let result = consumer.request(OP_ECHO, payload("void")).await;
        assert!(matches!(
            result,
            Err(MalError::Transmit {
                code: StandardError::DestinationUnknown,
                ..
            })
        ));

        let failures = recorder.failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, Uri::from("inproc://nowhere"));
        assert!(matches!(failures[0].1, TransportError::DestinationUnknown { .. }));
        assert_eq!(cluster.consumer.registry().pending_count(), 0);
        assert_eq!(cluster.consumer.stats().transmit_errors, 1);
        drop(failures);

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_fails_pending_call() {
        let cluster = Cluster::start();
        let consumer = cluster.service_consumer();

        let call = tokio::spawn(async move { consumer.request(OP_SILENT, payload("hang")).await });
        let registry_has_call =
            crate::fixtures::eventually(|| cluster.consumer.registry().pending_count() == 1).await;
        assert!(registry_has_call);

        cluster.consumer.close().await;
        let result = tokio::time::timeout(EVENT_TIMEOUT, call).await.unwrap().unwrap();
        assert!(matches!(result, Err(MalError::Shutdown)));
        assert_eq!(cluster.consumer.registry().pending_count(), 0);

        let after_close = cluster.service_consumer().request(OP_ECHO, payload("late")).await;
        assert!(matches!(after_close, Err(MalError::Shutdown)));

        cluster.shutdown().await;
    }

    // =============================================================================
    // DISPATCH
    // =============================================================================

    #[tokio::test]
    async fn test_unknown_area_is_unsupported_area() {
        let cluster = Cluster::start();
        let consumer = MalConsumer::new(
            cluster.consumer.clone(),
            HeaderTemplate::new(
                cluster.provider.uri().clone(),
                ServiceKey::new(999, 1, 1),
                crate::fixtures::mission(),
            ),
        );

        let result = consumer.request(OP_ECHO, MessageBody::Empty).await;
        assert!(matches!(
            result,
            Err(MalError::Remote {
                code: StandardError::UnsupportedArea,
                ..
            })
        ));

        cluster.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_service_in_known_area_is_unsupported_operation() {
        let cluster = Cluster::start();
        let consumer = MalConsumer::new(
            cluster.consumer.clone(),
            HeaderTemplate::new(
                cluster.provider.uri().clone(),
                ServiceKey::new(SERVICE.area, 9, 1),
                crate::fixtures::mission(),
            ),
        );

        let result = consumer.submit(OP_ECHO, MessageBody::Empty).await;
        assert!(matches!(
            result,
            Err(MalError::Remote {
                code: StandardError::UnsupportedOperation,
                ..
            })
        ));

        cluster.shutdown().await;
    }
}
