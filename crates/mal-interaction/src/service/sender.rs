//! Encode-and-transmit path shared by an endpoint and its provider contexts.

use crate::ports::outbound::{TransmitErrorListener, Transport};
use bytes::Bytes;
use mal_types::{MalError, MalMessage, MessageCodec};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Endpoint traffic counters.
#[derive(Debug, Default)]
pub struct EndpointStats {
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub transmit_errors: AtomicU64,
    pub decode_errors: AtomicU64,
    pub notifications_sent: AtomicU64,
}

/// Point-in-time copy of [`EndpointStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub transmit_errors: u64,
    pub decode_errors: u64,
    pub notifications_sent: u64,
}

impl EndpointStats {
    pub fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            transmit_errors: self.transmit_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct MessageSender {
    transport: Arc<dyn Transport>,
    codec: Arc<dyn MessageCodec>,
    transmit_listener: RwLock<Option<Arc<dyn TransmitErrorListener>>>,
    pub(crate) stats: EndpointStats,
}

impl MessageSender {
    pub(crate) fn new(transport: Arc<dyn Transport>, codec: Arc<dyn MessageCodec>) -> Self {
        Self {
            transport,
            codec,
            transmit_listener: RwLock::new(None),
            stats: EndpointStats::default(),
        }
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn codec(&self) -> &Arc<dyn MessageCodec> {
        &self.codec
    }

    pub(crate) fn set_transmit_listener(&self, listener: Option<Arc<dyn TransmitErrorListener>>) {
        *self.transmit_listener.write() = listener;
    }

    /// Encode and hand `message` to the transport.
    ///
    /// A transport failure is reported to the transmit-error listener and
    /// returned as [`MalError::Transmit`].
    pub(crate) async fn send(&self, message: &MalMessage) -> Result<(), MalError> {
        let header = &message.header;
        let frame = self.codec.encode(message)?;

        match self.transport.send(&header.uri_to, Bytes::from(frame)).await {
            Ok(()) => {
                self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                debug!(
                    to = %header.uri_to,
                    transaction_id = %header.transaction_id,
                    interaction = %header.interaction_type,
                    stage = header.stage_name(),
                    is_error = header.is_error_message,
                    "Message sent"
                );
                Ok(())
            }
            Err(error) => {
                self.stats.transmit_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    to = %header.uri_to,
                    transaction_id = %header.transaction_id,
                    %error,
                    "Transmit failed"
                );
                let listener = self.transmit_listener.read().clone();
                if let Some(listener) = listener {
                    listener.on_transmit_error(header, &error);
                }
                Err(MalError::Transmit {
                    uri: header.uri_to.clone(),
                    code: error.standard_error(),
                    reason: error.to_string(),
                })
            }
        }
    }
}
