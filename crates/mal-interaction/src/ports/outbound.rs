//! # Outbound Ports
//!
//! What the engine needs from a binding: a way to push encoded frames to a
//! URI and a queue of frames arriving for the local URI.

use async_trait::async_trait;
use bytes::Bytes;
use mal_types::{MessageHeader, StandardError, Uri};
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure to hand a frame to its destination.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Destination unknown: {uri}")]
    DestinationUnknown { uri: Uri },

    #[error("Destination lost: {uri}")]
    DestinationLost { uri: Uri },

    #[error("Address already bound: {uri}")]
    AddressInUse { uri: Uri },

    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// The standard error number reported to the transaction owner.
    #[must_use]
    pub fn standard_error(&self) -> StandardError {
        match self {
            Self::DestinationUnknown { .. } => StandardError::DestinationUnknown,
            Self::DestinationLost { .. } => StandardError::DestinationLost,
            Self::AddressInUse { .. } => StandardError::Internal,
            Self::Closed => StandardError::Shutdown,
        }
    }
}

/// Something that arrived for the local endpoint.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// One encoded message.
    Encoded(Bytes),
    /// A peer went away. Brokers drop its subscriptions.
    PeerLost(Uri),
}

/// Frames for one bound endpoint, in transport delivery order.
pub type InboundFrames = mpsc::UnboundedReceiver<InboundFrame>;

/// A bound transport endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// The URI this transport is bound to.
    fn local_uri(&self) -> &Uri;

    /// Deliver one encoded frame to `destination`.
    async fn send(&self, destination: &Uri, frame: Bytes) -> Result<(), TransportError>;

    /// Unbind. Later sends fail with [`TransportError::Closed`].
    async fn close(&self);
}

/// Told about every message the local endpoint failed to transmit,
/// independent of any transaction.
pub trait TransmitErrorListener: Send + Sync {
    fn on_transmit_error(&self, header: &MessageHeader, error: &TransportError);
}
