//! Ports: the traits at the engine's edges.

pub mod inbound;
pub mod outbound;

pub use inbound::{ChannelListener, InteractionHandler, InteractionListener, ListenerEvent, ListenerStream};
pub use outbound::{InboundFrame, InboundFrames, TransmitErrorListener, Transport, TransportError};
