//! # In-Process Binding
//!
//! A [`Transport`] for endpoints living in the same process. The network is
//! an explicit object: every endpoint bound to one [`InProcessNetwork`] can
//! reach every other, and nothing is shared across networks.

use crate::ports::outbound::{InboundFrame, InboundFrames, Transport, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use mal_types::Uri;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// URI scheme used by this binding.
pub const SCHEME: &str = "inproc://";

/// Registry of bound in-process endpoints.
#[derive(Default)]
pub struct InProcessNetwork {
    routes: DashMap<Uri, mpsc::UnboundedSender<InboundFrame>>,
}

impl InProcessNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A URI nobody is bound to yet, e.g. `inproc://consumer-1b4e...`.
    pub fn unique_uri(&self, prefix: &str) -> Uri {
        Uri::new(format!("{SCHEME}{prefix}-{}", Uuid::new_v4().simple()))
    }

    /// Bind `uri` and return the transport plus the queue of frames
    /// addressed to it.
    pub fn bind(
        self: &Arc<Self>,
        uri: Uri,
    ) -> Result<(Arc<InProcessTransport>, InboundFrames), TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        match self.routes.entry(uri.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TransportError::AddressInUse { uri });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(sender);
            }
        }

        info!(uri = %uri, "In-process endpoint bound");
        let transport = Arc::new(InProcessTransport {
            uri,
            network: Arc::clone(self),
            closed: AtomicBool::new(false),
        });
        Ok((transport, receiver))
    }

    #[must_use]
    pub fn is_bound(&self, uri: &Uri) -> bool {
        self.routes.contains_key(uri)
    }

    #[must_use]
    pub fn bound_count(&self) -> usize {
        self.routes.len()
    }

    fn deliver(&self, destination: &Uri, frame: InboundFrame) -> Result<(), TransportError> {
        let Some(route) = self.routes.get(destination) else {
            return Err(TransportError::DestinationUnknown {
                uri: destination.clone(),
            });
        };
        route
            .send(frame)
            .map_err(|_| TransportError::DestinationLost {
                uri: destination.clone(),
            })
    }

    /// Remove `uri` and tell every remaining endpoint it is gone.
    fn unbind(&self, uri: &Uri) {
        if self.routes.remove(uri).is_none() {
            return;
        }

        let peers: Vec<_> = self
            .routes
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for peer in peers {
            let _ = peer.send(InboundFrame::PeerLost(uri.clone()));
        }
        info!(uri = %uri, "In-process endpoint unbound");
    }
}

/// One bound endpoint on an [`InProcessNetwork`].
pub struct InProcessTransport {
    uri: Uri,
    network: Arc<InProcessNetwork>,
    closed: AtomicBool,
}

#[async_trait]
impl Transport for InProcessTransport {
    fn local_uri(&self) -> &Uri {
        &self.uri
    }

    async fn send(&self, destination: &Uri, frame: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        debug!(from = %self.uri, to = %destination, bytes = frame.len(), "Frame sent");
        self.network.deliver(destination, InboundFrame::Encoded(frame))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.network.unbind(&self.uri);
        }
    }
}
