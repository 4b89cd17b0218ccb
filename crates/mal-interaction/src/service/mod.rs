//! Service layer: the endpoint and the consumer, provider and publisher
//! handles built on it.

pub mod consumer;
pub mod endpoint;
pub mod provider;
pub mod publisher;
pub mod sender;

pub use consumer::MalConsumer;
pub use endpoint::MalEndpoint;
pub use provider::{
    InteractionContext, InvokeInteraction, ProgressInteraction, RequestInteraction,
    SendInteraction, SubmitInteraction,
};
pub use publisher::{MalProvider, MalPublisher, PublisherCache, PublisherKey};
pub use sender::{EndpointSnapshot, EndpointStats};
