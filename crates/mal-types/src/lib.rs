//! # MAL Types Crate
//!
//! Data model shared by the interaction engine, the broker and the bindings.
//!
//! ## Design Principles
//!
//! - **Header Authority**: Routing, correlation and context live only in
//!   [`MessageHeader`]. Bodies never repeat the transaction id or the
//!   interaction type.
//! - **Explicit Wildcards**: An [`EntityKey`] sub-key is either
//!   [`SubKey::Wildcard`] or [`SubKey::Value`]; there is no "empty means any".
//! - **Tagged Bodies**: [`MessageBody`] is a closed enum, so the broker can
//!   inspect the PUBSUB bodies it needs and treat everything else as opaque.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod body;
pub mod codec;
pub mod entities;
pub mod errors;
pub mod header;
pub mod identifiers;

pub use body::{ErrorBody, MalMessage, MessageBody, NotifyMessage, UpdateBatch};
pub use codec::{BincodeCodec, CodecKind, JsonCodec, MessageCodec};
pub use entities::{
    Element, EntityKey, EntityRequest, NamedValue, SubKey, Subscription, UpdateHeader, UpdateType,
};
pub use errors::{CodecError, MalError, StandardError};
pub use header::{
    now_millis, HeaderTemplate, InteractionStage, InteractionType, MessageHeader, OperationKey,
    QoSLevel, ServiceKey, SessionType,
};
pub use identifiers::{Domain, Identifier, TransactionId, Uri};
