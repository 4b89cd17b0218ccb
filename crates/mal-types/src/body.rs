//! # Message Bodies
//!
//! The engine treats bodies as opaque except for the PUBSUB variants the
//! broker must inspect.

use crate::entities::{Element, EntityKey, Subscription, UpdateHeader};
use crate::errors::{MalError, StandardError};
use crate::header::MessageHeader;
use crate::identifiers::Identifier;
use serde::{Deserialize, Serialize};

/// A published batch: one header per update plus N parallel value columns.
///
/// Every column has exactly one entry per header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    pub headers: Vec<UpdateHeader>,
    pub columns: Vec<Vec<Element>>,
}

impl UpdateBatch {
    pub fn new(headers: Vec<UpdateHeader>, columns: Vec<Vec<Element>>) -> Self {
        Self { headers, columns }
    }

    /// Check column alignment. Returns the index of the first bad column.
    pub fn validate(&self) -> Result<(), (usize, usize)> {
        match self
            .columns
            .iter()
            .enumerate()
            .find(|(_, column)| column.len() != self.headers.len())
        {
            Some((index, column)) => Err((index, column.len())),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Filtered updates for one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyMessage {
    pub subscription_id: Identifier,
    pub headers: Vec<UpdateHeader>,
    pub columns: Vec<Vec<Element>>,
}

/// Structured error payload of an error stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: StandardError,
    pub extra: Option<Element>,
}

impl ErrorBody {
    pub fn new(code: StandardError) -> Self {
        Self { code, extra: None }
    }

    pub fn with_extra(code: StandardError, extra: Element) -> Self {
        Self {
            code,
            extra: Some(extra),
        }
    }

    /// The payload a provider sends for a local failure.
    pub fn from_error(error: &MalError) -> Self {
        match error {
            MalError::Remote { code, extra } => Self {
                code: *code,
                extra: extra.clone(),
            },
            other => Self::with_extra(other.standard_error(), Element::String(other.to_string())),
        }
    }
}

/// Body of a MAL message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageBody {
    Empty,
    /// Opaque operation arguments or results.
    Elements(Vec<Element>),
    Register(Subscription),
    PublishRegister(Vec<EntityKey>),
    Publish(UpdateBatch),
    Notify(NotifyMessage),
    /// Subscription ids; `*` removes them all.
    Deregister(Vec<Identifier>),
    Error(ErrorBody),
}

impl MessageBody {
    /// The error payload, if this is an error body.
    pub fn as_error(&self) -> Option<&ErrorBody> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Elements(_) => "elements",
            Self::Register(_) => "register",
            Self::PublishRegister(_) => "publish_register",
            Self::Publish(_) => "publish",
            Self::Notify(_) => "notify",
            Self::Deregister(_) => "deregister",
            Self::Error(_) => "error",
        }
    }
}

/// A header plus its body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalMessage {
    pub header: MessageHeader,
    pub body: MessageBody,
}

impl MalMessage {
    pub fn new(header: MessageHeader, body: MessageBody) -> Self {
        Self { header, body }
    }

    /// An error-stage message. Sets the header error flag.
    pub fn error(mut header: MessageHeader, error: ErrorBody) -> Self {
        header.is_error_message = true;
        Self {
            header,
            body: MessageBody::Error(error),
        }
    }

    /// The error code carried by an error message, if any.
    pub fn error_code(&self) -> Option<StandardError> {
        if !self.header.is_error_message {
            return None;
        }
        Some(
            self.body
                .as_error()
                .map_or(StandardError::Unknown, |error| error.code),
        )
    }
}
