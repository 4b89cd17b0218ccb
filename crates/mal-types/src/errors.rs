//! # Error Types
//!
//! The MAL standard error numbers and the errors surfaced to engine callers.

use crate::entities::Element;
use crate::identifiers::{TransactionId, Uri};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// MAL standard error numbers.
///
/// Serialized as the raw number so unknown codes survive a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum StandardError {
    DeliveryFailed,
    DeliveryTimedOut,
    DeliveryDelayed,
    DestinationUnknown,
    DestinationTransient,
    DestinationLost,
    AuthenticationFail,
    AuthorisationFail,
    EncryptionFail,
    UnsupportedArea,
    UnsupportedOperation,
    UnsupportedVersion,
    BadEncoding,
    Internal,
    Unknown,
    IncorrectState,
    TooMany,
    Shutdown,
    /// Service-specific error number.
    Other(u32),
}

impl StandardError {
    const BASE: u32 = 65536;

    const TABLE: [StandardError; 18] = [
        Self::DeliveryFailed,
        Self::DeliveryTimedOut,
        Self::DeliveryDelayed,
        Self::DestinationUnknown,
        Self::DestinationTransient,
        Self::DestinationLost,
        Self::AuthenticationFail,
        Self::AuthorisationFail,
        Self::EncryptionFail,
        Self::UnsupportedArea,
        Self::UnsupportedOperation,
        Self::UnsupportedVersion,
        Self::BadEncoding,
        Self::Internal,
        Self::Unknown,
        Self::IncorrectState,
        Self::TooMany,
        Self::Shutdown,
    ];

    /// The numeric error code.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::Other(code) => *code,
            standard => {
                let index = Self::TABLE
                    .iter()
                    .position(|candidate| candidate == standard)
                    .unwrap_or_default();
                Self::BASE + index as u32
            }
        }
    }

    /// Map a numeric code back to its variant.
    #[must_use]
    pub fn from_code(code: u32) -> Self {
        code.checked_sub(Self::BASE)
            .and_then(|index| Self::TABLE.get(index as usize).copied())
            .unwrap_or(Self::Other(code))
    }

    /// The upper-case name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeliveryFailed => "DELIVERY_FAILED",
            Self::DeliveryTimedOut => "DELIVERY_TIMEDOUT",
            Self::DeliveryDelayed => "DELIVERY_DELAYED",
            Self::DestinationUnknown => "DESTINATION_UNKNOWN",
            Self::DestinationTransient => "DESTINATION_TRANSIENT",
            Self::DestinationLost => "DESTINATION_LOST",
            Self::AuthenticationFail => "AUTHENTICATION_FAIL",
            Self::AuthorisationFail => "AUTHORISATION_FAIL",
            Self::EncryptionFail => "ENCRYPTION_FAIL",
            Self::UnsupportedArea => "UNSUPPORTED_AREA",
            Self::UnsupportedOperation => "UNSUPPORTED_OPERATION",
            Self::UnsupportedVersion => "UNSUPPORTED_VERSION",
            Self::BadEncoding => "BAD_ENCODING",
            Self::Internal => "INTERNAL",
            Self::Unknown => "UNKNOWN",
            Self::IncorrectState => "INCORRECT_STATE",
            Self::TooMany => "TOO_MANY",
            Self::Shutdown => "SHUTDOWN",
            Self::Other(_) => "SERVICE_ERROR",
        }
    }
}

impl From<u32> for StandardError {
    fn from(code: u32) -> Self {
        Self::from_code(code)
    }
}

impl From<StandardError> for u32 {
    fn from(error: StandardError) -> Self {
        error.code()
    }
}

impl fmt::Display for StandardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Errors from encoding or decoding a message.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("Encode failed ({codec}): {reason}")]
    Encode { codec: &'static str, reason: String },

    #[error("Decode failed ({codec}): {reason}")]
    Decode { codec: &'static str, reason: String },
}

/// Failure of a MAL interaction as seen by its caller.
#[derive(Debug, Clone, Error)]
pub enum MalError {
    /// The provider answered with an error stage.
    #[error("Remote error {code}")]
    Remote {
        code: StandardError,
        extra: Option<Element>,
    },

    /// The message could not be delivered.
    #[error("Transmit to {uri} failed with {code}: {reason}")]
    Transmit {
        uri: Uri,
        code: StandardError,
        reason: String,
    },

    /// No terminal stage arrived in time.
    #[error("Transaction {transaction_id} timed out after {after:?}")]
    Timeout {
        transaction_id: TransactionId,
        after: Duration,
    },

    /// Operation is not legal in the current interaction state.
    #[error("Incorrect state: {0}")]
    IncorrectState(String),

    /// Local validation rejected the input.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The endpoint was closed.
    #[error("Endpoint shut down")]
    Shutdown,
}

impl MalError {
    /// Shorthand for a remote error without extra information.
    #[must_use]
    pub fn remote(code: StandardError) -> Self {
        Self::Remote { code, extra: None }
    }

    /// The standard error number this failure maps to.
    #[must_use]
    pub fn standard_error(&self) -> StandardError {
        match self {
            Self::Remote { code, .. } | Self::Transmit { code, .. } => *code,
            Self::Timeout { .. } => StandardError::DeliveryTimedOut,
            Self::IncorrectState(_) => StandardError::IncorrectState,
            Self::Validation(_) => StandardError::BadEncoding,
            Self::Codec(_) => StandardError::BadEncoding,
            Self::Shutdown => StandardError::Shutdown,
        }
    }
}
