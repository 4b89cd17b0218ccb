//! # Codecs
//!
//! Turn a [`MalMessage`] into bytes and back. A decode failure affects only
//! the one message.

use crate::body::MalMessage;
use crate::errors::CodecError;
use std::str::FromStr;
use std::sync::Arc;

/// Wire encoding used by a binding.
pub trait MessageCodec: Send + Sync {
    /// Codec name for logs.
    fn name(&self) -> &'static str;

    fn encode(&self, message: &MalMessage) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<MalMessage, CodecError>;
}

/// Compact binary encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl MessageCodec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode(&self, message: &MalMessage) -> Result<Vec<u8>, CodecError> {
        bincode::serialize(message).map_err(|e| CodecError::Encode {
            codec: self.name(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<MalMessage, CodecError> {
        bincode::deserialize(bytes).map_err(|e| CodecError::Decode {
            codec: self.name(),
            reason: e.to_string(),
        })
    }
}

/// Text encoding, handy when reading traffic by eye.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, message: &MalMessage) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(message).map_err(|e| CodecError::Encode {
            codec: self.name(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<MalMessage, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: self.name(),
            reason: e.to_string(),
        })
    }
}

/// Configurable codec selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CodecKind {
    #[default]
    Bincode,
    Json,
}

impl CodecKind {
    /// Instantiate the selected codec.
    #[must_use]
    pub fn codec(&self) -> Arc<dyn MessageCodec> {
        match self {
            Self::Bincode => Arc::new(BincodeCodec),
            Self::Json => Arc::new(JsonCodec),
        }
    }
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bincode" | "binary" => Ok(Self::Bincode),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown codec: {other}")),
        }
    }
}
