//! # Message Header
//!
//! The envelope carried by every MAL message.
//!
//! ## Invariants
//!
//! - All messages of one interaction share `interaction_type` and
//!   `transaction_id`.
//! - `interaction_stage` follows the legal sequence of the pattern; the engine
//!   enforces this, the header only carries it.

use crate::entities::NamedValue;
use crate::identifiers::{Domain, Identifier, TransactionId, Uri};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Delivery-guarantee class requested for a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QoSLevel {
    #[default]
    BestEffort,
    Assured,
    Queued,
    Timely,
}

impl fmt::Display for QoSLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BestEffort => "BESTEFFORT",
            Self::Assured => "ASSURED",
            Self::Queued => "QUEUED",
            Self::Timely => "TIMELY",
        };
        f.write_str(name)
    }
}

/// Kind of session a message belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    #[default]
    Live,
    Simulation,
    Replay,
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Live => "LIVE",
            Self::Simulation => "SIMULATION",
            Self::Replay => "REPLAY",
        };
        f.write_str(name)
    }
}

/// The six interaction patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionType {
    Send,
    Submit,
    Request,
    Invoke,
    Progress,
    PubSub,
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Send => "SEND",
            Self::Submit => "SUBMIT",
            Self::Request => "REQUEST",
            Self::Invoke => "INVOKE",
            Self::Progress => "PROGRESS",
            Self::PubSub => "PUBSUB",
        };
        f.write_str(name)
    }
}

/// Position of a message within its interaction pattern.
///
/// Numbers are per pattern, so several constants share a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionStage(pub u8);

impl InteractionStage {
    pub const SEND: Self = Self(1);

    pub const SUBMIT: Self = Self(1);
    pub const SUBMIT_ACK: Self = Self(2);

    pub const REQUEST: Self = Self(1);
    pub const REQUEST_RESPONSE: Self = Self(2);

    pub const INVOKE: Self = Self(1);
    pub const INVOKE_ACK: Self = Self(2);
    pub const INVOKE_RESPONSE: Self = Self(3);

    pub const PROGRESS: Self = Self(1);
    pub const PROGRESS_ACK: Self = Self(2);
    pub const PROGRESS_UPDATE: Self = Self(3);
    pub const PROGRESS_RESPONSE: Self = Self(4);

    pub const REGISTER: Self = Self(1);
    pub const REGISTER_ACK: Self = Self(2);
    pub const PUBLISH_REGISTER: Self = Self(3);
    pub const PUBLISH_REGISTER_ACK: Self = Self(4);
    pub const PUBLISH: Self = Self(5);
    pub const NOTIFY: Self = Self(6);
    pub const DEREGISTER: Self = Self(7);
    pub const DEREGISTER_ACK: Self = Self(8);
    pub const PUBLISH_DEREGISTER: Self = Self(9);
    pub const PUBLISH_DEREGISTER_ACK: Self = Self(10);

    /// The raw stage number.
    #[must_use]
    pub const fn value(&self) -> u8 {
        self.0
    }

    /// Human readable stage name within `interaction`.
    #[must_use]
    pub fn name(&self, interaction: InteractionType) -> &'static str {
        match (interaction, self.0) {
            (InteractionType::Send, 1) => "SEND",
            (InteractionType::Submit, 1) => "SUBMIT",
            (InteractionType::Submit, 2) => "SUBMIT_ACK",
            (InteractionType::Request, 1) => "REQUEST",
            (InteractionType::Request, 2) => "REQUEST_RESPONSE",
            (InteractionType::Invoke, 1) => "INVOKE",
            (InteractionType::Invoke, 2) => "INVOKE_ACK",
            (InteractionType::Invoke, 3) => "INVOKE_RESPONSE",
            (InteractionType::Progress, 1) => "PROGRESS",
            (InteractionType::Progress, 2) => "PROGRESS_ACK",
            (InteractionType::Progress, 3) => "PROGRESS_UPDATE",
            (InteractionType::Progress, 4) => "PROGRESS_RESPONSE",
            (InteractionType::PubSub, 1) => "REGISTER",
            (InteractionType::PubSub, 2) => "REGISTER_ACK",
            (InteractionType::PubSub, 3) => "PUBLISH_REGISTER",
            (InteractionType::PubSub, 4) => "PUBLISH_REGISTER_ACK",
            (InteractionType::PubSub, 5) => "PUBLISH",
            (InteractionType::PubSub, 6) => "NOTIFY",
            (InteractionType::PubSub, 7) => "DEREGISTER",
            (InteractionType::PubSub, 8) => "DEREGISTER_ACK",
            (InteractionType::PubSub, 9) => "PUBLISH_DEREGISTER",
            (InteractionType::PubSub, 10) => "PUBLISH_DEREGISTER_ACK",
            _ => "UNDEFINED",
        }
    }
}

impl fmt::Display for InteractionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a service implementation: area, service and area version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    pub area: u16,
    pub service: u16,
    pub version: u8,
}

impl ServiceKey {
    #[must_use]
    pub const fn new(area: u16, service: u16, version: u8) -> Self {
        Self {
            area,
            service,
            version,
        }
    }

    /// Extend to a specific operation of this service.
    #[must_use]
    pub const fn operation(&self, operation: u16) -> OperationKey {
        OperationKey {
            service: *self,
            operation,
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.v{}", self.area, self.service, self.version)
    }
}

/// A single operation of a service. PUBSUB state is partitioned by this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationKey {
    pub service: ServiceKey,
    pub operation: u16,
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.op{}", self.service, self.operation)
    }
}

/// The envelope carried by every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    // =========================================================================
    // ROUTING
    // =========================================================================
    pub uri_from: Uri,
    pub uri_to: Uri,
    pub authentication_id: Vec<u8>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub qos_level: QoSLevel,
    pub priority: u32,

    // =========================================================================
    // CONTEXT
    // =========================================================================
    pub domain: Domain,
    pub network_zone: Identifier,
    pub session: SessionType,
    pub session_name: Identifier,

    // =========================================================================
    // INTERACTION
    // =========================================================================
    pub interaction_type: InteractionType,
    pub interaction_stage: InteractionStage,
    pub transaction_id: TransactionId,
    pub service_area: u16,
    pub service: u16,
    pub operation: u16,
    pub area_version: u8,
    pub is_error_message: bool,

    /// Named-value side channel. Not interpreted by the engine.
    pub supplements: Vec<NamedValue>,
}

impl MessageHeader {
    /// The service this message addresses.
    #[must_use]
    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.service_area, self.service, self.area_version)
    }

    /// The operation this message addresses.
    #[must_use]
    pub fn operation_key(&self) -> OperationKey {
        self.service_key().operation(self.operation)
    }

    /// Human readable name of the stage.
    #[must_use]
    pub fn stage_name(&self) -> &'static str {
        self.interaction_stage.name(self.interaction_type)
    }

    /// Header for a reply to this message: endpoints swapped, same
    /// transaction, new stage and a fresh timestamp.
    #[must_use]
    pub fn reply(&self, stage: InteractionStage, is_error: bool) -> MessageHeader {
        MessageHeader {
            uri_from: self.uri_to.clone(),
            uri_to: self.uri_from.clone(),
            timestamp: now_millis(),
            interaction_stage: stage,
            is_error_message: is_error,
            supplements: Vec::new(),
            ..self.clone()
        }
    }
}

/// Everything needed to address a remote service, minus the per-message
/// fields (stage, transaction id, operation, timestamp).
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderTemplate {
    pub uri_to: Uri,
    pub authentication_id: Vec<u8>,
    pub qos_level: QoSLevel,
    pub priority: u32,
    pub domain: Domain,
    pub network_zone: Identifier,
    pub session: SessionType,
    pub session_name: Identifier,
    pub service: ServiceKey,
}

impl HeaderTemplate {
    /// A live, best-effort template in the `GROUND` zone.
    pub fn new(uri_to: impl Into<Uri>, service: ServiceKey, domain: Domain) -> Self {
        Self {
            uri_to: uri_to.into(),
            authentication_id: Vec::new(),
            qos_level: QoSLevel::default(),
            priority: 0,
            domain,
            network_zone: Identifier::from("GROUND"),
            session: SessionType::default(),
            session_name: Identifier::from("LIVE"),
            service,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session: SessionType, session_name: impl Into<Identifier>) -> Self {
        self.session = session;
        self.session_name = session_name.into();
        self
    }

    #[must_use]
    pub fn with_network_zone(mut self, zone: impl Into<Identifier>) -> Self {
        self.network_zone = zone.into();
        self
    }

    #[must_use]
    pub fn with_qos(mut self, qos_level: QoSLevel, priority: u32) -> Self {
        self.qos_level = qos_level;
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_authentication_id(mut self, authentication_id: Vec<u8>) -> Self {
        self.authentication_id = authentication_id;
        self
    }

    /// Build the header of the initiating message of an interaction.
    ///
    /// The transaction id is left at zero; the engine assigns it.
    #[must_use]
    pub fn header(
        &self,
        uri_from: &Uri,
        interaction_type: InteractionType,
        stage: InteractionStage,
        operation: u16,
    ) -> MessageHeader {
        MessageHeader {
            uri_from: uri_from.clone(),
            uri_to: self.uri_to.clone(),
            authentication_id: self.authentication_id.clone(),
            timestamp: now_millis(),
            qos_level: self.qos_level,
            priority: self.priority,
            domain: self.domain.clone(),
            network_zone: self.network_zone.clone(),
            session: self.session,
            session_name: self.session_name.clone(),
            interaction_type,
            interaction_stage: stage,
            transaction_id: TransactionId::default(),
            service_area: self.service.area,
            service: self.service.service,
            operation,
            area_version: self.service.version,
            is_error_message: false,
            supplements: Vec::new(),
        }
    }
}

/// Current Unix time in milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
