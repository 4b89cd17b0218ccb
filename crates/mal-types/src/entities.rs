//! # Entities
//!
//! Entity keys, subscriptions, update headers and the element values carried
//! in message bodies.

use crate::identifiers::{Domain, Identifier, Uri};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One position of an [`EntityKey`]: either a wildcard or a concrete value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubKey<T> {
    Wildcard,
    Value(T),
}

impl<T: PartialEq> SubKey<T> {
    /// Whether this position accepts `value`.
    pub fn matches(&self, value: &T) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Value(own) => own == value,
        }
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }

    /// The concrete value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Wildcard => None,
            Self::Value(value) => Some(value),
        }
    }
}

impl<T: fmt::Display> fmt::Display for SubKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => f.write_str("*"),
            Self::Value(value) => write!(f, "{value}"),
        }
    }
}

/// Four-part discriminator identifying a class of publishable item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub first: SubKey<Identifier>,
    pub second: SubKey<i64>,
    pub third: SubKey<i64>,
    pub fourth: SubKey<i64>,
}

impl EntityKey {
    pub fn from_parts(
        first: SubKey<Identifier>,
        second: SubKey<i64>,
        third: SubKey<i64>,
        fourth: SubKey<i64>,
    ) -> Self {
        Self {
            first,
            second,
            third,
            fourth,
        }
    }

    /// A key with no wildcard positions.
    pub fn concrete(first: impl Into<Identifier>, second: i64, third: i64, fourth: i64) -> Self {
        Self {
            first: SubKey::Value(first.into()),
            second: SubKey::Value(second),
            third: SubKey::Value(third),
            fourth: SubKey::Value(fourth),
        }
    }

    /// `*/*/*/*`
    #[must_use]
    pub fn all_wildcard() -> Self {
        Self {
            first: SubKey::Wildcard,
            second: SubKey::Wildcard,
            third: SubKey::Wildcard,
            fourth: SubKey::Wildcard,
        }
    }

    /// Whether every position holds a value.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        !(self.first.is_wildcard()
            || self.second.is_wildcard()
            || self.third.is_wildcard()
            || self.fourth.is_wildcard())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.first, self.second, self.third, self.fourth)
    }
}

impl FromStr for EntityKey {
    type Err = String;

    /// Parse `first/second/third/fourth`, `*` marking a wildcard position.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 4 {
            return Err(format!("entity key needs 4 parts, got {}: {s}", parts.len()));
        }

        let first = match parts[0] {
            "*" => SubKey::Wildcard,
            name => SubKey::Value(Identifier::from(name)),
        };
        let numeric = |raw: &str| -> Result<SubKey<i64>, String> {
            match raw {
                "*" => Ok(SubKey::Wildcard),
                value => value
                    .parse::<i64>()
                    .map(SubKey::Value)
                    .map_err(|e| format!("invalid sub-key {value}: {e}")),
            }
        };

        Ok(Self {
            first,
            second: numeric(parts[1])?,
            third: numeric(parts[2])?,
            fourth: numeric(parts[3])?,
        })
    }
}

/// One entity request of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRequest {
    /// Appended to the REGISTER header domain when present.
    pub sub_domain: Option<Domain>,
    pub only_on_change: bool,
    pub entity_keys: Vec<EntityKey>,
}

impl EntityRequest {
    pub fn new(entity_keys: Vec<EntityKey>, only_on_change: bool) -> Self {
        Self {
            sub_domain: None,
            only_on_change,
            entity_keys,
        }
    }

    #[must_use]
    pub fn with_sub_domain(mut self, sub_domain: Domain) -> Self {
        self.sub_domain = Some(sub_domain);
        self
    }
}

/// A consumer's standing registration of interest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Identifier,
    pub entities: Vec<EntityRequest>,
}

impl Subscription {
    pub fn new(id: impl Into<Identifier>, entities: Vec<EntityRequest>) -> Self {
        Self {
            id: id.into(),
            entities,
        }
    }
}

/// Kind of change a published update describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateType {
    Creation,
    /// Plain value change.
    Update,
    Modification,
    Deletion,
}

/// Per-item header of a publish batch. The key is always concrete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateHeader {
    pub timestamp: u64,
    pub source_uri: Uri,
    pub update_type: UpdateType,
    pub key: EntityKey,
}

impl UpdateHeader {
    pub fn new(source_uri: impl Into<Uri>, update_type: UpdateType, key: EntityKey) -> Self {
        Self {
            timestamp: crate::header::now_millis(),
            source_uri: source_uri.into(),
            update_type,
            key,
        }
    }
}

/// A typed body value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Blob(Vec<u8>),
    Boolean(bool),
    Double(f64),
    Identifier(Identifier),
    Long(i64),
    String(String),
    /// Milliseconds since the Unix epoch.
    Time(u64),
    UInteger(u32),
    List(Vec<Element>),
    Composite(Vec<NamedValue>),
}

/// A named, possibly absent value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: Identifier,
    pub value: Option<Element>,
}

impl NamedValue {
    pub fn new(name: impl Into<Identifier>, value: Option<Element>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
