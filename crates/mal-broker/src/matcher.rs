//! # Subscription / Update Key Matcher
//!
//! Pure, lock-free matching of concrete published items against possibly
//! wildcarded subscription keys.

use mal_types::{Domain, EntityKey, Identifier, MessageHeader, SessionType, SubKey, UpdateHeader};

/// How a subscription domain is compared with an update domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DomainMatching {
    /// Identifier-for-identifier equality.
    Exact,
    /// Equality, except that a final `*` in the subscription domain matches
    /// zero or more trailing identifiers of the update domain.
    #[default]
    TrailingWildcard,
}

impl std::str::FromStr for DomainMatching {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "trailing-wildcard" | "trailing_wildcard" | "wildcard" => Ok(Self::TrailingWildcard),
            other => Err(format!("unknown domain matching mode: {other}")),
        }
    }
}

/// Comparable form of one registered key plus its REGISTER context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub domain: Domain,
    pub network_zone: Identifier,
    pub session: SessionType,
    pub session_name: Identifier,
    pub key: EntityKey,
}

impl SubscriptionKey {
    /// Build from the REGISTER header, the entity request's optional
    /// sub-domain and one of its keys.
    pub fn new(register: &MessageHeader, sub_domain: Option<&Domain>, key: EntityKey) -> Self {
        let domain = match sub_domain {
            Some(suffix) => register.domain.join(suffix),
            None => register.domain.clone(),
        };
        Self {
            domain,
            network_zone: register.network_zone.clone(),
            session: register.session,
            session_name: register.session_name.clone(),
            key,
        }
    }
}

/// Comparable form of one published update. Always concrete.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpdateKey {
    pub domain: Domain,
    pub network_zone: Identifier,
    pub session: SessionType,
    pub session_name: Identifier,
    pub key: EntityKey,
}

impl UpdateKey {
    /// Build from the PUBLISH header and one update header.
    ///
    /// Returns `None` when the update key contains a wildcard.
    pub fn from_update(publish: &MessageHeader, update: &UpdateHeader) -> Option<Self> {
        if !update.key.is_concrete() {
            return None;
        }
        Some(Self {
            domain: publish.domain.clone(),
            network_zone: publish.network_zone.clone(),
            session: publish.session,
            session_name: publish.session_name.clone(),
            key: update.key.clone(),
        })
    }
}

/// Whether `subscription` covers `update` under `mode`.
pub fn domain_matches(subscription: &Domain, update: &Domain, mode: DomainMatching) -> bool {
    match mode {
        DomainMatching::Exact => subscription == update,
        DomainMatching::TrailingWildcard => {
            if subscription.ends_with_wildcard() {
                let prefix = &subscription.parts()[..subscription.len() - 1];
                update.len() >= prefix.len() && update.parts().starts_with(prefix)
            } else {
                subscription == update
            }
        }
    }
}

/// Whether every position of `pattern` is a wildcard or equals `concrete`.
pub fn entity_key_matches(pattern: &EntityKey, concrete: &EntityKey) -> bool {
    fn position<T: PartialEq>(pattern: &SubKey<T>, concrete: &SubKey<T>) -> bool {
        match concrete {
            SubKey::Value(value) => pattern.matches(value),
            SubKey::Wildcard => pattern.is_wildcard(),
        }
    }

    position(&pattern.first, &concrete.first)
        && position(&pattern.second, &concrete.second)
        && position(&pattern.third, &concrete.third)
        && position(&pattern.fourth, &concrete.fourth)
}

/// Whether a subscription key matches a published update key.
pub fn matches(subscription: &SubscriptionKey, update: &UpdateKey, mode: DomainMatching) -> bool {
    subscription.session == update.session
        && subscription.session_name == update.session_name
        && subscription.network_zone == update.network_zone
        && domain_matches(&subscription.domain, &update.domain, mode)
        && entity_key_matches(&subscription.key, &update.key)
}
