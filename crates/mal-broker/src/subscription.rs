//! # Subscription State
//!
//! Per-subscription derived key sets and the notify filter.

use crate::broker::BrokerError;
use crate::matcher::{matches, DomainMatching, SubscriptionKey, UpdateKey};
use mal_types::{
    Identifier, MessageHeader, NotifyMessage, Subscription, TransactionId, UpdateBatch, UpdateType,
};
use std::collections::HashSet;

/// Broker-side state of one consumer subscription.
///
/// Rebuilt from scratch on every REGISTER with the same id.
#[derive(Debug, Clone)]
pub struct SubscriptionDetails {
    id: Identifier,
    register_header: MessageHeader,
    /// Every registered key. Used as a pre-filter.
    required: HashSet<SubscriptionKey>,
    /// Keys from entity requests with `only_on_change = false`.
    on_all: HashSet<SubscriptionKey>,
    /// Keys from entity requests with `only_on_change = true`.
    on_change: HashSet<SubscriptionKey>,
}

impl SubscriptionDetails {
    /// Derive the key sets from a REGISTER header and body.
    pub fn new(register_header: &MessageHeader, subscription: &Subscription) -> Self {
        let mut required = HashSet::new();
        let mut on_all = HashSet::new();
        let mut on_change = HashSet::new();

        for request in &subscription.entities {
            for key in &request.entity_keys {
                let sub_key =
                    SubscriptionKey::new(register_header, request.sub_domain.as_ref(), key.clone());
                if request.only_on_change {
                    on_change.insert(sub_key.clone());
                } else {
                    on_all.insert(sub_key.clone());
                }
                required.insert(sub_key);
            }
        }

        Self {
            id: subscription.id.clone(),
            register_header: register_header.clone(),
            required,
            on_all,
            on_change,
        }
    }

    #[must_use]
    pub fn id(&self) -> &Identifier {
        &self.id
    }

    /// Transaction id of the REGISTER; every NOTIFY for this subscription
    /// carries it.
    #[must_use]
    pub fn register_transaction(&self) -> TransactionId {
        self.register_header.transaction_id
    }

    #[must_use]
    pub fn register_header(&self) -> &MessageHeader {
        &self.register_header
    }

    #[must_use]
    pub fn key_count(&self) -> usize {
        self.required.len()
    }

    /// Select the updates of `batch` this subscription should be notified
    /// of. `update_keys[i]` is the key of `batch.headers[i]`.
    ///
    /// Headers and every column are filtered with the same index set.
    /// Returns `None` when nothing is eligible.
    pub fn filter(
        &self,
        update_keys: &[UpdateKey],
        batch: &UpdateBatch,
        mode: DomainMatching,
    ) -> Option<NotifyMessage> {
        let any_match =
            |set: &HashSet<SubscriptionKey>, key: &UpdateKey| set.iter().any(|sub| matches(sub, key, mode));

        let mut eligible = Vec::new();
        for (index, (key, header)) in update_keys.iter().zip(&batch.headers).enumerate() {
            if !any_match(&self.required, key) {
                continue;
            }
            if any_match(&self.on_all, key)
                || (header.update_type != UpdateType::Update && any_match(&self.on_change, key))
            {
                eligible.push(index);
            }
        }

        if eligible.is_empty() {
            return None;
        }

        let headers = eligible.iter().map(|&i| batch.headers[i].clone()).collect();
        let columns = batch
            .columns
            .iter()
            .map(|column| eligible.iter().map(|&i| column[i].clone()).collect())
            .collect();

        Some(NotifyMessage {
            subscription_id: self.id.clone(),
            headers,
            columns,
        })
    }
}

/// Key every update of a PUBLISH batch, `keys[i]` for `batch.headers[i]`.
///
/// Fails for a batch whose columns do not line up with its headers and for
/// an update that carries a wildcard key.
pub fn update_keys(publish_header: &MessageHeader, batch: &UpdateBatch) -> Result<Vec<UpdateKey>, BrokerError> {
    if let Err((column, len)) = batch.validate() {
        return Err(BrokerError::MalformedBatch {
            column,
            len,
            expected: batch.len(),
        });
    }
    batch
        .headers
        .iter()
        .map(|update| {
            UpdateKey::from_update(publish_header, update).ok_or_else(|| BrokerError::WildcardUpdate {
                key: update.key.clone(),
            })
        })
        .collect()
}

/// One-shot filter of a single subscription against a batch, computing the
/// update keys from the PUBLISH header.
pub fn filter(
    subscription: &SubscriptionDetails,
    publish_header: &MessageHeader,
    batch: &UpdateBatch,
    mode: DomainMatching,
) -> Result<Option<NotifyMessage>, BrokerError> {
    let keys = update_keys(publish_header, batch)?;
    Ok(subscription.filter(&keys, batch, mode))
}
