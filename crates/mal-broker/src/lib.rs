//! # MAL Broker
//!
//! Matches published updates against consumer subscriptions and produces the
//! NOTIFY messages to fan out.
//!
//! ## Flow
//!
//! ```text
//! REGISTER ──────────► SubscriptionDetails { required, on_all, on_change }
//!                                  │
//! PUBLISH ─► validate ─► UpdateKey ┴─► filter per subscription ─► NOTIFY
//! ```
//!
//! ## Filter Rule
//!
//! Update `i` is notified when its key matches an `on_all` key, or when it is
//! not a plain value update and matches an `on_change` key. Headers and value
//! columns are cut with the same index set.
//!
//! ## Concurrency
//!
//! - Matching functions in [`matcher`] are pure and take no locks.
//! - Registration state sits behind a single `RwLock`; a PUBLISH snapshots
//!   its partition and filters outside the lock, on the rayon pool once the
//!   partition is large.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod matcher;
pub mod subscription;

pub use broker::{
    Broker, BrokerConfig, BrokerError, BrokerSnapshot, BrokerStats, DEFAULT_PARALLEL_THRESHOLD,
};
pub use matcher::{
    domain_matches, entity_key_matches, matches, DomainMatching, SubscriptionKey, UpdateKey,
};
pub use subscription::{filter, update_keys, SubscriptionDetails};
