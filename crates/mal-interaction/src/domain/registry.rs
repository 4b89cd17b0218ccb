//! # Transaction Registry
//!
//! Maps an in-flight transaction id to the blocked caller and/or the async
//! listener waiting for its stages.
//!
//! Flow:
//! 1. A consumer call invokes `begin()` and gets an id plus, for blocking
//!    calls, a oneshot receiver.
//! 2. The initiating message goes out carrying that id.
//! 3. The receive loop hands every reply stage to `complete()`, which checks
//!    it against the state machine and delivers it.
//! 4. The caller awaits the receiver; on expiry it calls `timeout()`.
//!
//! A transaction is bound to the peer it was opened with: replies from any
//! other URI are rejected, and losing that peer fails the transaction.
//!
//! `complete()` and `timeout()` racing on one id resolve to exactly one
//! effect: whichever takes the waiter first wins, the other finds nothing.

use crate::domain::state_machine::{transition, Delivery, ProtocolViolation};
use crate::ports::inbound::InteractionListener;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mal_types::{InteractionStage, InteractionType, MalError, MalMessage, TransactionId, Uri};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// What the blocked caller receives.
pub type WaiterResult = Result<MalMessage, MalError>;

/// How the initiator wants the stages of a call delivered.
#[derive(Clone)]
pub enum CallMode {
    /// Every stage goes to a blocked caller. SUBMIT, REQUEST, DEREGISTER.
    Blocking,
    /// Every stage goes to the listener.
    Async(Arc<dyn InteractionListener>),
    /// The acknowledgement goes to a blocked caller, later stages to the
    /// listener. INVOKE, PROGRESS, REGISTER.
    BlockingThenAsync(Arc<dyn InteractionListener>),
}

impl CallMode {
    fn split(self) -> (bool, Option<Arc<dyn InteractionListener>>) {
        match self {
            Self::Blocking => (true, None),
            Self::Async(listener) => (false, Some(listener)),
            Self::BlockingThenAsync(listener) => (true, Some(listener)),
        }
    }
}

/// Result of handing a reply stage to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Delivered to the waiter or listener.
    Delivered { terminal: bool },
    /// Known transaction, but the stage is out of sequence. State untouched.
    Rejected(ProtocolViolation),
    /// No such transaction (never existed, finished or timed out).
    UnknownTransaction,
}

/// A pending transaction.
struct Transaction {
    interaction: InteractionType,
    initial: InteractionStage,
    last: InteractionStage,
    /// `uri_to` of the opening message; the only URI allowed to reply.
    peer: Uri,
    waiter: Option<oneshot::Sender<WaiterResult>>,
    listener: Option<Arc<dyn InteractionListener>>,
    created_at: Instant,
}

enum Target {
    Waiter(oneshot::Sender<WaiterResult>),
    Listener(Arc<dyn InteractionListener>),
    Nobody,
}

/// Registry counters.
#[derive(Debug, Default)]
pub struct PendingStats {
    pub total_registered: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_timeouts: AtomicU64,
    pub total_failed: AtomicU64,
    /// Out-of-sequence stages for known transactions.
    pub total_rejected: AtomicU64,
    /// Stages for unknown transactions.
    pub total_unknown: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`] plus the live count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub pending: usize,
    pub registered: u64,
    pub completed: u64,
    pub timeouts: u64,
    pub failed: u64,
    pub rejected: u64,
    pub unknown: u64,
}

/// Thread-safe table of pending transactions for one endpoint.
pub struct TransactionRegistry {
    pending: DashMap<TransactionId, Transaction>,
    next_id: AtomicU64,
    stats: Arc<PendingStats>,
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            stats: Arc::new(PendingStats::default()),
        }
    }

    /// Allocate an id without registering anything. Used for SEND.
    pub fn allocate_id(&self) -> TransactionId {
        TransactionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a new transaction opened with `initial`.
    ///
    /// Returns its id and, for blocking modes, the receiver the caller
    /// awaits. Ids still in use are skipped, so two live transactions never
    /// share one.
    pub fn begin(
        &self,
        interaction: InteractionType,
        initial: InteractionStage,
        peer: Uri,
        mode: CallMode,
    ) -> (TransactionId, Option<oneshot::Receiver<WaiterResult>>) {
        let (blocking, listener) = mode.split();
        let (waiter, receiver) = if blocking {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let transaction = Transaction {
            interaction,
            initial,
            last: initial,
            peer,
            waiter,
            listener,
            created_at: Instant::now(),
        };

        let id = loop {
            let id = self.allocate_id();
            match self.pending.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(transaction);
                    break id;
                }
                Entry::Occupied(_) => {
                    debug!(transaction_id = %id, "Transaction id still in use, skipping");
                }
            }
        };

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(
            transaction_id = %id,
            interaction = %interaction,
            stage = initial.name(interaction),
            "Transaction registered"
        );
        (id, receiver)
    }

    /// Deliver a reply stage to whoever waits for its transaction.
    ///
    /// Out-of-sequence stages and unknown ids are logged and dropped.
    pub fn complete(&self, message: MalMessage) -> CompletionOutcome {
        let header = &message.header;
        let id = header.transaction_id;
        let incoming = header.interaction_stage;

        let (target, terminal) = {
            let Some(mut transaction) = self.pending.get_mut(&id) else {
                self.stats.total_unknown.fetch_add(1, Ordering::Relaxed);
                warn!(
                    transaction_id = %id,
                    from = %header.uri_from,
                    stage = header.stage_name(),
                    "Stage for unknown or expired transaction dropped"
                );
                return CompletionOutcome::UnknownTransaction;
            };

            if header.uri_from != transaction.peer {
                self.stats.total_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    transaction_id = %id,
                    from = %header.uri_from,
                    expected = %transaction.peer,
                    stage = header.stage_name(),
                    "Stage from foreign peer dropped"
                );
                return CompletionOutcome::Rejected(ProtocolViolation::ForeignPeer {
                    interaction: header.interaction_type,
                    stage: incoming,
                });
            }

            let step = if transaction.interaction == header.interaction_type {
                transition(
                    transaction.interaction,
                    transaction.initial,
                    transaction.last,
                    incoming,
                    header.is_error_message,
                )
            } else {
                Err(ProtocolViolation::IllegalTransition {
                    interaction: header.interaction_type,
                    initial: transaction.initial,
                    last: transaction.last,
                    incoming,
                })
            };
            let step = match step {
                Ok(step) => step,
                Err(violation) => {
                    self.stats.total_rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        transaction_id = %id,
                        from = %header.uri_from,
                        %violation,
                        "Out-of-sequence stage dropped"
                    );
                    return CompletionOutcome::Rejected(violation);
                }
            };

            transaction.last = incoming;
            let target = match step.delivery {
                Delivery::Waiter => match transaction.waiter.take() {
                    Some(waiter) => Target::Waiter(waiter),
                    None => transaction
                        .listener
                        .clone()
                        .map_or(Target::Nobody, Target::Listener),
                },
                Delivery::Listener => transaction
                    .listener
                    .clone()
                    .map_or(Target::Nobody, Target::Listener),
            };
            (target, step.terminal)
        };

        if terminal {
            if let Some((_, transaction)) = self.pending.remove(&id) {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    transaction_id = %id,
                    elapsed_ms = transaction.created_at.elapsed().as_millis() as u64,
                    "Transaction completed"
                );
            }
        }

        match target {
            Target::Waiter(waiter) => {
                let result = match message.error_code() {
                    Some(code) => Err(MalError::Remote {
                        code,
                        extra: message.body.as_error().and_then(|e| e.extra.clone()),
                    }),
                    None => Ok(message),
                };
                if waiter.send(result).is_err() {
                    debug!(transaction_id = %id, "Waiter dropped before delivery");
                }
            }
            Target::Listener(listener) => listener.on_message(&message),
            Target::Nobody => {
                debug!(transaction_id = %id, stage = incoming.0, "No receiver for stage");
            }
        }

        CompletionOutcome::Delivered { terminal }
    }

    /// Expire the blocked caller of `id`.
    ///
    /// Has an effect only if the waiter is still pending; the caller then
    /// receives [`MalError::Timeout`] through its receiver and the entry is
    /// gone. Returns whether this call had the effect.
    pub fn timeout(&self, id: TransactionId, after: Duration) -> bool {
        let Some((_, mut transaction)) = self
            .pending
            .remove_if(&id, |_, transaction| transaction.waiter.is_some())
        else {
            return false;
        };

        self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
        warn!(
            transaction_id = %id,
            timeout_ms = after.as_millis() as u64,
            "Transaction timed out"
        );
        if let Some(waiter) = transaction.waiter.take() {
            let _ = waiter.send(Err(MalError::Timeout {
                transaction_id: id,
                after,
            }));
        }
        true
    }

    /// End a transaction with a local failure, e.g. a transmit error.
    ///
    /// The waiter receives the error; without a waiter the listener's
    /// `on_failure` is called.
    pub fn fail(&self, id: TransactionId, error: MalError) -> bool {
        let Some((_, mut transaction)) = self.pending.remove(&id) else {
            return false;
        };
        self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
        debug!(transaction_id = %id, %error, "Transaction failed");

        match (transaction.waiter.take(), transaction.listener.take()) {
            (Some(waiter), _) => {
                let _ = waiter.send(Err(error));
            }
            (None, Some(listener)) => listener.on_failure(id, &error),
            (None, None) => {}
        }
        true
    }

    /// Fail every pending transaction. Returns how many there were.
    pub fn fail_all(&self, error: &MalError) -> usize {
        let ids: Vec<TransactionId> = self.pending.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter(|id| self.fail(*id, error.clone()))
            .count()
    }

    /// Fail every transaction opened with `peer`, e.g. once its connection
    /// is gone. Returns how many there were.
    pub fn fail_peer(&self, peer: &Uri, error: &MalError) -> usize {
        let ids: Vec<TransactionId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().peer == *peer)
            .map(|entry| *entry.key())
            .collect();
        let failed = ids
            .into_iter()
            .filter(|id| self.fail(*id, error.clone()))
            .count();
        if failed > 0 {
            warn!(%peer, failed, "Transactions failed after peer loss");
        }
        failed
    }

    /// Forget a transaction without notifying anyone.
    pub fn remove(&self, id: TransactionId) -> bool {
        self.pending.remove(&id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: TransactionId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            pending: self.pending_count(),
            registered: self.stats.total_registered.load(Ordering::Relaxed),
            completed: self.stats.total_completed.load(Ordering::Relaxed),
            timeouts: self.stats.total_timeouts.load(Ordering::Relaxed),
            failed: self.stats.total_failed.load(Ordering::Relaxed),
            rejected: self.stats.total_rejected.load(Ordering::Relaxed),
            unknown: self.stats.total_unknown.load(Ordering::Relaxed),
        }
    }
}

impl Default for TransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
