//! # Interaction State Machine
//!
//! The legal stage sequence of every interaction pattern, as one table.
//!
//! ```text
//! SEND      1
//! SUBMIT    1 ─► 2 (T)
//! REQUEST   1 ─► 2 (T)
//! INVOKE    1 ─► 2 (T on error) ─► 3 (T)
//! PROGRESS  1 ─► 2 (T on error) ─► 3* ─► 4 (T)     3 with error is T
//! PUBSUB    REGISTER 1 ─► 2 (T on error) ─► NOTIFY 6*
//!           PUBLISH_REGISTER 3 ─► 4 (T on error) ─► PUBLISH error 5*
//!           DEREGISTER 7 ─► 8 (T)
//!           PUBLISH_DEREGISTER 9 ─► 10 (T)
//! ```
//!
//! The transitions are judged from the initiator's side: `initial` is the
//! stage that opened the transaction, `last` the most recent stage delivered
//! for it.

use mal_types::{InteractionStage, InteractionType};
use thiserror::Error;

/// Who receives a delivered stage on the initiating endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The blocked synchronous caller.
    Waiter,
    /// The registered asynchronous listener.
    Listener,
}

/// Outcome of a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTransition {
    pub delivery: Delivery,
    /// The transaction ends with this stage.
    pub terminal: bool,
}

impl StageTransition {
    const fn new(delivery: Delivery, terminal: bool) -> Self {
        Self { delivery, terminal }
    }
}

/// A stage that the pattern does not allow at this point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("{interaction} stage {incoming} cannot follow stage {last} (opened at {initial})")]
    IllegalTransition {
        interaction: InteractionType,
        initial: InteractionStage,
        last: InteractionStage,
        incoming: InteractionStage,
    },

    #[error("{interaction} stage {stage} does not open an interaction")]
    NotInitiating {
        interaction: InteractionType,
        stage: InteractionStage,
    },

    #[error("{interaction} stage {stage} came from a peer the transaction was not opened with")]
    ForeignPeer {
        interaction: InteractionType,
        stage: InteractionStage,
    },
}

/// Decide whether `incoming` may follow `last` in a transaction opened with
/// `initial`, and where it goes.
pub fn transition(
    interaction: InteractionType,
    initial: InteractionStage,
    last: InteractionStage,
    incoming: InteractionStage,
    is_error: bool,
) -> Result<StageTransition, ProtocolViolation> {
    use Delivery::{Listener, Waiter};
    use InteractionType::*;

    let result = match (interaction, initial.0, last.0, incoming.0, is_error) {
        (Submit | Request, 1, 1, 2, _) => StageTransition::new(Waiter, true),

        (Invoke, 1, 1, 2, error) => StageTransition::new(Waiter, error),
        (Invoke, 1, 2, 3, _) => StageTransition::new(Listener, true),

        (Progress, 1, 1, 2, error) => StageTransition::new(Waiter, error),
        (Progress, 1, 2 | 3, 3, error) => StageTransition::new(Listener, error),
        (Progress, 1, 2 | 3, 4, _) => StageTransition::new(Listener, true),

        (PubSub, 1, 1, 2, error) => StageTransition::new(Waiter, error),
        (PubSub, 1, 2 | 6, 6, error) => StageTransition::new(Listener, error),

        (PubSub, 3, 3, 4, error) => StageTransition::new(Waiter, error),
        (PubSub, 3, 4 | 5, 5, true) => StageTransition::new(Listener, false),

        (PubSub, 7, 7, 8, _) => StageTransition::new(Waiter, true),
        (PubSub, 9, 9, 10, _) => StageTransition::new(Waiter, true),

        _ => {
            return Err(ProtocolViolation::IllegalTransition {
                interaction,
                initial,
                last,
                incoming,
            })
        }
    };
    Ok(result)
}

/// Whether `stage` opens a transaction (consumer, publisher or broker
/// bound) rather than answering one.
#[must_use]
pub fn is_initiating(interaction: InteractionType, stage: InteractionStage) -> bool {
    match interaction {
        InteractionType::Send
        | InteractionType::Submit
        | InteractionType::Request
        | InteractionType::Invoke
        | InteractionType::Progress => stage.0 == 1,
        InteractionType::PubSub => matches!(stage.0, 1 | 3 | 5 | 7 | 9),
    }
}

/// Check that `stage` may open an interaction of this type.
pub fn check_initiating(
    interaction: InteractionType,
    stage: InteractionStage,
) -> Result<(), ProtocolViolation> {
    if is_initiating(interaction, stage) {
        Ok(())
    } else {
        Err(ProtocolViolation::NotInitiating { interaction, stage })
    }
}

/// Whether the initiator expects any reply to this opening stage.
#[must_use]
pub fn expects_reply(interaction: InteractionType, stage: InteractionStage) -> bool {
    !matches!(
        (interaction, stage.0),
        (InteractionType::Send, _) | (InteractionType::PubSub, 5)
    )
}

/// The stage a provider answers with next, given the last stage it sent
/// (`None` before any reply), if the pattern still allows a reply.
#[must_use]
pub fn next_reply_stage(
    interaction: InteractionType,
    last_sent: Option<InteractionStage>,
) -> Option<InteractionStage> {
    match (interaction, last_sent.map(|stage| stage.0)) {
        (InteractionType::Submit | InteractionType::Request, None) => Some(InteractionStage(2)),
        (InteractionType::Invoke, None) => Some(InteractionStage::INVOKE_ACK),
        (InteractionType::Invoke, Some(2)) => Some(InteractionStage::INVOKE_RESPONSE),
        (InteractionType::Progress, None) => Some(InteractionStage::PROGRESS_ACK),
        (InteractionType::Progress, Some(2 | 3)) => Some(InteractionStage::PROGRESS_RESPONSE),
        _ => None,
    }
}

/// Check a reply a provider is about to send after `last_sent` (`None`
/// before its first reply).
pub fn provider_transition(
    interaction: InteractionType,
    last_sent: Option<InteractionStage>,
    next: InteractionStage,
    is_error: bool,
) -> Result<StageTransition, ProtocolViolation> {
    let last = last_sent.unwrap_or(InteractionStage(1));
    transition(interaction, InteractionStage(1), last, next, is_error)
}

/// The stage a broker (or a non-broker endpoint refusing the request)
/// answers an initiating PUBSUB stage with. PUBLISH errors keep stage 5.
#[must_use]
pub fn pubsub_reply_stage(stage: InteractionStage) -> InteractionStage {
    match stage {
        InteractionStage::PUBLISH => InteractionStage::PUBLISH,
        other => InteractionStage(other.0.saturating_add(1)),
    }
}
