//! Domain layer: the stage table and the transaction registry.

pub mod registry;
pub mod state_machine;

pub use registry::{
    CallMode, CompletionOutcome, PendingStats, RegistrySnapshot, TransactionRegistry, WaiterResult,
};
pub use state_machine::{
    check_initiating, expects_reply, is_initiating, next_reply_stage, provider_transition,
    pubsub_reply_stage, transition, Delivery, ProtocolViolation, StageTransition,
};
