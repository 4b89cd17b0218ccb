//! Adapters: concrete bindings for the outbound ports.

pub mod in_process;

pub use in_process::{InProcessNetwork, InProcessTransport};
