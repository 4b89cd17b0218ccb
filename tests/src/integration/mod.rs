//! End-to-end flows over the in-process network.

pub mod interactions;
pub mod protocol;
