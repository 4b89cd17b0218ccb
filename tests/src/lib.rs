//! # MAL Exchange Test Suite
//!
//! End-to-end flows over the in-process binding.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs           # Network, endpoints, scripted provider
//! └── integration/
//!     ├── interactions.rs   # SEND / SUBMIT / REQUEST / INVOKE / PROGRESS
//!     ├── protocol.rs       # Out-of-order, duplicate and unknown stages
//!     └── pubsub.rs         # Broker registration, filtering and fan-out
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p mal-tests
//! cargo test -p mal-tests integration::pubsub::
//!
//! # Benchmarks
//! cargo bench -p mal-tests
//! ```

pub mod fixtures;
pub mod integration;
