//! Forward cycle engine for the siphon relay.
//!
//! Orchestrates one fetch-dedup-forward pass per stream: loads the cursor,
//! fetches the next window through a [`SourceFetcher`], drops duplicates,
//! hands survivors to a [`SinkForwarder`], and persists the advanced cursor
//! exactly once per cycle.
//!
//! [`SourceFetcher`]: siphon_types::source::SourceFetcher
//! [`SinkForwarder`]: siphon_types::sink::SinkForwarder

#![warn(clippy::pedantic)]

pub mod config;
pub mod cycle;
pub mod dedup;
pub mod errors;
pub mod gaps;
pub mod resolve;
pub mod result;
pub mod store;

pub use cycle::ForwardCycle;
pub use dedup::DuplicateFilter;
pub use errors::CycleError;
pub use resolve::create_state_backend;
pub use result::{CycleOutcome, CycleResult};
pub use store::StateStore;
