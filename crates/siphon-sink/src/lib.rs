//! Sink-side half of the siphon relay.
//!
//! [`FanoutForwarder`] implements the delivery contract: records are wrapped
//! in routing envelopes, chunked, and every chunk is replicated to every
//! configured [`endpoint::HttpEndpoint`]. Endpoint results are tracked
//! independently so one endpoint's failure never masks another's outcome.

#![warn(clippy::pedantic)]

pub mod endpoint;
pub mod forwarder;

pub use endpoint::HttpEndpoint;
pub use forwarder::FanoutForwarder;
