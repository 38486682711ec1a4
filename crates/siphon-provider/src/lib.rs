//! Provider-side half of the siphon relay.
//!
//! [`ProviderClient`] handles credential exchange, token caching, and
//! retried HTTP calls. [`StreamFetcher`] implements the windowed fetch
//! contract on top of it, with both the discovery fan-out and the legacy
//! direct query strategy.

#![warn(clippy::pedantic)]

pub mod client;
pub mod discovery;
pub mod fetch;
pub mod token;

pub use client::ProviderClient;
pub use fetch::StreamFetcher;
pub use token::CredentialCache;
