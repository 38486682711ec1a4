//! Stream state persistence for the siphon relay.
//!
//! Provides the [`StateBackend`] trait with a [`FileBackend`] implementation
//! for single-host deployments and a [`PostgresBackend`] for shared
//! deployments. Model types live in [`siphon_types::state`].
//!
//! [`StateBackend`]: backend::StateBackend
//! [`FileBackend`]: file::FileBackend
//! [`PostgresBackend`]: postgres::PostgresBackend

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod file;
pub mod postgres;

pub use backend::StateBackend;
pub use error::StateError;
pub use file::FileBackend;
pub use postgres::PostgresBackend;
