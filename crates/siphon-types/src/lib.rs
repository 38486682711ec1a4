//! Shared record, cursor, error, and configuration model for the siphon relay.
//!
//! This crate is the dependency floor of the workspace: every other crate
//! builds on these types, so it carries no I/O of its own.

#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod record;
pub mod sink;
pub mod source;
pub mod state;
