//! Relay configuration loading.
//!
//! [`parser`] turns YAML (with `${VAR}` environment substitution) into a
//! [`RelayConfig`](siphon_types::config::RelayConfig); [`validator`] checks
//! the parsed values and reports every violation at once.

pub mod parser;
pub mod validator;
