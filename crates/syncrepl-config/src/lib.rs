//! # syncrepl-config: replica directive parsing (ambient, spec §6)
//!
//! Parses the one-directive-per-replica configuration line grammar:
//! required keys (`rid`, `provider`, `searchbase`), duplicate-key
//! rejection, and the full recognized-key table, with anything
//! unrecognized passed through for the transport layer (bind/TLS/auth
//! options).

mod directive;
mod error;

pub use directive::{parse_config, parse_directive, parse_interval, ReplicaDirective};
pub use error::ConfigError;
