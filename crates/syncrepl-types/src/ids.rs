//! Replica identity and the small enums that describe a replica's wire
//! dialect.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Replica id, 0..=999 (spec §6 `rid` directive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid(u16);

impl Rid {
    pub const MAX: u16 = 999;

    pub fn new(value: u16) -> Self {
        assert!(value <= Self::MAX, "rid {value} out of range 0..=999");
        Self(value)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// Human-readable replica identity used in log lines and monitor entries
/// (spec §7: "failures surface as log lines tagged with the replica
/// display id").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDisplay(String);

impl ReplicaDisplay {
    pub fn new(rid: Rid, provider: &str) -> Self {
        Self(format!("rid={rid} provider={provider}"))
    }
}

impl fmt::Display for ReplicaDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The sync protocol variant a replica speaks (spec §6 `type` directive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolType {
    RefreshOnly,
    RefreshAndPersist,
    DirSync,
}

/// The data-mode branch (spec §4.3 / §9 "Polymorphism"): which message
/// format the replica consumes and how cookies are encoded for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataMode {
    Default,
    AccessLog,
    ChangeLog,
}

/// Whether a delta-mode replica is reading live log entries or has fallen
/// back to a full content-sync refresh because its high-water mark fell
/// outside the provider's advertised range (spec §4.6 "searching").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoggingState {
    Logging,
    Fallback,
}
