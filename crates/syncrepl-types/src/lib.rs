//! # syncrepl-types: Core type definitions for the syncrepl consumer
//!
//! Shared types used across every stage of the replication pipeline:
//! - The cookie / CSN data model ([`Csn`], [`Sid`], [`Cookie`])
//! - Entry identity ([`EntryUuid`])
//! - The modification list used to describe pending local writes ([`ModOp`],
//!   [`Modification`], [`ModList`])
//! - Replica identity and configuration shape ([`Rid`], [`ProtocolType`],
//!   [`DataMode`], [`SearchParams`])
//! - Retry scheduling ([`RetryStep`], [`RetrySchedule`])
//! - The error taxonomy ([`SyncreplError`], [`SessionOutcome`])

mod cookie;
mod csn;
mod entry_uuid;
mod error;
mod ids;
mod modlist;
mod retry;
mod search;

pub use cookie::{Cookie, CookieParseError};
pub use csn::{Csn, CsnParseError, Sid};
pub use entry_uuid::{EntryUuid, UuidParseError};
pub use error::{SessionOutcome, SyncreplError};
pub use ids::{DataMode, LoggingState, ProtocolType, ReplicaDisplay, Rid};
pub use modlist::{ModFlags, ModList, ModOp, Modification};
pub use retry::{parse_retry_directive, RetryParseError, RetrySchedule, RetryStep};
pub use search::{Scope, SearchParams};
