//! # syncrepl-session: per-replica session state machine (component F)
//!
//! Drives one replica's bind/search/dispatch/persist cycle against a
//! [`Transport`] it knows nothing about beyond the trait in this crate,
//! applying every change it reads through
//! [`syncrepl_directory::reconcile`] (spec §4.6).

mod machine;
mod state;
mod transport;

pub use machine::SessionMachine;
pub use state::{ReplicaState, SessionState};
pub use transport::{
    AccessLogChangeType, BindOutcome, IntermediateMessage, MessageId, RequestMode, SearchRequest,
    SearchResultOutcome, SyncEntryState, SyncMessage, Transport,
};
