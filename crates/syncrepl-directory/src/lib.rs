//! # syncrepl-directory: entry reconciler (component E)
//!
//! Given an incoming `(state, uuid, entry, mods, csn)` tuple, searches the
//! local database by UUID and decides add vs modify vs rename vs delete,
//! materializing missing "glue" ancestors along the way (spec §4.5).

mod backend;
mod diff;
mod glue;
mod reconcile;
mod rules;

pub use backend::{BackendError, DirectoryBackend, LocalEntry};
pub use diff::attribute_diff;
pub use glue::{delete_with_glue_cleanup, parent_dn, to_syncrepl_error};
pub use reconcile::{reconcile, ReconcileInput, ReconcileOutcome, ReconcileState};
pub use rules::DirectoryRules;
