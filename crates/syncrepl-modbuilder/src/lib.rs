//! # syncrepl-modbuilder: modification builder (component C)
//!
//! Converts the two upstream record shapes -- access-log entries and
//! retro-change-log entries -- plus raw sync entries and DirSync records,
//! into the internal [`ModList`] representation consumed by the conflict
//! resolver and entry reconciler (spec §4.3).

mod access_log;
mod dirsync;
mod raw_entry;
mod retro_change_log;
mod rules;
mod suffix_rewrite;

pub use access_log::{parse_access_log_mods, AccessLogParseError};
pub use dirsync::{build_mods_from_dirsync, DirSyncAttribute, DirSyncOutcome, DirSyncRecord};
pub use raw_entry::{build_mods_from_raw_entry, RawSyncEntry};
pub use retro_change_log::{build_mods_from_retro, RetroChangeLogRecord, RetroModOp};
pub use rules::ModBuilderRules;
pub use suffix_rewrite::SuffixRewrite;
