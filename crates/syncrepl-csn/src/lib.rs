//! # syncrepl-csn: CSN vector algebra and per-database cookie state
//!
//! This crate is the single place freshness decisions go through (spec
//! §4.1 design rationale): [`merge`], [`compare`], and [`check_csn_age`]
//! are pure functions over sid-sorted CSN vectors, and [`CookieState`] is
//! the mutex-guarded, refcounted state shared by every replica that writes
//! into the same local database (spec §3 "Cookie state (per database)").

mod cookie_state;
mod vector;

pub use cookie_state::{CookieState, RefreshGateError, StageToken};
pub use vector::{compare, merge, CsnAgeResult};
