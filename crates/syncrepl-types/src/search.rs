//! Search parameters for a replica's initial (and re-)content-sync search
//! (spec §3 "Replica state" / §6 config keys `searchbase`, `scope`,
//! `filter`, `attrs`, `exattrs`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
    Children,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub base: String,
    pub scope: Scope,
    pub filter: String,
    /// Explicitly requested attributes. Empty when `all_user_attrs` covers it.
    pub attrs: Vec<String>,
    pub exattrs: Vec<String>,
    /// `attrs=*`
    pub all_user_attrs: bool,
    /// `attrs=+`
    pub all_op_attrs: bool,
    pub size_limit: Option<u32>,
    pub time_limit: Option<u32>,
}

impl SearchParams {
    pub fn is_excluded(&self, attribute: &str) -> bool {
        self.exattrs
            .iter()
            .any(|a| a.eq_ignore_ascii_case(attribute))
    }

    pub fn wants_attribute(&self, attribute: &str) -> bool {
        if self.is_excluded(attribute) {
            return false;
        }
        self.all_user_attrs
            || self
                .attrs
                .iter()
                .any(|a| a.eq_ignore_ascii_case(attribute))
    }
}
