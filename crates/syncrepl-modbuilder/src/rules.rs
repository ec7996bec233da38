use std::collections::HashSet;

use crate::suffix_rewrite::SuffixRewrite;

/// Per-replica policy the modification builder consults while converting
/// upstream records into a [`crate::ModList`] (spec §4.3's "Policies"
/// list). Attribute names are compared case-insensitively and are
/// expected to already be lower-cased by the caller.
#[derive(Debug, Clone, Default)]
pub struct ModBuilderRules {
    /// Attributes maintained by the backend itself (e.g. operational
    /// timestamps); modifications on these are always dropped.
    pub dynamic_attrs: HashSet<String>,
    /// User-configured exclusion list (spec §6 `exattrs`).
    pub excluded_attrs: HashSet<String>,
    /// Attributes whose schema declares SINGLE-VALUE, needed to decide
    /// the add-becomes-replace / delete-becomes-soft-delete rewrite.
    pub single_valued_attrs: HashSet<String>,
    /// Attributes with DN syntax, rewritten through `suffix_rewrite` when
    /// present.
    pub dn_syntax_attrs: HashSet<String>,
    pub suffix_rewrite: Option<SuffixRewrite>,
}

impl ModBuilderRules {
    pub fn is_dropped(&self, attr: &str) -> bool {
        self.dynamic_attrs.contains(attr) || self.excluded_attrs.contains(attr)
    }

    pub fn is_single_valued(&self, attr: &str) -> bool {
        self.single_valued_attrs.contains(attr)
    }

    pub fn is_dn_syntax(&self, attr: &str) -> bool {
        self.dn_syntax_attrs.contains(attr)
    }

    pub fn rewrite_dn_value(&self, value: &[u8]) -> Vec<u8> {
        let Some(rule) = &self.suffix_rewrite else {
            return value.to_vec();
        };
        let Ok(text) = std::str::from_utf8(value) else {
            return value.to_vec();
        };
        rule.rewrite(text).into_bytes()
    }
}
