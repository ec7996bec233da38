use std::collections::HashSet;

/// Schema facts the diff algorithm and rename handling need. In the real
/// system these come from the schema subsystem; here they are supplied by
/// configuration since schema registration is a surrounding concern (spec
/// §1 "out of scope").
#[derive(Debug, Clone, Default)]
pub struct DirectoryRules {
    pub single_valued_attrs: HashSet<String>,
    /// Attributes with no equality matching rule -- a diff can't tell
    /// whether two values are "the same", so it must fall back to
    /// `replace` rather than computing an add/delete pair.
    pub no_equality_rule_attrs: HashSet<String>,
}

impl DirectoryRules {
    /// Attributes the diff algorithm must emit as a single `replace`
    /// rather than a delete/add pair (spec §4.5 edge cases).
    pub fn must_replace_wholesale(&self, attr: &str) -> bool {
        attr.eq_ignore_ascii_case("objectclass")
            || self.single_valued_attrs.contains(attr)
            || self.no_equality_rule_attrs.contains(attr)
    }
}
