//! The modification list: the common output of the modification builder
//! (§4.3) and the common input to the conflict resolver (§4.4) and the
//! entry reconciler (§4.5).

use serde::{Deserialize, Serialize};

/// An LDAP-style modify operation, plus two consumer-internal variants used
/// to make an apply idempotent with respect to concurrent or replayed
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
    Increment,
    /// Delete, but it is not an error if the value is already absent.
    SoftDelete,
    /// Add, but it is not an error if the value is already present.
    SoftAdd,
}

impl ModOp {
    /// Does this operation remove all values of the attribute (as opposed
    /// to removing a specific value)?
    pub fn is_delete_all(self, values_empty: bool) -> bool {
        matches!(self, ModOp::Delete | ModOp::SoftDelete) && values_empty
    }
}

bitflags::bitflags! {
    /// Per-modification flags carried alongside the operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModFlags: u8 {
        /// Attribute is flagged dynamic (operational, provider-computed) --
        /// dropped by the modification builder rather than applied.
        const DYNAMIC = 1 << 0;
        /// Attribute was explicitly excluded by the replica's `exattrs`.
        const EXCLUDED = 1 << 1;
        /// This modification was rewritten by the conflict resolver and
        /// must not be rewritten again.
        const IDEMPOTENT = 1 << 2;
        /// Value(s) went through the replica's suffix-rewrite rule.
        const DN_REWRITTEN = 1 << 3;
    }
}

/// One modification: an operation on one attribute with its value set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    pub operation: ModOp,
    pub attribute: String,
    pub values: Vec<Vec<u8>>,
    pub normalized_values: Vec<Vec<u8>>,
    pub flags: ModFlags,
}

impl Modification {
    pub fn new(operation: ModOp, attribute: impl Into<String>) -> Self {
        Self {
            operation,
            attribute: attribute.into(),
            values: Vec::new(),
            normalized_values: Vec::new(),
            flags: ModFlags::empty(),
        }
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        let v = value.into();
        self.normalized_values.push(normalize_value(&v));
        self.values.push(v);
        self
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn is_delete_all(&self) -> bool {
        self.operation.is_delete_all(self.values.is_empty())
    }

    /// Converts a `delete`/`add` into its idempotent counterpart
    /// (`soft-delete`/`soft-add`), leaving single-valued-attribute
    /// `replace` untouched. Used by the conflict resolver's final pass
    /// (spec §4.4 step 4) and by the access-log builder's same-record
    /// collision rule (spec §4.3).
    pub fn make_idempotent(&mut self) {
        self.operation = match self.operation {
            ModOp::Delete => ModOp::SoftDelete,
            ModOp::Add => ModOp::SoftAdd,
            other => other,
        };
        self.flags |= ModFlags::IDEMPOTENT;
    }

    /// Drops `value` from this modification's value set (used by the
    /// conflict resolver's delete-X vs delete-X truth table cell). Returns
    /// true if the modification is now empty.
    pub fn remove_value(&mut self, value: &[u8]) -> bool {
        let normalized = normalize_value(value);
        if let Some(idx) = self.normalized_values.iter().position(|v| v == &normalized) {
            self.normalized_values.remove(idx);
            self.values.remove(idx);
        }
        self.values.is_empty()
    }

    pub fn contains_value(&self, value: &[u8]) -> bool {
        let normalized = normalize_value(value);
        self.normalized_values.iter().any(|v| v == &normalized)
    }
}

/// Attribute value normalization used for value-set comparisons throughout
/// the pipeline: case-fold and collapse internal whitespace, matching the
/// caseIgnoreMatch family of equality rules most directory attributes use.
pub fn normalize_value(value: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(value);
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.extend(ch.to_lowercase());
            last_was_space = false;
        }
    }
    out.into_bytes()
}

/// An ordered list of modifications, applied in order.
pub type ModList = Vec<Modification>;
