use syncrepl_types::{ModList, ModOp, Modification};

use crate::rules::ModBuilderRules;

/// One attribute as carried on a DirSync record: a value set plus the
/// vendor's "range" tagging that marks whether the values listed are
/// additions or removals relative to what the consumer already has (spec
/// §4.3 "DirSync record").
#[derive(Debug, Clone)]
pub struct DirSyncAttribute {
    pub name: String,
    /// `range=1-1`: these values were added.
    pub range_add: bool,
    /// `range=0-0`: these values were removed.
    pub range_delete: bool,
    pub values: Vec<Vec<u8>>,
}

/// A vendor DirSync record (spec §4.3).
#[derive(Debug, Clone)]
pub struct DirSyncRecord {
    pub dn: String,
    pub attributes: Vec<DirSyncAttribute>,
    /// Synthetic `isDeleted` attribute was present.
    pub is_deleted: bool,
    /// Synthetic `whenCreated` attribute was present.
    pub when_created: bool,
}

/// What a DirSync record's entry-level outcome implies for the
/// reconciler, independent of the per-attribute modifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirSyncOutcome {
    Add,
    Modify,
    Delete,
}

/// Converts a DirSync record into `(mods, outcome)`. Every attribute maps
/// to `replace` unless range-tagged, in which case it becomes
/// `soft-add`/`soft-delete` so repeated delivery of the same incremental
/// cookie page cannot double-apply (spec §4.3, §4.1 cookie-replay
/// tolerance).
pub fn build_mods_from_dirsync(
    record: &DirSyncRecord,
    rules: &ModBuilderRules,
) -> (ModList, DirSyncOutcome) {
    let outcome = if record.is_deleted {
        DirSyncOutcome::Delete
    } else if record.when_created {
        DirSyncOutcome::Add
    } else {
        DirSyncOutcome::Modify
    };

    let mut out = ModList::new();
    if outcome == DirSyncOutcome::Delete {
        return (out, outcome);
    }

    for attr in &record.attributes {
        if rules.is_dropped(&attr.name) {
            continue;
        }
        let op = match (attr.range_add, attr.range_delete) {
            (true, false) => ModOp::SoftAdd,
            (false, true) => ModOp::SoftDelete,
            _ => ModOp::Replace,
        };
        let mut m = Modification::new(op, &attr.name);
        for v in &attr.values {
            let value = if rules.is_dn_syntax(&attr.name) {
                rules.rewrite_dn_value(v)
            } else {
                v.clone()
            };
            m = m.with_value(value);
        }
        out.push(m);
    }
    (out, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(name: &str, add: bool, del: bool, values: &[&[u8]]) -> DirSyncAttribute {
        DirSyncAttribute {
            name: name.to_string(),
            range_add: add,
            range_delete: del,
            values: values.iter().map(|v| v.to_vec()).collect(),
        }
    }

    #[test]
    fn is_deleted_marker_wins_over_attributes() {
        let rules = ModBuilderRules::default();
        let rec = DirSyncRecord {
            dn: "uid=alice,dc=example,dc=com".to_string(),
            attributes: vec![attr("cn", false, false, &[b"Alice"])],
            is_deleted: true,
            when_created: false,
        };
        let (mods, outcome) = build_mods_from_dirsync(&rec, &rules);
        assert_eq!(outcome, DirSyncOutcome::Delete);
        assert!(mods.is_empty());
    }

    #[test]
    fn when_created_implies_add_outcome() {
        let rules = ModBuilderRules::default();
        let rec = DirSyncRecord {
            dn: "uid=alice,dc=example,dc=com".to_string(),
            attributes: vec![attr("cn", false, false, &[b"Alice"])],
            is_deleted: false,
            when_created: true,
        };
        let (_, outcome) = build_mods_from_dirsync(&rec, &rules);
        assert_eq!(outcome, DirSyncOutcome::Add);
    }

    #[test]
    fn range_tags_map_to_soft_ops() {
        let rules = ModBuilderRules::default();
        let rec = DirSyncRecord {
            dn: "uid=alice,dc=example,dc=com".to_string(),
            attributes: vec![
                attr("memberof", true, false, &[b"cn=admins,dc=example,dc=com"]),
                attr("memberof", false, true, &[b"cn=users,dc=example,dc=com"]),
            ],
            is_deleted: false,
            when_created: false,
        };
        let (mods, outcome) = build_mods_from_dirsync(&rec, &rules);
        assert_eq!(outcome, DirSyncOutcome::Modify);
        assert_eq!(mods[0].operation, ModOp::SoftAdd);
        assert_eq!(mods[1].operation, ModOp::SoftDelete);
    }

    #[test]
    fn untagged_attribute_is_a_plain_replace() {
        let rules = ModBuilderRules::default();
        let rec = DirSyncRecord {
            dn: "uid=alice,dc=example,dc=com".to_string(),
            attributes: vec![attr("cn", false, false, &[b"Alice"])],
            is_deleted: false,
            when_created: false,
        };
        let (mods, _) = build_mods_from_dirsync(&rec, &rules);
        assert_eq!(mods[0].operation, ModOp::Replace);
    }
}
