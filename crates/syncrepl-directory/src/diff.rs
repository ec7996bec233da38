use syncrepl_types::{ModList, ModOp, Modification};

use crate::rules::DirectoryRules;

type Attrs = [(String, Vec<Vec<u8>>)];

fn find<'a>(attrs: &'a Attrs, name: &str) -> Option<&'a [Vec<u8>]> {
    attrs
        .iter()
        .find(|(a, _)| a.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_slice())
}

/// Computes the minimal modification list that turns `current` into
/// `target`. Attributes flagged by [`DirectoryRules::must_replace_wholesale`]
/// (single-valued, no equality rule, or `objectClass`) are always emitted
/// as one `replace` rather than a delete/add pair, avoiding a transient
/// invalid state where an attribute briefly has the wrong cardinality
/// (spec §4.5 edge cases).
pub fn attribute_diff(current: &Attrs, target: &Attrs, rules: &DirectoryRules) -> ModList {
    let mut out = ModList::new();

    for (attr, target_vals) in target {
        let current_vals = find(current, attr).unwrap_or(&[]);
        if rules.must_replace_wholesale(attr) {
            if !same_value_set(current_vals, target_vals) {
                let mut m = Modification::new(ModOp::Replace, attr);
                for v in target_vals {
                    m = m.with_value(v.clone());
                }
                out.push(m);
            }
            continue;
        }

        let removed: Vec<Vec<u8>> = current_vals
            .iter()
            .filter(|v| !target_vals.contains(v))
            .cloned()
            .collect();
        let added: Vec<Vec<u8>> = target_vals
            .iter()
            .filter(|v| !current_vals.contains(v))
            .cloned()
            .collect();

        if !removed.is_empty() {
            let mut m = Modification::new(ModOp::Delete, attr);
            for v in removed {
                m = m.with_value(v);
            }
            out.push(m);
        }
        if !added.is_empty() {
            let mut m = Modification::new(ModOp::Add, attr);
            for v in added {
                m = m.with_value(v);
            }
            out.push(m);
        }
    }

    for (attr, _) in current {
        if find(target, attr).is_none() {
            out.push(Modification::new(ModOp::Delete, attr));
        }
    }

    out
}

fn same_value_set(a: &[Vec<u8>], b: &[Vec<u8>]) -> bool {
    a.len() == b.len() && a.iter().all(|v| b.contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &[&[u8]])]) -> Vec<(String, Vec<Vec<u8>>)> {
        pairs
            .iter()
            .map(|(a, vs)| ((*a).to_string(), vs.iter().map(|v| v.to_vec()).collect()))
            .collect()
    }

    #[test]
    fn multivalued_attribute_diffs_into_add_and_delete() {
        let rules = DirectoryRules::default();
        let current = attrs(&[("mail", &[b"a@x.com", b"b@x.com"])]);
        let target = attrs(&[("mail", &[b"b@x.com", b"c@x.com"])]);
        let mods = attribute_diff(&current, &target, &rules);
        assert!(mods.iter().any(|m| m.operation == ModOp::Delete && m.contains_value(b"a@x.com")));
        assert!(mods.iter().any(|m| m.operation == ModOp::Add && m.contains_value(b"c@x.com")));
    }

    #[test]
    fn single_valued_attribute_uses_wholesale_replace() {
        let mut rules = DirectoryRules::default();
        rules.single_valued_attrs.insert("uid".to_string());
        let current = attrs(&[("uid", &[b"old"])]);
        let target = attrs(&[("uid", &[b"new"])]);
        let mods = attribute_diff(&current, &target, &rules);
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].operation, ModOp::Replace);
    }

    #[test]
    fn object_class_always_uses_wholesale_replace() {
        let rules = DirectoryRules::default();
        let current = attrs(&[("objectclass", &[b"top", b"person"])]);
        let target = attrs(&[("objectclass", &[b"top", b"person", b"inetorgperson"])]);
        let mods = attribute_diff(&current, &target, &rules);
        assert_eq!(mods[0].operation, ModOp::Replace);
    }

    #[test]
    fn attribute_missing_from_target_is_deleted() {
        let rules = DirectoryRules::default();
        let current = attrs(&[("description", &[b"gone"])]);
        let target: Vec<(String, Vec<Vec<u8>>)> = vec![];
        let mods = attribute_diff(&current, &target, &rules);
        assert_eq!(mods.len(), 1);
        assert!(mods[0].is_delete_all());
    }

    #[test]
    fn identical_attribute_produces_no_modification() {
        let rules = DirectoryRules::default();
        let current = attrs(&[("cn", &[b"same"])]);
        let target = attrs(&[("cn", &[b"same"])]);
        assert!(attribute_diff(&current, &target, &rules).is_empty());
    }
}
