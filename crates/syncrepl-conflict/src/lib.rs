//! # syncrepl-conflict: write-write conflict resolution (component D)
//!
//! Fires when delta-mode (access-log or retro-change-log) applies a
//! modification on a multi-provider database: a second provider may have
//! already committed a newer change to the same attribute before this one
//! arrives. Spec §4.4's truth table rewrites the incoming modification
//! list so it commutes with whatever committed after it, making apply
//! order irrelevant.

use std::cmp::Ordering;
use std::collections::HashSet;

use syncrepl_types::{Csn, ModList, ModOp, Modification};

/// Attributes the resolver always strips from a stale incoming change --
/// they describe the past, not a value worth re-asserting (spec §4.4 step
/// 1).
const PAST_TENSE_ATTRS: [&str; 3] = ["modifiersname", "modifytimestamp", "entrycsn"];

#[derive(Debug, Clone, Default)]
pub struct ConflictRules {
    pub single_valued_attrs: HashSet<String>,
}

impl ConflictRules {
    pub fn is_single_valued(&self, attr: &str) -> bool {
        self.single_valued_attrs.contains(attr)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// `incoming.csn == local.csn`: already committed, treat as a failed
    /// apply and let the access-log record the collision.
    AlreadyApplied,
    /// The (possibly rewritten) modification list to apply.
    Apply(ModList),
}

/// Resolves `incoming_mods` (targeting an entry whose committed CSN is
/// `local_csn`) against `newer_mods` -- modification lists from change-log
/// entries with `entryCSN >= incoming_csn` on the same DN, in commit
/// order. `current_values` loads an attribute's present values from the
/// live entry, needed to convert a delete-all into an explicit-value
/// delete (spec §4.4 step 1, step 3 rows 2 and 6).
pub fn resolve(
    incoming_csn: Csn,
    local_csn: Csn,
    incoming_mods: ModList,
    newer_mods: &[ModList],
    current_values: impl Fn(&str) -> Vec<Vec<u8>>,
    rules: &ConflictRules,
) -> ConflictOutcome {
    match incoming_csn.cmp(&local_csn) {
        Ordering::Equal => ConflictOutcome::AlreadyApplied,
        Ordering::Greater => {
            let mut mods = incoming_mods;
            apply_idempotency_pass(&mut mods, rules);
            ConflictOutcome::Apply(mods)
        }
        Ordering::Less => {
            let mut mods = split_replaces(incoming_mods);
            reconcile_against_newer(&mut mods, newer_mods, &current_values, rules);
            apply_idempotency_pass(&mut mods, rules);
            ConflictOutcome::Apply(mods)
        }
    }
}

/// Step 1: drop past-tense attributes, and split every `replace` into a
/// `delete` of the current value set followed by an `add` of the new
/// values (a `replace` with no values becomes a plain `delete`).
fn split_replaces(mods: ModList) -> ModList {
    let mut out = ModList::new();
    for m in mods {
        if PAST_TENSE_ATTRS.contains(&m.attribute.to_ascii_lowercase().as_str()) {
            continue;
        }
        if m.operation != ModOp::Replace {
            out.push(m);
            continue;
        }
        if m.values.is_empty() {
            out.push(Modification::new(ModOp::Delete, &m.attribute));
        } else {
            out.push(Modification::new(ModOp::Delete, &m.attribute));
            let mut add = Modification::new(ModOp::Add, &m.attribute);
            for v in &m.values {
                add = add.with_value(v.clone());
            }
            out.push(add);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    DeleteAll,
    DeleteSpecific,
    AddSpecific,
    Other,
}

fn shape_of(m: &Modification) -> Shape {
    match m.operation {
        ModOp::Replace => Shape::DeleteAll, // footnote: replace suppresses like delete-all
        ModOp::Delete | ModOp::SoftDelete if m.values.is_empty() => Shape::DeleteAll,
        ModOp::Delete | ModOp::SoftDelete => Shape::DeleteSpecific,
        ModOp::Add | ModOp::SoftAdd => Shape::AddSpecific,
        ModOp::Increment => Shape::Other,
    }
}

enum Action {
    Keep,
    Drop,
    RemoveValues,
    ReplaceWithExplicit,
}

fn action_for(m1_shape: Shape, m2_shape: Shape, attr_single_valued: bool) -> Action {
    use Shape::{AddSpecific, DeleteAll, DeleteSpecific, Other};
    match (m1_shape, m2_shape) {
        (_, Other) => Action::Keep,
        // m2 is an add on a single-valued attribute: the attribute can only
        // hold one value, so the later add wins outright regardless of what
        // m1 was trying to do to it or whether the values happen to agree.
        (DeleteAll | DeleteSpecific | AddSpecific, AddSpecific) if attr_single_valued => {
            Action::Drop
        }
        (DeleteAll, DeleteAll) => Action::Drop,
        (DeleteAll, DeleteSpecific | AddSpecific) => Action::ReplaceWithExplicit,
        (DeleteSpecific | AddSpecific, DeleteAll) => Action::Drop,
        (DeleteSpecific | AddSpecific, DeleteSpecific | AddSpecific) => Action::RemoveValues,
        (Other, _) => Action::Keep,
    }
}

/// Step 3: for each surviving incoming modification, walks every
/// same-attribute modification in `newer_mods` (in commit order) and
/// applies the truth table. Mutates `mods` in place, dropping entries the
/// table eliminates.
fn reconcile_against_newer(
    mods: &mut ModList,
    newer_mods: &[ModList],
    current_values: &impl Fn(&str) -> Vec<Vec<u8>>,
    rules: &ConflictRules,
) {
    let mut survivors = Vec::with_capacity(mods.len());
    'outer: for mut m1 in mods.drain(..) {
        let m1_attr = m1.attribute.clone();
        for newer in newer_mods {
            for m2 in newer {
                if !m2.attribute.eq_ignore_ascii_case(&m1_attr) {
                    continue;
                }
                let m1_shape = shape_of(&m1);
                let m2_shape = shape_of(m2);
                let single_valued = rules.is_single_valued(&m1_attr);
                match action_for(m1_shape, m2_shape, single_valued) {
                    Action::Keep => {}
                    Action::Drop => continue 'outer,
                    Action::RemoveValues => {
                        for v in &m2.values {
                            m1.remove_value(v);
                        }
                        if m1.values.is_empty() {
                            continue 'outer;
                        }
                    }
                    Action::ReplaceWithExplicit => {
                        let mut explicit = current_values(&m1_attr);
                        for v in &m2.values {
                            explicit.retain(|cur| cur != v);
                        }
                        if explicit.is_empty() {
                            continue 'outer;
                        }
                        let mut rebuilt = Modification::new(ModOp::Delete, &m1_attr);
                        for v in explicit {
                            rebuilt = rebuilt.with_value(v);
                        }
                        m1 = rebuilt;
                    }
                }
            }
        }
        survivors.push(m1);
    }
    *mods = survivors;
}

/// Step 4: every surviving `delete` becomes `soft-delete`; every `add` on
/// a single-valued attribute becomes `replace` (a plain `make_idempotent`
/// would instead produce `soft-add`, which is wrong for attributes that
/// can only ever hold one value).
fn apply_idempotency_pass(mods: &mut ModList, rules: &ConflictRules) {
    for m in mods.iter_mut() {
        if m.operation == ModOp::Add && rules.is_single_valued(&m.attribute) {
            m.operation = ModOp::Replace;
        } else {
            m.make_idempotent();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncrepl_types::Sid;
    use test_case::test_case;

    fn csn(counter: u32) -> Csn {
        Csn::new("20240101000000.000000", counter, Sid::new(1), 0).unwrap()
    }

    fn rules() -> ConflictRules {
        ConflictRules::default()
    }

    fn no_current(_attr: &str) -> Vec<Vec<u8>> {
        Vec::new()
    }

    #[test]
    fn equal_csn_is_already_applied() {
        let outcome = resolve(csn(5), csn(5), vec![], &[], no_current, &rules());
        assert_eq!(outcome, ConflictOutcome::AlreadyApplied);
    }

    #[test]
    fn newer_csn_only_runs_idempotency_pass() {
        let mods = vec![Modification::new(ModOp::Delete, "cn").with_value(b"x".to_vec())];
        let outcome = resolve(csn(9), csn(5), mods, &[], no_current, &rules());
        match outcome {
            ConflictOutcome::Apply(mods) => assert_eq!(mods[0].operation, ModOp::SoftDelete),
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test_case(ModOp::Delete, &[], ModOp::Delete, &[] ; "delete-all vs delete-all drops")]
    fn older_delete_all_vs_delete_all_drops(
        m1_op: ModOp,
        m1_vals: &[&[u8]],
        m2_op: ModOp,
        m2_vals: &[&[u8]],
    ) {
        let mut m1 = Modification::new(m1_op, "cn");
        for v in m1_vals {
            m1 = m1.with_value(v.to_vec());
        }
        let mut m2 = Modification::new(m2_op, "cn");
        for v in m2_vals {
            m2 = m2.with_value(v.to_vec());
        }
        let outcome = resolve(csn(1), csn(9), vec![m1], &[vec![m2]], no_current, &rules());
        match outcome {
            ConflictOutcome::Apply(mods) => assert!(mods.is_empty()),
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn delete_all_vs_delete_specific_converts_to_explicit_delete() {
        let m1 = Modification::new(ModOp::Delete, "cn");
        let m2 = Modification::new(ModOp::Delete, "cn").with_value(b"bob".to_vec());
        let current = |_: &str| vec![b"alice".to_vec(), b"bob".to_vec()];
        let outcome = resolve(csn(1), csn(9), vec![m1], &[vec![m2]], current, &rules());
        match outcome {
            ConflictOutcome::Apply(mods) => {
                assert_eq!(mods.len(), 1);
                assert!(mods[0].contains_value(b"alice"));
            }
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn delete_specific_vs_delete_specific_removes_overlap_only() {
        let m1 = Modification::new(ModOp::Delete, "cn")
            .with_value(b"alice".to_vec())
            .with_value(b"bob".to_vec());
        let m2 = Modification::new(ModOp::Delete, "cn").with_value(b"bob".to_vec());
        let outcome = resolve(csn(1), csn(9), vec![m1], &[vec![m2]], no_current, &rules());
        match outcome {
            ConflictOutcome::Apply(mods) => {
                assert_eq!(mods.len(), 1);
                assert!(mods[0].contains_value(b"alice"));
                assert!(!mods[0].contains_value(b"bob"));
            }
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn delete_specific_vs_delete_distinct_values_is_kept_unchanged() {
        let m1 = Modification::new(ModOp::Delete, "cn").with_value(b"alice".to_vec());
        let m2 = Modification::new(ModOp::Delete, "cn").with_value(b"carol".to_vec());
        let outcome = resolve(csn(1), csn(9), vec![m1], &[vec![m2]], no_current, &rules());
        match outcome {
            ConflictOutcome::Apply(mods) => {
                assert_eq!(mods.len(), 1);
                assert!(mods[0].contains_value(b"alice"));
            }
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn add_x_vs_add_x_drops() {
        let m1 = Modification::new(ModOp::Add, "cn").with_value(b"alice".to_vec());
        let m2 = Modification::new(ModOp::Add, "cn").with_value(b"alice".to_vec());
        let outcome = resolve(csn(1), csn(9), vec![m1], &[vec![m2]], no_current, &rules());
        match outcome {
            ConflictOutcome::Apply(mods) => assert!(mods.is_empty()),
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn add_x_vs_add_y_on_single_valued_attribute_drops() {
        let mut r = rules();
        r.single_valued_attrs.insert("uid".to_string());
        let m1 = Modification::new(ModOp::Add, "uid").with_value(b"x".to_vec());
        let m2 = Modification::new(ModOp::Add, "uid").with_value(b"y".to_vec());
        let outcome = resolve(csn(1), csn(9), vec![m1], &[vec![m2]], no_current, &r);
        match outcome {
            ConflictOutcome::Apply(mods) => assert!(mods.is_empty()),
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn delete_all_vs_add_on_single_valued_attribute_drops() {
        let mut r = rules();
        r.single_valued_attrs.insert("uid".to_string());
        let m1 = Modification::new(ModOp::Delete, "uid");
        let m2 = Modification::new(ModOp::Add, "uid").with_value(b"y".to_vec());
        let outcome = resolve(csn(1), csn(9), vec![m1], &[vec![m2]], no_current, &r);
        match outcome {
            ConflictOutcome::Apply(mods) => assert!(mods.is_empty()),
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn delete_specific_vs_add_on_single_valued_attribute_drops() {
        let mut r = rules();
        r.single_valued_attrs.insert("uid".to_string());
        let m1 = Modification::new(ModOp::Delete, "uid").with_value(b"x".to_vec());
        let m2 = Modification::new(ModOp::Add, "uid").with_value(b"y".to_vec());
        let outcome = resolve(csn(1), csn(9), vec![m1], &[vec![m2]], no_current, &r);
        match outcome {
            ConflictOutcome::Apply(mods) => assert!(mods.is_empty()),
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn add_x_vs_add_y_on_multivalued_attribute_is_kept() {
        let m1 = Modification::new(ModOp::Add, "cn").with_value(b"x".to_vec());
        let m2 = Modification::new(ModOp::Add, "cn").with_value(b"y".to_vec());
        let outcome = resolve(csn(1), csn(9), vec![m1], &[vec![m2]], no_current, &rules());
        match outcome {
            ConflictOutcome::Apply(mods) => assert_eq!(mods.len(), 1),
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn replace_newer_mod_suppresses_like_delete_all() {
        let m1 = Modification::new(ModOp::Add, "cn").with_value(b"x".to_vec());
        let m2 = Modification::new(ModOp::Replace, "cn").with_value(b"z".to_vec());
        let current = |_: &str| vec![b"z".to_vec()];
        let outcome = resolve(csn(1), csn(9), vec![m1], &[vec![m2]], current, &rules());
        match outcome {
            ConflictOutcome::Apply(mods) => assert!(mods.is_empty()),
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn step1_drops_past_tense_attributes_and_splits_replace() {
        let mods = vec![
            Modification::new(ModOp::Replace, "modifiersname").with_value(b"x".to_vec()),
            Modification::new(ModOp::Replace, "cn").with_value(b"alice".to_vec()),
        ];
        let outcome = resolve(csn(1), csn(9), mods, &[], no_current, &rules());
        match outcome {
            ConflictOutcome::Apply(mods) => {
                assert!(mods.iter().all(|m| m.attribute != "modifiersname"));
                assert!(mods.iter().any(|m| m.operation == ModOp::SoftDelete && m.attribute == "cn"));
                assert!(mods.iter().any(|m| m.operation == ModOp::SoftAdd && m.attribute == "cn"));
            }
            other => panic!("expected Apply, got {other:?}"),
        }
    }
}
