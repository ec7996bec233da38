use syncrepl_types::{ModFlags, ModList, ModOp, Modification};

use crate::rules::ModBuilderRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessLogParseError {
    #[error("reqMod line has no ':' separator")]
    Malformed,
    #[error("unrecognized op-char '{0}'")]
    UnknownOp(char),
}

fn op_from_char(c: char) -> Result<ModOp, AccessLogParseError> {
    match c {
        '+' => Ok(ModOp::Add),
        '-' => Ok(ModOp::Delete),
        '=' => Ok(ModOp::Replace),
        '#' => Ok(ModOp::Increment),
        other => Err(AccessLogParseError::UnknownOp(other)),
    }
}

fn op_to_char(op: ModOp) -> char {
    match op {
        ModOp::Add | ModOp::SoftAdd => '+',
        ModOp::Delete | ModOp::SoftDelete => '-',
        ModOp::Replace => '=',
        ModOp::Increment => '#',
    }
}

/// Serializes a single modification back to `reqMod` lines, the inverse of
/// [`parse_access_log_mods`] used by the access-log round-trip test (spec
/// §8 "parse -> serialize -> parse"). Each value of a multi-valued
/// modification repeats the attribute name and op-char -- that repetition,
/// not a blank-line continuation, is what [`parse_access_log_mods`] now
/// merges back into one modification.
pub fn serialize_access_log_mods(mods: &ModList) -> Vec<String> {
    let mut lines = Vec::new();
    for m in mods {
        let op = op_to_char(m.operation);
        if m.values.is_empty() {
            lines.push(format!("{}:{op}", m.attribute));
            continue;
        }
        for value in &m.values {
            let value = String::from_utf8_lossy(value);
            lines.push(format!("{}:{op} {value}", m.attribute));
        }
    }
    lines
}

/// Parses the `reqMod` lines of one access-log record into a [`ModList`],
/// applying the replica's dynamic/excluded/single-valued/suffix-rewrite
/// policies (spec §4.3).
///
/// A blank attribute name carries no value and closes out whatever
/// modification came before it -- it is a separator, not a continuation.
/// A multi-valued add spanning several `reqMod` values is instead encoded
/// by simply repeating the same attribute name and op-char on consecutive
/// lines; those merge into one modification. Repeating the same (attr, op)
/// across a blank-line separator does *not* merge -- the blank forces the
/// next occurrence to start a fresh modification.
pub fn parse_access_log_mods(
    lines: &[String],
    rules: &ModBuilderRules,
) -> Result<ModList, AccessLogParseError> {
    let mut out: ModList = Vec::new();
    let mut forget_last = false;

    for line in lines {
        let (attr_part, rest) = line.split_once(':').ok_or(AccessLogParseError::Malformed)?;

        if attr_part.is_empty() {
            forget_last = true;
            continue;
        }

        let mut chars = rest.chars();
        let op_char = chars.next().ok_or(AccessLogParseError::Malformed)?;
        let mut op = op_from_char(op_char)?;
        let value = chars.as_str().strip_prefix(' ').unwrap_or(chars.as_str());
        let attr = attr_part.to_string();

        if rules.is_dropped(&attr) {
            continue;
        }

        let mut flags = ModFlags::empty();
        if rules.is_single_valued(&attr) {
            match op {
                ModOp::Add => op = ModOp::Replace,
                ModOp::Delete => flags |= ModFlags::IDEMPOTENT,
                _ => {}
            }
        }
        let soft_delete = flags.contains(ModFlags::IDEMPOTENT) && op == ModOp::Delete;
        if soft_delete {
            op = ModOp::SoftDelete;
        }

        let value_bytes = if rules.is_dn_syntax(&attr) {
            flags |= ModFlags::DN_REWRITTEN;
            rules.rewrite_dn_value(value.as_bytes())
        } else {
            value.as_bytes().to_vec()
        };

        let continues_last = !forget_last
            && out
                .last()
                .is_some_and(|m: &Modification| m.attribute == attr && m.operation == op);
        forget_last = false;

        if continues_last && !value.is_empty() {
            let last = out.pop().expect("checked above");
            out.push(last.with_value(value_bytes));
        } else {
            let mut m = Modification::new(op, &attr);
            m.flags |= flags;
            if !value.is_empty() {
                m = m.with_value(value_bytes);
            }
            out.push(m);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn repeated_attr_and_op_accumulates_values() {
        let rules = ModBuilderRules::default();
        let mods =
            parse_access_log_mods(&lines(&["description:+ one", "description:+ two"]), &rules)
                .unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].attribute, "description");
        assert_eq!(mods[0].operation, ModOp::Add);
        assert_eq!(mods[0].values, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn blank_line_is_a_no_op_separator() {
        let rules = ModBuilderRules::default();
        let mods = parse_access_log_mods(&lines(&[":+ orphan"]), &rules).unwrap();
        assert!(mods.is_empty());
    }

    #[test]
    fn blank_line_between_repeats_forces_a_new_modification() {
        let rules = ModBuilderRules::default();
        let mods = parse_access_log_mods(
            &lines(&["description:+ one", ":+ ignored", "description:+ two"]),
            &rules,
        )
        .unwrap();
        assert_eq!(mods.len(), 2);
        assert_eq!(mods[0].values, vec![b"one".to_vec()]);
        assert_eq!(mods[1].values, vec![b"two".to_vec()]);
    }

    #[test]
    fn dynamic_attribute_is_dropped() {
        let mut rules = ModBuilderRules::default();
        rules.dynamic_attrs.insert("entrycsn".to_string());
        let mods = parse_access_log_mods(&lines(&["entrycsn:= 123"]), &rules).unwrap();
        assert!(mods.is_empty());
    }

    #[test]
    fn single_valued_add_becomes_replace_and_delete_becomes_soft() {
        let mut rules = ModBuilderRules::default();
        rules.single_valued_attrs.insert("uid".to_string());
        let mods =
            parse_access_log_mods(&lines(&["uid:+ alice", "uid:- alice"]), &rules).unwrap();
        assert_eq!(mods[0].operation, ModOp::Replace);
        assert_eq!(mods[1].operation, ModOp::SoftDelete);
    }

    #[test]
    fn dn_syntax_attribute_goes_through_suffix_rewrite() {
        let mut rules = ModBuilderRules::default();
        rules.dn_syntax_attrs.insert("manager".to_string());
        rules.suffix_rewrite = Some(crate::SuffixRewrite::new(
            "dc=old,dc=example",
            "dc=new,dc=example",
        ));
        let mods =
            parse_access_log_mods(&lines(&["manager:= cn=boss,dc=old,dc=example"]), &rules)
                .unwrap();
        assert_eq!(mods[0].values[0], b"cn=boss,dc=new,dc=example".to_vec());
        assert!(mods[0].flags.contains(ModFlags::DN_REWRITTEN));
    }

    #[test]
    fn round_trip_parse_serialize_parse() {
        let rules = ModBuilderRules::default();
        let original = lines(&["cn:= Alice", "description:+ one", "description:+ two"]);
        let mods = parse_access_log_mods(&original, &rules).unwrap();
        let serialized = serialize_access_log_mods(&mods);
        let reparsed = parse_access_log_mods(&serialized, &rules).unwrap();
        assert_eq!(mods, reparsed);
    }

    #[test]
    fn delete_all_has_no_value_line() {
        let rules = ModBuilderRules::default();
        let mods = parse_access_log_mods(&lines(&["cn:-"]), &rules).unwrap();
        assert!(mods[0].is_delete_all());
        assert_eq!(serialize_access_log_mods(&mods), vec!["cn:-".to_string()]);
    }
}
