use syncrepl_types::{EntryUuid, ModList, ModOp, Modification, UuidParseError};

use crate::rules::ModBuilderRules;

/// The retro-change-log's own operation tag, distinct from [`ModOp`]: a
/// retro-change-log record describes the operation applied to the *entry*
/// (add/modify/moddn/delete), not a single attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetroModOp {
    Add,
    Modify,
    ModRdn,
    Delete,
}

/// A self-describing retro-change-log entry (spec §4.3 "Retro-change-log
/// record").
#[derive(Debug, Clone)]
pub struct RetroChangeLogRecord {
    pub target_dn: String,
    pub op: RetroModOp,
    /// Per-modification `(attr, op-char, values)` triples, present when
    /// `op` is `Modify`.
    pub changes: Vec<(String, char, Vec<Vec<u8>>)>,
    pub new_rdn: Option<String>,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
    /// The provider's `nsUniqueId`, 32 hex digits in 8-8-8-8 grouping.
    pub target_unique_id: String,
    pub change_number: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RetroParseError {
    #[error("unrecognized mod op-char '{0}'")]
    UnknownOp(char),
    #[error("bad nsUniqueId: {0}")]
    BadUniqueId(#[from] UuidParseError),
}

/// Converts one retro-change-log record into `(target_dn, mods)`, with a
/// synthesized `entryUUID` modification derived from `target_unique_id`
/// (spec §4.3).
pub fn build_mods_from_retro(
    record: &RetroChangeLogRecord,
    rules: &ModBuilderRules,
) -> Result<(String, ModList), RetroParseError> {
    let mut out = ModList::new();

    let uuid = EntryUuid::from_ns_unique_id(&record.target_unique_id)?;
    out.push(Modification::new(ModOp::Replace, "entryuuid").with_value(uuid.to_string()));

    match record.op {
        RetroModOp::Add | RetroModOp::Delete | RetroModOp::ModRdn => {
            // entry-level operations carry no per-attribute modifications
            // here; the reconciler dispatches on `record.op` directly.
        }
        RetroModOp::Modify => {
            for (attr, op_char, values) in &record.changes {
                if rules.is_dropped(attr) {
                    continue;
                }
                let op = match op_char {
                    '+' => ModOp::Add,
                    '-' => ModOp::Delete,
                    '=' => ModOp::Replace,
                    '#' => ModOp::Increment,
                    other => return Err(RetroParseError::UnknownOp(*other)),
                };
                let mut m = Modification::new(op, attr);
                for v in values {
                    let value = if rules.is_dn_syntax(attr) {
                        rules.rewrite_dn_value(v)
                    } else {
                        v.clone()
                    };
                    m = m.with_value(value);
                }
                out.push(m);
            }
        }
    }

    let dn = match &rules.suffix_rewrite {
        Some(rule) => rule.rewrite(&record.target_dn),
        None => record.target_dn.clone(),
    };

    Ok((dn, out))
}
