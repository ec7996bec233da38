use std::str::FromStr;

use syncrepl_csn::CookieState;
use syncrepl_present::PresentSet;
use syncrepl_types::{Csn, EntryUuid, ModList, ModOp, Modification, ReplicaDisplay, Sid, SyncreplError};

use crate::backend::{BackendError, DirectoryBackend, LocalEntry};
use crate::diff::attribute_diff;
use crate::glue::{
    add_with_glue_ancestors, delete_with_glue_cleanup, materialize_ancestors, parent_dn,
    to_syncrepl_error,
};
use crate::rules::DirectoryRules;

/// The shape of an incoming reconciliation request (spec §4.5's
/// `(state, uuid, entry, mods, csn)` tuple).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    /// Seen during refresh, unchanged since last sync: record presence only.
    Present,
    Add,
    Modify,
    Delete,
    DirSyncModify,
    DseeAdd,
}

#[derive(Debug, Clone)]
pub struct ReconcileInput {
    pub state: ReconcileState,
    pub uuid: EntryUuid,
    /// The DN the provider currently reports for this entry.
    pub dn: String,
    /// Full target attribute set, used for add and as the diff target.
    pub entry_attrs: Vec<(String, Vec<Vec<u8>>)>,
    /// Pre-built modification list (from the modification builder), used
    /// instead of diffing when non-empty.
    pub mods: ModList,
    pub csn: Csn,
    pub during_refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    NoOp,
    Added { dn: String },
    Modified { dn: String },
    Renamed { old_dn: String, new_dn: String },
    Deleted { dn: String },
    /// The incoming CSN was not fresh enough; nothing was applied.
    Discarded,
    /// `no-such-object` on add during a persist-phase refresh past
    /// refresh-done: the local state has drifted from the provider. The
    /// caller must clear the cookie and force a session restart (spec
    /// §4.5 step 4 exception).
    StateDrifted,
    // FIXME: only the first of multiple referral URIs is followed for
    // add/modify/compare, matching the original consumer -- a known
    // limitation carried forward, not fixed here.
    Referral { dn: String, uri: String },
}

#[allow(clippy::too_many_arguments)]
pub fn reconcile<B: DirectoryBackend>(
    backend: &B,
    present: &mut PresentSet,
    cookie_state: &CookieState,
    sid: Sid,
    base: &str,
    suffix: &str,
    rules: &DirectoryRules,
    replica: ReplicaDisplay,
    input: ReconcileInput,
) -> Result<ReconcileOutcome, SyncreplError> {
    if input.during_refresh {
        match input.state {
            ReconcileState::Present | ReconcileState::Add => {
                present.insert(input.uuid);
            }
            _ => {}
        }
        if input.state == ReconcileState::Present {
            return Ok(ReconcileOutcome::NoOp);
        }
    }

    let mut entry_attrs = input.entry_attrs.clone();
    if !entry_attrs.iter().any(|(a, _)| a.eq_ignore_ascii_case("entryuuid")) {
        entry_attrs.push(("entryuuid".to_string(), vec![input.uuid.to_string().into_bytes()]));
    }

    let local = backend
        .search_by_uuid(base, &input.uuid)
        .map_err(|e| to_syncrepl_error(e, replica.clone()))?;

    let token = match cookie_state.stage(sid, input.csn) {
        Ok(token) => token,
        Err(_too_old) => return Ok(ReconcileOutcome::Discarded),
    };

    if input.state == ReconcileState::Delete {
        return match delete_with_glue_cleanup(backend, &input.dn, suffix, replica.clone()) {
            Ok(()) => {
                cookie_state.commit(token);
                Ok(ReconcileOutcome::Deleted { dn: input.dn })
            }
            Err(e) => {
                cookie_state.abort(token);
                Err(e)
            }
        };
    }

    match local {
        None => dispatch_add(backend, cookie_state, token, rules, replica.clone(), &input.dn, entry_attrs, input.csn, input.during_refresh),
        Some(existing) if existing.dn.eq_ignore_ascii_case(&input.dn) => {
            dispatch_modify(backend, cookie_state, token, rules, replica.clone(), &existing, &entry_attrs, &input.mods)
        }
        Some(existing) => dispatch_rename(backend, cookie_state, token, rules, replica.clone(), &existing, &input.dn, &entry_attrs),
    }
}

/// True when `existing`'s own `entryCSN` is already at or past `incoming`
/// -- the add this entry collided with has already been applied (perhaps
/// by a previous, interrupted run), so re-applying its attributes would
/// overwrite a possibly-newer local value with stale ones (spec §4.5,
/// spec §7 "add collides with a fresher local entry").
fn existing_is_not_older(existing: &LocalEntry, incoming: Csn) -> bool {
    existing
        .attribute("entrycsn")
        .and_then(|vals| vals.first())
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|s| Csn::from_str(s).ok())
        .is_some_and(|existing_csn| existing_csn >= incoming)
}

#[allow(clippy::too_many_arguments)]
fn dispatch_add<B: DirectoryBackend>(
    backend: &B,
    cookie_state: &CookieState,
    token: syncrepl_csn::StageToken,
    rules: &DirectoryRules,
    replica: ReplicaDisplay,
    dn: &str,
    entry_attrs: Vec<(String, Vec<Vec<u8>>)>,
    incoming_csn: Csn,
    during_refresh: bool,
) -> Result<ReconcileOutcome, SyncreplError> {
    match add_with_glue_ancestors(backend, dn, entry_attrs.clone(), replica.clone()) {
        Ok(()) => {
            cookie_state.commit(token);
            Ok(ReconcileOutcome::Added { dn: dn.to_string() })
        }
        Err(SyncreplError::MissingParent { .. }) if during_refresh => {
            cookie_state.abort(token);
            Ok(ReconcileOutcome::StateDrifted)
        }
        Err(_) => match backend.search_by_dn(dn) {
            Ok(Some(existing)) if existing_is_not_older(&existing, incoming_csn) => {
                cookie_state.commit(token);
                Ok(ReconcileOutcome::NoOp)
            }
            Ok(Some(existing)) => {
                let mods = attribute_diff(&existing.attributes, &entry_attrs, rules);
                match backend.modify(dn, &mods) {
                    Ok(()) => {
                        cookie_state.commit(token);
                        Ok(ReconcileOutcome::Modified { dn: dn.to_string() })
                    }
                    Err(e) => {
                        cookie_state.abort(token);
                        Err(to_syncrepl_error(e, replica.clone()))
                    }
                }
            }
            Ok(None) => {
                cookie_state.abort(token);
                Err(SyncreplError::ApplyConflict { replica, dn: dn.to_string() })
            }
            Err(e) => {
                cookie_state.abort(token);
                Err(to_syncrepl_error(e, replica.clone()))
            }
        },
    }
}

fn dispatch_modify<B: DirectoryBackend>(
    backend: &B,
    cookie_state: &CookieState,
    token: syncrepl_csn::StageToken,
    rules: &DirectoryRules,
    replica: ReplicaDisplay,
    existing: &LocalEntry,
    target_attrs: &[(String, Vec<Vec<u8>>)],
    prebuilt_mods: &ModList,
) -> Result<ReconcileOutcome, SyncreplError> {
    let mods = if prebuilt_mods.is_empty() {
        attribute_diff(&existing.attributes, target_attrs, rules)
    } else {
        prebuilt_mods.clone()
    };
    match backend.modify(&existing.dn, &mods) {
        Ok(()) => {
            cookie_state.commit(token);
            Ok(ReconcileOutcome::Modified { dn: existing.dn.clone() })
        }
        Err(e) => {
            cookie_state.abort(token);
            Err(to_syncrepl_error(e, replica.clone()))
        }
    }
}

fn rdn_attr(rdn: &str) -> &str {
    rdn.split_once('=').map_or(rdn, |(a, _)| a.trim())
}

fn compute_rename(old_dn: &str, new_dn: &str) -> (String, bool) {
    let new_rdn = new_dn.split(',').next().unwrap_or(new_dn).to_string();
    let old_rdn = old_dn.split(',').next().unwrap_or(old_dn);
    let delete_old_rdn = !old_rdn.eq_ignore_ascii_case(&new_rdn);
    (new_rdn, delete_old_rdn)
}

fn dispatch_rename<B: DirectoryBackend>(
    backend: &B,
    cookie_state: &CookieState,
    token: syncrepl_csn::StageToken,
    rules: &DirectoryRules,
    replica: ReplicaDisplay,
    existing: &LocalEntry,
    new_dn: &str,
    target_attrs: &[(String, Vec<Vec<u8>>)],
) -> Result<ReconcileOutcome, SyncreplError> {
    let (new_rdn, delete_old_rdn) = compute_rename(&existing.dn, new_dn);
    let new_superior = parent_dn(new_dn);
    let naming_attr = rdn_attr(&new_rdn).to_string();

    let mut mods = attribute_diff(&existing.attributes, target_attrs, rules);
    // The rename itself carries the naming attribute's old/new value;
    // a diff-derived add/delete on that attribute would duplicate it.
    mods.retain(|m| !m.attribute.eq_ignore_ascii_case(&naming_attr));
    for opattr in ["entrycsn", "modifiersname", "modifytimestamp"] {
        if let Some(vals) = target_attrs.iter().find(|(a, _)| a.eq_ignore_ascii_case(opattr)) {
            let mut m = Modification::new(ModOp::Replace, opattr);
            for v in &vals.1 {
                m = m.with_value(v.clone());
            }
            mods.push(m);
        }
    }

    let result = backend.modrename(&existing.dn, &new_rdn, delete_old_rdn, new_superior.as_deref(), &mods);
    match result {
        Ok(()) => {
            cookie_state.commit(token);
            Ok(ReconcileOutcome::Renamed {
                old_dn: existing.dn.clone(),
                new_dn: new_dn.to_string(),
            })
        }
        Err(BackendError::NoSuchObject { .. }) => {
            materialize_ancestors(backend, new_dn, replica.clone())?;
            match backend.modrename(&existing.dn, &new_rdn, delete_old_rdn, new_superior.as_deref(), &mods) {
                Ok(()) => {
                    cookie_state.commit(token);
                    Ok(ReconcileOutcome::Renamed {
                        old_dn: existing.dn.clone(),
                        new_dn: new_dn.to_string(),
                    })
                }
                Err(e) => {
                    cookie_state.abort(token);
                    Err(to_syncrepl_error(e, replica.clone()))
                }
            }
        }
        Err(e) => {
            cookie_state.abort(token);
            Err(to_syncrepl_error(e, replica.clone()))
        }
    }
}
