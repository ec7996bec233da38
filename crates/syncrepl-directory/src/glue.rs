use syncrepl_types::{ReplicaDisplay, SyncreplError};

use crate::backend::{BackendError, DirectoryBackend};

/// Object class set for a synthesized ancestor: present only so a later
/// real add for that DN can succeed, not because the ancestor is a real
/// replicated entry.
const GLUE_OBJECT_CLASSES: &[&[u8]] = &[b"top", b"glue"];

fn glue_attrs(dn: &str) -> Vec<(String, Vec<Vec<u8>>)> {
    let rdn = dn.split(',').next().unwrap_or(dn);
    let (attr, value) = rdn.split_once('=').unwrap_or(("cn", rdn));
    vec![
        (
            "objectclass".to_string(),
            GLUE_OBJECT_CLASSES.iter().map(|c| c.to_vec()).collect(),
        ),
        (attr.trim().to_string(), vec![value.trim().as_bytes().to_vec()]),
    ]
}

pub fn parent_dn(dn: &str) -> Option<String> {
    dn.split_once(',').map(|(_, rest)| rest.to_string())
}

/// Adds `dn`, materializing missing ancestors as glue objects on the way
/// down and retrying once the chain exists (mirrors the original
/// "create ancestor, retry" loop for `no-such-object` on add).
pub fn add_with_glue_ancestors<B: DirectoryBackend>(
    backend: &B,
    dn: &str,
    attributes: Vec<(String, Vec<Vec<u8>>)>,
    replica: ReplicaDisplay,
) -> Result<(), SyncreplError> {
    match backend.add(dn, attributes.clone()) {
        Ok(()) => Ok(()),
        Err(BackendError::NoSuchObject { .. }) => {
            materialize_ancestors(backend, dn, replica.clone())?;
            backend.add(dn, attributes).map_err(|e| to_syncrepl_error(e, replica.clone()))
        }
        Err(e) => Err(to_syncrepl_error(e, replica.clone())),
    }
}

/// Walks upward from `dn`'s parent, adding glue entries for every missing
/// ancestor, stopping once an ancestor already exists.
pub(crate) fn materialize_ancestors<B: DirectoryBackend>(
    backend: &B,
    dn: &str,
    replica: ReplicaDisplay,
) -> Result<(), SyncreplError> {
    let mut chain = Vec::new();
    let mut current = parent_dn(dn);
    while let Some(ancestor) = current {
        if ancestor.is_empty() {
            break;
        }
        match backend.search_by_dn(&ancestor) {
            Ok(Some(_)) => break,
            Ok(None) => {
                chain.push(ancestor.clone());
                current = parent_dn(&ancestor);
            }
            Err(e) => return Err(to_syncrepl_error(e, replica.clone())),
        }
    }
    for ancestor in chain.into_iter().rev() {
        match backend.add(&ancestor, glue_attrs(&ancestor)) {
            Ok(()) | Err(BackendError::AlreadyExists { .. }) => {}
            Err(e) => return Err(to_syncrepl_error(e, replica.clone())),
        }
    }
    Ok(())
}

/// Deletes `dn`, then walks up deleting childless glue ancestors until it
/// reaches `suffix` or a non-glue (or non-empty) ancestor.
pub fn delete_with_glue_cleanup<B: DirectoryBackend>(
    backend: &B,
    dn: &str,
    suffix: &str,
    replica: ReplicaDisplay,
) -> Result<(), SyncreplError> {
    backend.delete(dn).map_err(|e| to_syncrepl_error(e, replica.clone()))?;

    let mut current = parent_dn(dn);
    while let Some(ancestor) = current {
        if ancestor.eq_ignore_ascii_case(suffix) {
            break;
        }
        let Some(entry) = backend.search_by_dn(&ancestor).map_err(|e| to_syncrepl_error(e, replica.clone()))? else {
            break;
        };
        let is_glue = entry
            .attribute("objectclass")
            .is_some_and(|vals| vals.iter().any(|v| v.eq_ignore_ascii_case(b"glue")));
        if !is_glue {
            break;
        }
        match backend.delete(&ancestor) {
            Ok(()) => current = parent_dn(&ancestor),
            Err(BackendError::NotEmpty { .. }) => break,
            Err(e) => return Err(to_syncrepl_error(e, replica.clone())),
        }
    }
    Ok(())
}

pub fn to_syncrepl_error(err: BackendError, replica: ReplicaDisplay) -> SyncreplError {
    match err {
        BackendError::NoSuchObject { dn } => SyncreplError::MissingParent { replica, dn },
        BackendError::AlreadyExists { dn }
        | BackendError::Other { dn, .. }
        | BackendError::NotEmpty { dn } => SyncreplError::ApplyConflict { replica, dn },
        BackendError::Referral { dn, .. } => SyncreplError::ApplyConflict { replica, dn },
    }
}
