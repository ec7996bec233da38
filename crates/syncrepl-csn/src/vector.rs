//! Pure CSN vector operations: merge, compare, and the freshness check
//! every incoming message passes through before it is allowed to reach the
//! entry reconciler (spec §4.1).

use syncrepl_types::{Cookie, Csn, Sid};

/// Merges `remote` into `local`.
///
/// For sids present in both, keeps the lexicographically (equivalently,
/// chronologically -- see [`Csn`]'s `Ord`) greater CSN. For sids present
/// only in one side, keeps that side's CSN. A sid equal to the reserved
/// "unknown" marker is skipped on either side. Returns the merged vector
/// and whether anything advanced or was newly inserted.
///
/// `O(|local| + |remote|)`: both vectors are sid-sorted, so this is a
/// single lockstep walk.
pub fn merge(local: &Cookie, remote: &Cookie) -> (Cookie, bool) {
    let mut out = Cookie::empty();
    out.rid = local.rid.or(remote.rid);
    out.sid = local.sid.or(remote.sid);

    let mut changed = false;
    let mut li = local.entries().iter().peekable();
    let mut ri = remote.entries().iter().peekable();

    loop {
        match (li.peek(), ri.peek()) {
            (Some((ls, lc)), Some((rs, rc))) => {
                if ls == rs {
                    let winner = if rc > lc {
                        changed = true;
                        *rc
                    } else {
                        *lc
                    };
                    if !ls.is_unknown() {
                        out.set(*ls, winner);
                    }
                    li.next();
                    ri.next();
                } else if ls < rs {
                    if !ls.is_unknown() {
                        out.set(*ls, *lc);
                    }
                    li.next();
                } else {
                    if !rs.is_unknown() {
                        out.set(*rs, *rc);
                        changed = true;
                    }
                    ri.next();
                }
            }
            (Some((ls, lc)), None) => {
                if !ls.is_unknown() {
                    out.set(*ls, *lc);
                }
                li.next();
            }
            (None, Some((rs, rc))) => {
                if !rs.is_unknown() {
                    out.set(*rs, *rc);
                    changed = true;
                }
                ri.next();
            }
            (None, None) => break,
        }
    }

    (out, changed)
}

/// `-1`, `0`, or `+1` comparing `a` to `b`, plus the rank (among distinct
/// sids visited in increasing order) of the first disagreement -- used by
/// the present/non-present reconciliation to address deletions by slot
/// (spec §4.1).
pub fn compare(a: &Cookie, b: &Cookie) -> (i8, Option<usize>) {
    let mut ai = a.entries().iter().peekable();
    let mut bi = b.entries().iter().peekable();
    let mut rank = 0usize;

    loop {
        match (ai.peek(), bi.peek()) {
            (Some((asid, acsn)), Some((bsid, bcsn))) => {
                if asid == bsid {
                    if acsn < bcsn {
                        return (-1, Some(rank));
                    } else if acsn > bcsn {
                        return (1, Some(rank));
                    }
                    ai.next();
                    bi.next();
                } else if asid < bsid {
                    // `a` has a sid `b` lacks.
                    return (-1, Some(rank));
                } else {
                    // `b` has a sid `a` lacks.
                    return (1, Some(rank));
                }
            }
            (Some(_), None) => return (-1, Some(rank)),
            (None, Some(_)) => return (1, Some(rank)),
            (None, None) => return (0, None),
        }
        rank += 1;
    }
}

/// Outcome of checking whether `csn` is fresh enough to apply against
/// `vec` for `sid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsnAgeResult {
    Ok,
    TooOld,
    /// `sid` is not present in `vec`; the insertion slot is included so
    /// the caller can splice it in without a second search.
    NewSid { insert_at: usize },
}

/// Binary-searches `vec` for `sid`. Reports `NewSid` with the insertion
/// slot if absent; `TooOld` if present and `csn <= stored`; else `Ok`
/// (spec §4.1).
pub fn check_csn_age(vec: &Cookie, sid: Sid, csn: Csn) -> CsnAgeResult {
    match vec.entries().binary_search_by_key(&sid, |(s, _)| *s) {
        Ok(idx) => {
            let (_, stored) = vec.entries()[idx];
            if csn <= stored {
                CsnAgeResult::TooOld
            } else {
                CsnAgeResult::Ok
            }
        }
        Err(insert_at) => CsnAgeResult::NewSid { insert_at },
    }
}
