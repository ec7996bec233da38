//! Per-database cookie state shared by every replica that applies writes
//! into the same local database (spec §3 "Cookie state (per database)",
//! §5 "Shared-resource policy").
//!
//! Lock order is fixed and never reversed: refresh gate -> pending -> committed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use syncrepl_types::{Cookie, Csn, Rid, Sid};

use crate::vector::{check_csn_age, merge, CsnAgeResult};

/// Returned by [`CookieState::stage`] once a CSN has been accepted into
/// the pending vector. Holding this token across an apply keeps the
/// pending-CSN mutex's intent alive without actually holding the lock (the
/// lock itself is only taken for the insert and the matching [`commit`]).
///
/// [`commit`]: CookieState::commit
#[derive(Debug, Clone, Copy)]
pub struct StageToken {
    sid: Sid,
    csn: Csn,
}

/// Per-database replication state: committed vector, pending vector,
/// generation counter, and the refresh-gate / paused-list fairness
/// mechanism (spec §9 "Concurrency primitives").
pub struct CookieState {
    committed: Mutex<Cookie>,
    pending: Mutex<Cookie>,
    age: AtomicU64,
    refresh: Mutex<RefreshGate>,
    refresh_cv: Condvar,
}

struct RefreshGate {
    holder: Option<Rid>,
    paused: VecDeque<Rid>,
}

impl CookieState {
    pub fn new(initial: Cookie) -> Self {
        Self {
            committed: Mutex::new(initial),
            pending: Mutex::new(Cookie::empty()),
            age: AtomicU64::new(0),
            refresh: Mutex::new(RefreshGate {
                holder: None,
                paused: VecDeque::new(),
            }),
            refresh_cv: Condvar::new(),
        }
    }

    pub fn committed_snapshot(&self) -> Cookie {
        self.committed.lock().expect("cookie state poisoned").clone()
    }

    pub fn pending_snapshot(&self) -> Cookie {
        self.pending.lock().expect("cookie state poisoned").clone()
    }

    pub fn age(&self) -> u64 {
        self.age.load(Ordering::Acquire)
    }

    /// Freshness gate for an incoming message: checks `csn` against both
    /// the committed and pending vectors for `sid`, and if fresh enough,
    /// inserts it into the pending vector. The pending mutex is taken for
    /// this insert and released immediately -- it is re-taken only by the
    /// matching [`commit`](Self::commit) around the storage-engine call,
    /// per spec §5's ordering guarantee.
    pub fn stage(&self, sid: Sid, csn: Csn) -> Result<StageToken, CsnAgeResult> {
        {
            let committed = self.committed.lock().expect("cookie state poisoned");
            match check_csn_age(&committed, sid, csn) {
                CsnAgeResult::TooOld => return Err(CsnAgeResult::TooOld),
                CsnAgeResult::Ok | CsnAgeResult::NewSid { .. } => {}
            }
        }
        let mut pending = self.pending.lock().expect("cookie state poisoned");
        match check_csn_age(&pending, sid, csn) {
            CsnAgeResult::TooOld => Err(CsnAgeResult::TooOld),
            CsnAgeResult::Ok | CsnAgeResult::NewSid { .. } => {
                pending.set(sid, csn);
                Ok(StageToken { sid, csn })
            }
        }
    }

    /// Commits a previously staged CSN: merges it into the committed
    /// vector, removes it from pending, and bumps the generation counter.
    /// Called after the storage-engine apply succeeds.
    pub fn commit(&self, token: StageToken) {
        let mut remote = Cookie::empty();
        remote.set(token.sid, token.csn);

        let mut committed = self.committed.lock().expect("cookie state poisoned");
        let (merged, changed) = merge(&committed, &remote);
        *committed = merged;
        drop(committed);

        let mut pending = self.pending.lock().expect("cookie state poisoned");
        if pending.get(token.sid) == Some(token.csn) {
            pending.clear(token.sid);
        }
        drop(pending);

        if changed {
            self.age.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Drops a staged CSN without committing it (the apply failed).
    pub fn abort(&self, token: StageToken) {
        let mut pending = self.pending.lock().expect("cookie state poisoned");
        if pending.get(token.sid) == Some(token.csn) {
            pending.clear(token.sid);
        }
    }

    /// Attempts to acquire the refresh gate for `rid`. Returns `true` if
    /// acquired; otherwise `rid` is parked on the paused list and `false`
    /// is returned -- the caller must stop scheduling this replica until
    /// [`release`](Self::release) wakes it (spec §4.6 "Refresh
    /// serialization").
    pub fn try_acquire_refresh(&self, rid: Rid) -> bool {
        let mut gate = self.refresh.lock().expect("cookie state poisoned");
        match gate.holder {
            None => {
                gate.holder = Some(rid);
                true
            }
            Some(holder) if holder == rid => true,
            Some(_) => {
                if !gate.paused.contains(&rid) {
                    gate.paused.push_back(rid);
                }
                false
            }
        }
    }

    /// Releases the refresh gate held by `rid` and wakes the next paused
    /// replica, if any. Returns the woken replica's id.
    pub fn release(&self, rid: Rid) -> Result<Option<Rid>, RefreshGateError> {
        let mut gate = self.refresh.lock().expect("cookie state poisoned");
        if gate.holder != Some(rid) {
            return Err(RefreshGateError::NotHolder);
        }
        let next = gate.paused.pop_front();
        gate.holder = next;
        self.refresh_cv.notify_all();
        Ok(next)
    }

    pub fn is_refresh_holder(&self, rid: Rid) -> bool {
        self.refresh.lock().expect("cookie state poisoned").holder == Some(rid)
    }

    /// Blocks up to `timeout` for the refresh gate to become available to
    /// `rid`, waking early on every [`release`](Self::release). Returns
    /// whether `rid` now holds the gate. Used by callers that prefer to
    /// park a thread rather than cooperatively re-queue (spec §9: "a
    /// mutex + condition variable ... is sufficient").
    pub fn wait_for_refresh(&self, rid: Rid, timeout: std::time::Duration) -> bool {
        let gate = self.refresh.lock().expect("cookie state poisoned");
        let (gate, _timed_out) = self
            .refresh_cv
            .wait_timeout_while(gate, timeout, |g| g.holder.is_some() && g.holder != Some(rid))
            .expect("cookie state poisoned");
        gate.holder == Some(rid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RefreshGateError {
    #[error("replica does not hold the refresh gate")]
    NotHolder,
}

// `Cookie::clear` is a small extension only this crate needs: dropping a
// single sid's entry from the pending vector once it has been committed.
trait CookieClearExt {
    fn clear(&mut self, sid: Sid);
}

impl CookieClearExt for Cookie {
    fn clear(&mut self, sid: Sid) {
        // Cookie only exposes `set`/`get` publicly; rebuild without `sid`.
        let remaining: Vec<(Sid, Csn)> = self
            .entries()
            .iter()
            .copied()
            .filter(|(s, _)| *s != sid)
            .collect();
        let mut fresh = Cookie::empty();
        fresh.rid = self.rid;
        fresh.sid = self.sid;
        for (s, c) in remaining {
            fresh.set(s, c);
        }
        *self = fresh;
    }
}
