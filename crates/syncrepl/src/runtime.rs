//! Wires a parsed [`ReplicaDirective`] into a scheduled [`SessionMachine`].
//!
//! The LDAP transport and the storage engine are the two external
//! collaborators spec §1 names -- this crate only implements what sits
//! between them, so this binary has no concrete `Transport` or
//! `DirectoryBackend` of its own to link in. [`NullTransport`] and
//! [`NullBackend`] stand in for them: every transport call reports
//! transport-down (driving the real retry-schedule control flow rather
//! than silently doing nothing), and the backend's reads return empty
//! rather than erroring so cookie persistence still has well-defined
//! startup behavior (spec §8 "Empty cookie on first connect uses the
//! stored contextCSN or nothing"). An embedding application that owns a
//! real LDAP client and storage engine links those in place of these two
//! types instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use syncrepl_conflict::ConflictRules;
use syncrepl_csn::CookieState;
use syncrepl_directory::{BackendError, DirectoryBackend, DirectoryRules, LocalEntry};
use syncrepl_modbuilder::ModBuilderRules;
use syncrepl_persist::CookiePersistor;
use syncrepl_scheduler::{ReplicaTask, TickOutcome};
use syncrepl_session::{
    BindOutcome, MessageId, SearchRequest, SessionMachine, SessionState, SyncMessage, Transport,
};
use syncrepl_types::{Cookie, EntryUuid, ModList, ReplicaDisplay, Rid, SessionOutcome};

use crate::config::ResolvedReplica;

/// Stands in for the LDAP client library (spec §1). Every call reports
/// transport-down so a replica with no linked transport still runs the
/// real bind/retry control flow instead of hanging.
pub struct NullTransport {
    replica: ReplicaDisplay,
}

impl Transport for NullTransport {
    fn bind(&mut self) -> Result<BindOutcome, syncrepl_types::SyncreplError> {
        Err(syncrepl_types::SyncreplError::TransportDown {
            replica: self.replica.clone(),
            detail: "no transport linked into this build".to_string(),
        })
    }

    fn search_with_control(
        &mut self,
        _request: &SearchRequest,
    ) -> Result<MessageId, syncrepl_types::SyncreplError> {
        Err(syncrepl_types::SyncreplError::TransportDown {
            replica: self.replica.clone(),
            detail: "no transport linked into this build".to_string(),
        })
    }

    fn next_message(&mut self, _message_id: MessageId) -> Result<SyncMessage, syncrepl_types::SyncreplError> {
        Err(syncrepl_types::SyncreplError::TransportDown {
            replica: self.replica.clone(),
            detail: "no transport linked into this build".to_string(),
        })
    }

    fn abandon(&mut self, _message_id: MessageId) {}
}

/// Stands in for the storage engine (spec §1). Reads return empty rather
/// than erroring; writes report [`BackendError::Other`].
#[derive(Default)]
pub struct NullBackend;

impl DirectoryBackend for NullBackend {
    fn search_by_uuid(&self, _base: &str, _uuid: &EntryUuid) -> Result<Option<LocalEntry>, BackendError> {
        Ok(None)
    }

    fn search_by_dn(&self, _dn: &str) -> Result<Option<LocalEntry>, BackendError> {
        Ok(None)
    }

    fn add(&self, dn: &str, _attributes: Vec<(String, Vec<Vec<u8>>)>) -> Result<(), BackendError> {
        Err(BackendError::Other {
            dn: dn.to_string(),
            detail: "no storage engine linked into this build".to_string(),
        })
    }

    fn modify(&self, dn: &str, _mods: &ModList) -> Result<(), BackendError> {
        Err(BackendError::Other {
            dn: dn.to_string(),
            detail: "no storage engine linked into this build".to_string(),
        })
    }

    fn modrename(
        &self,
        dn: &str,
        _new_rdn: &str,
        _delete_old_rdn: bool,
        _new_superior: Option<&str>,
        _mods: &ModList,
    ) -> Result<(), BackendError> {
        Err(BackendError::Other {
            dn: dn.to_string(),
            detail: "no storage engine linked into this build".to_string(),
        })
    }

    fn delete(&self, dn: &str) -> Result<(), BackendError> {
        Err(BackendError::Other {
            dn: dn.to_string(),
            detail: "no storage engine linked into this build".to_string(),
        })
    }

    fn get_attribute(&self, _dn: &str, _attr: &str) -> Result<Vec<Vec<u8>>, BackendError> {
        Ok(Vec::new())
    }
}

/// Adapts a [`SessionMachine`] to the scheduler's [`ReplicaTask`] (spec
/// §4.7): runs [`SessionMachine::step`] in a loop until the session
/// reaches a per-tick terminal outcome, then reports how to reschedule.
pub struct SessionTask<T: Transport> {
    machine: SessionMachine<T>,
    backend: Arc<NullBackend>,
    cookie_state: Arc<CookieState>,
    persistor: Arc<CookiePersistor>,
}

impl<T: Transport + Send> ReplicaTask for SessionTask<T> {
    fn rid(&self) -> Rid {
        self.machine.replica.rid
    }

    fn tick(&mut self, shutdown: &AtomicBool) -> TickOutcome {
        loop {
            let outcome = self
                .machine
                .step(self.backend.as_ref(), &self.cookie_state, shutdown);

            match outcome {
                SessionOutcome::Paused => return TickOutcome::Paused,
                SessionOutcome::Shutdown => return TickOutcome::ShuttingDown,
                SessionOutcome::TransportDown | SessionOutcome::ProtocolError => {
                    // `step()` already advanced `retry_schedule` on the way
                    // into `RetryWait`; `last_retry_delay` is that result.
                    return match self.machine.replica.last_retry_delay {
                        Some(delay) => TickOutcome::RetryWait(delay),
                        None => TickOutcome::Exhausted,
                    };
                }
                SessionOutcome::Success | SessionOutcome::Stale | SessionOutcome::RefreshRequired => {
                    if shutdown.load(Ordering::Acquire) {
                        return TickOutcome::ShuttingDown;
                    }
                    if self.machine.state() == SessionState::Draining {
                        self.persist_committed_cookie();
                        let immediate = self.machine.replica.immediate_repoll;
                        self.machine.replica.immediate_repoll = false;
                        return if immediate {
                            TickOutcome::Interval(Duration::ZERO)
                        } else {
                            TickOutcome::Interval(self.machine.replica.interval)
                        };
                    }
                    // Still mid-refresh or mid-persist: keep driving.
                }
            }
        }
    }
}

impl<T: Transport> SessionTask<T> {
    fn persist_committed_cookie(&self) {
        let snapshot = self.cookie_state.committed_snapshot();
        let csns: Vec<_> = snapshot.entries().iter().map(|(_, csn)| *csn).collect();
        if let Err(err) = self.persistor.store_committed_csns(self.backend.as_ref(), &csns) {
            tracing::warn!(replica = %self.machine.replica.replica, error = %err, "failed to persist committed cookie");
        }
    }
}

/// Builds a ready-to-register [`SessionTask`] for one resolved replica,
/// sharing `cookie_state` and `backend` with every other replica of the
/// same local database (spec §5 "across sessions sharing a database").
pub fn build_task(
    resolved: ResolvedReplica,
    backend: Arc<NullBackend>,
    cookie_state: Arc<CookieState>,
    persistor: Arc<CookiePersistor>,
) -> Box<dyn ReplicaTask> {
    let transport = NullTransport {
        replica: resolved.replica_state.replica.clone(),
    };
    let machine = SessionMachine::new(
        resolved.replica_state,
        transport,
        ModBuilderRules::default(),
        ConflictRules::default(),
        DirectoryRules::default(),
        resolved.base,
        resolved.suffix,
        resolved.context_dn,
    );
    Box::new(SessionTask {
        machine,
        backend,
        cookie_state,
        persistor,
    })
}

pub fn initial_cookie_state(persistor: &CookiePersistor, backend: &NullBackend) -> Arc<CookieState> {
    let state = persistor.load(backend).unwrap_or_default();
    let mut cookie = Cookie::empty();
    for csn in state.committed_csns {
        cookie.set(csn.sid(), csn);
    }
    Arc::new(CookieState::new(cookie))
}
