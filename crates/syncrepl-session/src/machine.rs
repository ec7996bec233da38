//! The session state machine itself (spec §4.6): drives one replica's
//! transport through bind, search, dispatch, refresh-done and persist,
//! one [`SessionMachine::step`] call at a time so a scheduler can
//! interleave many replicas on a small thread pool (spec §4.7/§5).

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, trace, warn};

use syncrepl_conflict::{resolve as resolve_conflict, ConflictOutcome, ConflictRules};
use syncrepl_csn::CookieState;
use syncrepl_directory::{
    delete_with_glue_cleanup, parent_dn, reconcile, DirectoryBackend, DirectoryRules, ReconcileInput,
    ReconcileOutcome, ReconcileState,
};
use syncrepl_modbuilder::{
    build_mods_from_dirsync, build_mods_from_retro, DirSyncOutcome, DirSyncRecord, ModBuilderRules,
    RetroChangeLogRecord, RetroModOp,
};
use syncrepl_types::{
    Csn, DataMode, EntryUuid, LoggingState, ModList, ModOp, ProtocolType, Rid, Sid, SessionOutcome,
    SyncreplError,
};

use crate::state::{ReplicaState, SessionState};
use crate::transport::{
    AccessLogChangeType, BindOutcome, IntermediateMessage, MessageId, RequestMode, SearchRequest,
    SearchResultOutcome, SyncEntryState, SyncMessage, Transport,
};

/// A fixed sentinel timestamp for CSNs this crate synthesizes itself
/// (retro-change-log's `changeNumber`, DirSync's opaque cookie) rather
/// than receives on the wire. Only [`ReplicaState::apply_sequence`] and
/// `sid` ever vary between two such CSNs, so the timestamp carries no
/// information and picking a fixed one keeps comparisons well-defined.
const SYNTHETIC_CSN_TIMESTAMP: &str = "19700101000000.000000";

/// Drives one replica's [`Transport`] through the state machine in
/// spec §4.6, dispatching applied changes through
/// [`syncrepl_directory::reconcile`].
pub struct SessionMachine<T: Transport> {
    pub replica: ReplicaState,
    pub state: SessionState,
    transport: T,
    mod_rules: ModBuilderRules,
    conflict_rules: ConflictRules,
    dir_rules: DirectoryRules,
    present: syncrepl_present::PresentSet,
    base: String,
    suffix: String,
    context_dn: String,
}

impl<T: Transport> SessionMachine<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        replica: ReplicaState,
        transport: T,
        mod_rules: ModBuilderRules,
        conflict_rules: ConflictRules,
        dir_rules: DirectoryRules,
        base: String,
        suffix: String,
        context_dn: String,
    ) -> Self {
        Self {
            replica,
            state: SessionState::Idle,
            transport,
            mod_rules,
            conflict_rules,
            dir_rules,
            present: syncrepl_present::PresentSet::new(),
            base,
            suffix,
            context_dn,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs one logical step of the machine: one bind attempt, one
    /// search, one dispatched message, or the refresh-done walk. A
    /// scheduler calls this repeatedly, interleaving other replicas
    /// between calls (spec §4.7 "Replica scheduler").
    pub fn step<B: DirectoryBackend>(
        &mut self,
        backend: &B,
        cookie_state: &CookieState,
        shutdown: &AtomicBool,
    ) -> SessionOutcome {
        if shutdown.load(Ordering::Acquire) {
            return self.do_shutdown(cookie_state);
        }

        match self.state {
            SessionState::Idle | SessionState::Draining | SessionState::Closed => {
                self.begin_refresh(cookie_state)
            }
            SessionState::RetryWait => {
                if self.replica.retry_schedule.is_exhausted() {
                    // The scheduler is expected to have removed this
                    // replica already; re-entering here just retries once
                    // more rather than looping forever on its own.
                    warn!(replica = %self.replica.replica, "retry schedule exhausted, retrying anyway");
                }
                self.begin_refresh(cookie_state)
            }
            SessionState::Paused => {
                if cookie_state.try_acquire_refresh(self.replica.rid) {
                    self.state = SessionState::Connecting;
                    self.do_bind(cookie_state)
                } else {
                    SessionOutcome::Paused
                }
            }
            SessionState::Connecting | SessionState::Authenticating => self.do_bind(cookie_state),
            SessionState::Searching => self.do_search(cookie_state),
            SessionState::Refreshing | SessionState::Persisting => self.dispatch_one(backend, cookie_state),
            SessionState::RefreshDone => self.finish_refresh(backend, cookie_state),
            SessionState::Shutdown => SessionOutcome::Shutdown,
        }
    }

    fn begin_refresh(&mut self, cookie_state: &CookieState) -> SessionOutcome {
        if !cookie_state.try_acquire_refresh(self.replica.rid) {
            self.state = SessionState::Paused;
            return SessionOutcome::Paused;
        }
        self.state = SessionState::Connecting;
        self.do_bind(cookie_state)
    }

    fn do_bind(&mut self, cookie_state: &CookieState) -> SessionOutcome {
        self.state = SessionState::Authenticating;
        match self.transport.bind() {
            Ok(BindOutcome::Bound) => {
                self.state = SessionState::Searching;
                self.do_search(cookie_state)
            }
            Ok(BindOutcome::Referral(uris)) => {
                debug!(replica = %self.replica.replica, ?uris, "bind referral, chasing first uri");
                match self.transport.bind() {
                    Ok(BindOutcome::Bound) => {
                        self.state = SessionState::Searching;
                        self.do_search(cookie_state)
                    }
                    _ => self.fail_transport(cookie_state, "referral chase failed"),
                }
            }
            Err(_) => self.fail_transport(cookie_state, "bind failed"),
        }
    }

    fn do_search(&mut self, cookie_state: &CookieState) -> SessionOutcome {
        if self.replica.data_mode == DataMode::ChangeLog && self.replica.logging_state == LoggingState::Logging {
            match self.transport.change_number_range() {
                Ok((first, last)) => {
                    let hw = self.replica.retro_changelog_high_water.unwrap_or(0);
                    if hw != 0 && (hw < first || hw > last) {
                        warn!(replica = %self.replica.replica, hw, first, last, "high-water mark out of range, falling back to full refresh");
                        self.replica.logging_state = LoggingState::Fallback;
                    }
                }
                Err(_) => return self.fail_transport(cookie_state, "change-number range probe failed"),
            }
        }

        let request = SearchRequest {
            params: self.replica.search.clone(),
            cookie: self.wire_cookie_bytes(),
            mode: self.request_mode(),
            manage_dsa_it: false,
        };
        match self.transport.search_with_control(&request) {
            Ok(mid) => {
                self.replica.outstanding_message_id = Some(mid.0);
                self.state = SessionState::Refreshing;
                SessionOutcome::Success
            }
            Err(_) => self.fail_transport(cookie_state, "search failed"),
        }
    }

    fn request_mode(&self) -> RequestMode {
        match self.replica.protocol {
            ProtocolType::DirSync => RequestMode::DirSync {
                show_deleted: self.replica.dirsync_cookie.is_some(),
            },
            _ => match self.replica.data_mode {
                DataMode::AccessLog => RequestMode::AccessLog {
                    log_base: self.replica.log_base.clone().unwrap_or_default(),
                    log_filter: self.replica.log_filter.clone().unwrap_or_default(),
                },
                DataMode::ChangeLog if self.replica.logging_state == LoggingState::Logging => {
                    RequestMode::RetroChangeLog {
                        since_change_number: self.replica.retro_changelog_high_water.unwrap_or(0) + 1,
                    }
                }
                _ => RequestMode::ContentSync {
                    refresh_hint: !self.replica.wire_cookie.is_empty(),
                },
            },
        }
    }

    fn wire_cookie_bytes(&self) -> Option<Vec<u8>> {
        if self.replica.protocol == ProtocolType::DirSync {
            return self.replica.dirsync_cookie.clone();
        }
        if self.replica.wire_cookie.is_empty() {
            None
        } else {
            Some(self.replica.wire_cookie.to_string().into_bytes())
        }
    }

    fn store_wire_cookie(&mut self, bytes: Vec<u8>) {
        let Ok(text) = String::from_utf8(bytes) else {
            warn!(replica = %self.replica.replica, "new cookie was not valid utf-8, ignoring");
            return;
        };
        match text.parse() {
            Ok(cookie) => self.replica.wire_cookie = cookie,
            Err(_) => warn!(replica = %self.replica.replica, cookie = %text, "unparseable cookie, ignoring"),
        }
    }

    fn dispatch_one<B: DirectoryBackend>(&mut self, backend: &B, cookie_state: &CookieState) -> SessionOutcome {
        let Some(mid) = self.replica.outstanding_message_id else {
            return self.fail_protocol(cookie_state, "no outstanding search to read from");
        };
        let msg = match self.transport.next_message(MessageId(mid)) {
            Ok(m) => m,
            Err(_) => return self.fail_transport(cookie_state, "read failed"),
        };

        match msg {
            SyncMessage::RawEntry { entry, state, entry_csn } => {
                self.apply_raw_entry(backend, cookie_state, entry, state, entry_csn)
            }
            SyncMessage::AccessLogRecord {
                target_dn,
                change_type,
                mods,
                entry_csn,
                new_rdn,
                new_superior,
            } => self.apply_access_log(backend, cookie_state, target_dn, change_type, mods, entry_csn, new_rdn, new_superior),
            SyncMessage::RetroChangeLog(record) => self.apply_retro(backend, cookie_state, record),
            SyncMessage::DirSync(record) => self.apply_dirsync(backend, cookie_state, record),
            SyncMessage::Intermediate(im) => self.apply_intermediate(backend, cookie_state, im),
            SyncMessage::SearchResult(outcome) => self.finish_search(cookie_state, outcome),
        }
    }

    fn apply_raw_entry<B: DirectoryBackend>(
        &mut self,
        backend: &B,
        cookie_state: &CookieState,
        entry: syncrepl_modbuilder::RawSyncEntry,
        state: SyncEntryState,
        entry_csn: Option<Csn>,
    ) -> SessionOutcome {
        let Some(csn) = entry_csn else {
            return self.fail_protocol(cookie_state, "sync entry missing entryCSN");
        };
        let during_refresh = self.state == SessionState::Refreshing;
        let rstate = match state {
            SyncEntryState::Present => ReconcileState::Present,
            SyncEntryState::Add => ReconcileState::Add,
            SyncEntryState::Modify => ReconcileState::Modify,
            SyncEntryState::Delete => ReconcileState::Delete,
        };
        let mods = syncrepl_modbuilder::build_mods_from_raw_entry(&entry, &self.context_dn, &self.mod_rules);
        let entry_attrs = modlist_to_attrs(&mods);
        let input = ReconcileInput {
            state: rstate,
            uuid: entry.uuid,
            dn: entry.dn,
            entry_attrs,
            mods: ModList::new(),
            csn,
            during_refresh,
        };
        self.run_reconcile(backend, cookie_state, csn.sid(), input)
    }

    fn apply_access_log<B: DirectoryBackend>(
        &mut self,
        backend: &B,
        cookie_state: &CookieState,
        target_dn: String,
        change_type: AccessLogChangeType,
        mods: ModList,
        entry_csn: Csn,
        new_rdn: Option<String>,
        new_superior: Option<String>,
    ) -> SessionOutcome {
        let rstate = match change_type {
            AccessLogChangeType::Add => ReconcileState::DseeAdd,
            AccessLogChangeType::Modify | AccessLogChangeType::ModRdn => ReconcileState::Modify,
            AccessLogChangeType::Delete => ReconcileState::Delete,
        };
        let apply_dn = match change_type {
            AccessLogChangeType::ModRdn => self.rename_target(&target_dn, new_rdn.as_deref(), new_superior.as_deref()),
            _ => target_dn.clone(),
        };
        self.resolve_and_apply(backend, cookie_state, &target_dn, &apply_dn, rstate, mods, entry_csn, false)
    }

    fn apply_retro<B: DirectoryBackend>(
        &mut self,
        backend: &B,
        cookie_state: &CookieState,
        record: RetroChangeLogRecord,
    ) -> SessionOutcome {
        let change_number = record.change_number;
        let (lookup_dn, new_rdn, new_superior) = (
            record.target_dn.clone(),
            record.new_rdn.clone(),
            record.new_superior.clone(),
        );
        let op = record.op;
        let (dn, mods) = match build_mods_from_retro(&record, &self.mod_rules) {
            Ok(x) => x,
            Err(_) => return self.fail_protocol(cookie_state, "unparseable retro-change-log record"),
        };
        let rstate = match op {
            RetroModOp::Add => ReconcileState::Add,
            RetroModOp::Modify | RetroModOp::ModRdn => ReconcileState::Modify,
            RetroModOp::Delete => ReconcileState::Delete,
        };
        let apply_dn = match op {
            RetroModOp::ModRdn => self.rename_target(&lookup_dn, new_rdn.as_deref(), new_superior.as_deref()),
            _ => dn.clone(),
        };
        let csn = self.next_synthetic_csn();
        let during_refresh = false;
        let outcome = self.resolve_and_apply(backend, cookie_state, &lookup_dn, &apply_dn, rstate, mods, csn, during_refresh);
        if matches!(outcome, SessionOutcome::Success | SessionOutcome::Stale) {
            self.replica.retro_changelog_high_water = Some(change_number);
        }
        outcome
    }

    fn apply_dirsync<B: DirectoryBackend>(
        &mut self,
        backend: &B,
        cookie_state: &CookieState,
        record: DirSyncRecord,
    ) -> SessionOutcome {
        let dn = record.dn.clone();
        let (mods, outcome) = build_mods_from_dirsync(&record, &self.mod_rules);
        let rstate = match outcome {
            DirSyncOutcome::Add => ReconcileState::Add,
            DirSyncOutcome::Modify => ReconcileState::DirSyncModify,
            DirSyncOutcome::Delete => ReconcileState::Delete,
        };
        let csn = self.next_synthetic_csn();
        let during_refresh = self.state == SessionState::Refreshing;
        let uuid_hint = backend
            .search_by_dn(&dn)
            .ok()
            .flatten()
            .and_then(|e| e.uuid)
            .unwrap_or_else(|| synthetic_uuid_for_dn(&dn));
        self.resolve_and_apply_with_uuid(backend, cookie_state, &dn, &dn, Some(uuid_hint), rstate, mods, csn, during_refresh)
    }

    /// Computes the DN a rename/moddn targets from the provider's
    /// `(newRdn, newSuperior)` pair, falling back to the current DN's own
    /// parent when no superior move was reported.
    fn rename_target(&self, old_dn: &str, new_rdn: Option<&str>, new_superior: Option<&str>) -> String {
        let rdn = new_rdn.unwrap_or(old_dn).to_string();
        let superior = new_superior
            .map(|s| s.to_string())
            .or_else(|| parent_dn(old_dn));
        match superior {
            Some(s) if !s.is_empty() => format!("{rdn},{s}"),
            _ => rdn,
        }
    }

    fn next_synthetic_csn(&mut self) -> Csn {
        self.replica.apply_sequence = self.replica.apply_sequence.wrapping_add(1);
        let sid = Sid::new(self.replica.rid.as_u16());
        Csn::new(SYNTHETIC_CSN_TIMESTAMP, self.replica.apply_sequence & 0xFF_FFFF, sid, 0)
            .expect("synthetic csn fields are always in range")
    }

    /// Resolves the entry's uuid by looking up `lookup_dn`, falling back
    /// to an `entryuuid` modification already present in `mods` (minted
    /// by the modification builder for adds).
    fn resolve_and_apply<B: DirectoryBackend>(
        &mut self,
        backend: &B,
        cookie_state: &CookieState,
        lookup_dn: &str,
        apply_dn: &str,
        rstate: ReconcileState,
        mods: ModList,
        csn: Csn,
        during_refresh: bool,
    ) -> SessionOutcome {
        let uuid_hint = mods
            .iter()
            .find(|m| m.attribute.eq_ignore_ascii_case("entryuuid"))
            .and_then(|m| m.values.first())
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.parse::<EntryUuid>().ok());
        self.resolve_and_apply_with_uuid(backend, cookie_state, lookup_dn, apply_dn, uuid_hint, rstate, mods, csn, during_refresh)
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_and_apply_with_uuid<B: DirectoryBackend>(
        &mut self,
        backend: &B,
        cookie_state: &CookieState,
        lookup_dn: &str,
        apply_dn: &str,
        uuid_hint: Option<EntryUuid>,
        rstate: ReconcileState,
        mods: ModList,
        csn: Csn,
        during_refresh: bool,
    ) -> SessionOutcome {
        let local = match backend.search_by_dn(lookup_dn) {
            Ok(entry) => entry,
            Err(e) => return self.fail_from_error(cookie_state, syncrepl_directory::to_syncrepl_error(e, self.replica.replica.clone())),
        };

        let uuid = match uuid_hint.or_else(|| local.as_ref().and_then(|e| e.uuid)) {
            Some(u) => u,
            None => return self.fail_protocol(cookie_state, "cannot resolve entry uuid for change"),
        };

        let resolved_mods = self.maybe_resolve_conflict(&local, &mods, csn);
        let Some(resolved_mods) = resolved_mods else {
            trace!(replica = %self.replica.replica, dn = apply_dn, "conflict resolver: already applied");
            return SessionOutcome::Success;
        };

        // `local` was looked up by `lookup_dn` (the entry's DN before a
        // possible provider-side rename); `reconcile()` independently
        // re-resolves by UUID and routes to a rename whenever that entry's
        // DN differs from `apply_dn`. A rename diffs against `entry_attrs`
        // too (there is no separate "just renaming" path), so an empty vec
        // there would read as "this entry now has no other attributes" and
        // strip everything but the naming attribute and entryUUID.
        let is_rename = local.as_ref().is_some_and(|e| !e.dn.eq_ignore_ascii_case(apply_dn));
        let entry_attrs = if local.is_none() || is_rename {
            modlist_to_attrs(&resolved_mods)
        } else {
            Vec::new()
        };
        let input = ReconcileInput {
            state: rstate,
            uuid,
            dn: apply_dn.to_string(),
            entry_attrs,
            mods: resolved_mods,
            csn,
            during_refresh,
        };
        self.run_reconcile(backend, cookie_state, csn.sid(), input)
    }

    /// Runs the conflict resolver when this replica's data mode is a
    /// delta source applying onto a (potentially multi-provider)
    /// database, i.e. whenever the local entry already carries an
    /// `entryCSN` to compare against (spec §4.4). Returns `None` when the
    /// resolver reports the change is already applied.
    fn maybe_resolve_conflict(
        &mut self,
        local: &Option<syncrepl_directory::LocalEntry>,
        mods: &ModList,
        csn: Csn,
    ) -> Option<ModList> {
        if self.replica.data_mode == DataMode::Default {
            return Some(mods.clone());
        }
        let Some(existing) = local else {
            return Some(mods.clone());
        };
        let Some(local_csn) = existing
            .attribute("entrycsn")
            .and_then(|v| v.first())
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.parse::<Csn>().ok())
        else {
            return Some(mods.clone());
        };

        let newer = self
            .transport
            .newer_log_mods(&existing.dn, csn)
            .unwrap_or_default();
        let snapshot = existing.attributes.clone();
        let current_values = |attr: &str| -> Vec<Vec<u8>> {
            snapshot
                .iter()
                .find(|(a, _)| a.eq_ignore_ascii_case(attr))
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        match resolve_conflict(csn, local_csn, mods.clone(), &newer, current_values, &self.conflict_rules) {
            ConflictOutcome::AlreadyApplied => None,
            ConflictOutcome::Apply(m) => Some(m),
        }
    }

    fn run_reconcile<B: DirectoryBackend>(
        &mut self,
        backend: &B,
        cookie_state: &CookieState,
        sid: Sid,
        input: ReconcileInput,
    ) -> SessionOutcome {
        match reconcile(
            backend,
            &mut self.present,
            cookie_state,
            sid,
            &self.base,
            &self.suffix,
            &self.dir_rules,
            self.replica.replica.clone(),
            input,
        ) {
            Ok(ReconcileOutcome::Discarded) => SessionOutcome::Stale,
            Ok(ReconcileOutcome::StateDrifted) => {
                warn!(replica = %self.replica.replica, "local state drifted from provider, restarting from empty cookie");
                self.clear_state_and_restart(cookie_state);
                SessionOutcome::RefreshRequired
            }
            Ok(ReconcileOutcome::Referral { dn, uri }) => {
                warn!(replica = %self.replica.replica, dn, uri, "add/modify referral, not chased (single-uri limitation carried from the original)");
                SessionOutcome::ProtocolError
            }
            Ok(outcome) => {
                debug!(replica = %self.replica.replica, ?outcome, "applied");
                SessionOutcome::Success
            }
            Err(e) => self.fail_from_error(cookie_state, e),
        }
    }

    fn apply_intermediate<B: DirectoryBackend>(
        &mut self,
        backend: &B,
        _cookie_state: &CookieState,
        im: IntermediateMessage,
    ) -> SessionOutcome {
        match im {
            IntermediateMessage::NewCookie(bytes) => {
                self.store_wire_cookie(bytes);
                SessionOutcome::Success
            }
            IntermediateMessage::RefreshPresent { cookie } | IntermediateMessage::RefreshDelete { cookie } => {
                if let Some(c) = cookie {
                    self.store_wire_cookie(c);
                }
                SessionOutcome::Success
            }
            IntermediateMessage::SyncIdSet { uuids, refresh_deletes, cookie } => {
                if let Some(c) = cookie {
                    self.store_wire_cookie(c);
                }
                if uuids.is_empty() {
                    // spec §4.6: an empty id set is a no-op, not "delete everything".
                    return SessionOutcome::Success;
                }
                if refresh_deletes {
                    for uuid in &uuids {
                        self.delete_by_uuid(backend, uuid);
                    }
                } else {
                    for uuid in uuids {
                        self.present.insert(uuid);
                    }
                }
                SessionOutcome::Success
            }
            IntermediateMessage::DirSyncEnd { cookie, continue_flag } => {
                self.replica.dirsync_cookie = Some(cookie);
                self.replica.immediate_repoll = continue_flag;
                SessionOutcome::Success
            }
        }
    }

    fn delete_by_uuid<B: DirectoryBackend>(&mut self, backend: &B, uuid: &EntryUuid) {
        self.present.delete(uuid);
        match backend.search_by_uuid(&self.base, uuid) {
            Ok(Some(entry)) => {
                if let Err(e) = delete_with_glue_cleanup(backend, &entry.dn, &self.suffix, self.replica.replica.clone()) {
                    error!(replica = %self.replica.replica, dn = %entry.dn, error = %e, "sync-id-set delete failed");
                }
            }
            Ok(None) => {}
            Err(e) => error!(replica = %self.replica.replica, uuid = %uuid, error = %e, "sync-id-set lookup failed"),
        }
    }

    fn finish_search(&mut self, cookie_state: &CookieState, outcome: SearchResultOutcome) -> SessionOutcome {
        match outcome {
            SearchResultOutcome::Success { cookie } => {
                if let Some(c) = cookie {
                    self.store_wire_cookie(c);
                }
                match self.state {
                    SessionState::Refreshing => {
                        self.state = SessionState::RefreshDone;
                        SessionOutcome::Success
                    }
                    SessionState::Persisting => {
                        self.state = SessionState::Draining;
                        SessionOutcome::Success
                    }
                    _ => SessionOutcome::Success,
                }
            }
            SearchResultOutcome::RefreshRequired => {
                self.replica.logging_state = LoggingState::Fallback;
                self.release_refresh_gate_if_holder(cookie_state);
                self.state = SessionState::Idle;
                SessionOutcome::RefreshRequired
            }
            SearchResultOutcome::Referral(uris) => {
                warn!(replica = %self.replica.replica, ?uris, "search-result referral, not chased (single-uri limitation carried from the original)");
                self.release_refresh_gate_if_holder(cookie_state);
                self.state = SessionState::Idle;
                SessionOutcome::ProtocolError
            }
            SearchResultOutcome::Error(detail) => self.fail_protocol(cookie_state, &detail),
        }
    }

    /// Walks the entries the refresh never enumerated and deletes them
    /// (spec §4.2 non-present reconciliation). Deletes here bypass the
    /// CSN-gated stage/commit path entirely: the provider's silence about
    /// an entry carries no CSN of its own to stage against.
    fn finish_refresh<B: DirectoryBackend>(&mut self, backend: &B, cookie_state: &CookieState) -> SessionOutcome {
        let stale: Vec<EntryUuid> = self.present.iter().collect();
        for uuid in &stale {
            match backend.search_by_uuid(&self.base, uuid) {
                Ok(Some(entry)) => {
                    if let Err(e) = delete_with_glue_cleanup(backend, &entry.dn, &self.suffix, self.replica.replica.clone()) {
                        error!(replica = %self.replica.replica, dn = %entry.dn, error = %e, "non-present delete failed");
                    }
                }
                Ok(None) => {}
                Err(e) => error!(replica = %self.replica.replica, uuid = %uuid, error = %e, "non-present lookup failed"),
            }
        }
        self.present = syncrepl_present::PresentSet::new();
        self.replica.note_progress();
        self.release_refresh_gate_if_holder(cookie_state);

        self.state = if self.replica.is_persistent() {
            SessionState::Persisting
        } else {
            SessionState::Draining
        };
        SessionOutcome::Success
    }

    fn fail_from_error(&mut self, cookie_state: &CookieState, err: SyncreplError) -> SessionOutcome {
        match err {
            SyncreplError::ApplyConflict { replica, dn } => {
                debug!(%replica, dn, "apply conflict treated as success");
                SessionOutcome::Success
            }
            SyncreplError::TransportDown { .. } => self.fail_transport(cookie_state, "transport down"),
            SyncreplError::ProtocolError { .. } | SyncreplError::MissingParent { .. } => {
                self.fail_protocol(cookie_state, "protocol error")
            }
            SyncreplError::FreshnessStale { .. } => SessionOutcome::Stale,
            SyncreplError::RefreshRequired { .. } => {
                self.replica.logging_state = LoggingState::Fallback;
                self.release_refresh_gate_if_holder(cookie_state);
                self.state = SessionState::Idle;
                SessionOutcome::RefreshRequired
            }
            SyncreplError::StateDrift { .. } => {
                self.clear_state_and_restart(cookie_state);
                SessionOutcome::RefreshRequired
            }
            SyncreplError::Paused { .. } => {
                self.state = SessionState::Paused;
                SessionOutcome::Paused
            }
            SyncreplError::Shutdown { .. } => self.do_shutdown(cookie_state),
            SyncreplError::Configuration(_) => self.fail_protocol(cookie_state, "configuration error"),
        }
    }

    fn fail_transport(&mut self, cookie_state: &CookieState, detail: &str) -> SessionOutcome {
        error!(replica = %self.replica.replica, detail, "transport down");
        self.release_refresh_gate_if_holder(cookie_state);
        self.replica.last_retry_delay = self.replica.retry_schedule.advance();
        self.state = SessionState::RetryWait;
        SessionOutcome::TransportDown
    }

    fn fail_protocol(&mut self, cookie_state: &CookieState, detail: &str) -> SessionOutcome {
        error!(replica = %self.replica.replica, detail, "protocol error");
        self.release_refresh_gate_if_holder(cookie_state);
        self.replica.last_retry_delay = self.replica.retry_schedule.advance();
        self.state = SessionState::RetryWait;
        SessionOutcome::ProtocolError
    }

    fn clear_state_and_restart(&mut self, cookie_state: &CookieState) {
        self.replica.wire_cookie = syncrepl_types::Cookie::empty();
        self.present = syncrepl_present::PresentSet::new();
        self.release_refresh_gate_if_holder(cookie_state);
        self.state = SessionState::Idle;
    }

    fn do_shutdown(&mut self, cookie_state: &CookieState) -> SessionOutcome {
        if let Some(mid) = self.replica.outstanding_message_id.take() {
            self.transport.abandon(MessageId(mid));
        }
        self.release_refresh_gate_if_holder(cookie_state);
        self.state = SessionState::Shutdown;
        SessionOutcome::Shutdown
    }

    fn release_refresh_gate_if_holder(&self, cookie_state: &CookieState) {
        if cookie_state.is_refresh_holder(self.replica.rid) {
            let _ = cookie_state.release(self.replica.rid);
        }
    }
}

fn modlist_to_attrs(mods: &ModList) -> Vec<(String, Vec<Vec<u8>>)> {
    mods.iter()
        .filter(|m| m.operation == ModOp::Replace)
        .map(|m| (m.attribute.clone(), m.values.clone()))
        .collect()
}

/// Derives a stable per-DN identifier for vendor protocols (DirSync) that
/// expose no native entry UUID, so the UUID-keyed reconciler still has
/// something to key on. Not cryptographic; only needs to be stable and
/// well-distributed for one DN across repeated polls.
fn synthetic_uuid_for_dn(dn: &str) -> EntryUuid {
    let normalized = dn.to_lowercase();
    let mut h: u64 = 0xcbf29ce484222325;
    for b in normalized.bytes() {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let h2 = h.wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(31);
    let mut octets = [0u8; 16];
    octets[0..8].copy_from_slice(&h.to_be_bytes());
    octets[8..16].copy_from_slice(&h2.to_be_bytes());
    EntryUuid::from_octets(octets)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::time::Duration;

    use test_case::test_case;

    use syncrepl_directory::{BackendError, LocalEntry};
    use syncrepl_modbuilder::RawSyncEntry;
    use syncrepl_types::{
        Cookie, Modification, ProtocolType, ReplicaDisplay, RetrySchedule, RetryStep, Scope,
        SearchParams,
    };

    use super::*;

    #[derive(Default)]
    struct FakeBackend {
        entries: RefCell<HashMap<String, LocalEntry>>,
    }

    impl FakeBackend {
        fn seed(&self, dn: &str, uuid: Option<EntryUuid>) {
            self.entries.borrow_mut().insert(
                dn.to_lowercase(),
                LocalEntry { dn: dn.to_string(), uuid, attributes: Vec::new() },
            );
        }

        fn seed_with_attrs(&self, dn: &str, uuid: Option<EntryUuid>, attributes: Vec<(String, Vec<Vec<u8>>)>) {
            self.entries.borrow_mut().insert(
                dn.to_lowercase(),
                LocalEntry { dn: dn.to_string(), uuid, attributes },
            );
        }

        fn attribute_of(&self, dn: &str, attr: &str) -> Option<Vec<Vec<u8>>> {
            self.entries.borrow().get(&dn.to_lowercase()).and_then(|e| e.attribute(attr).map(<[_]>::to_vec))
        }

        fn contains(&self, dn: &str) -> bool {
            self.entries.borrow().contains_key(&dn.to_lowercase())
        }
    }

    impl DirectoryBackend for FakeBackend {
        fn search_by_uuid(&self, _base: &str, uuid: &EntryUuid) -> Result<Option<LocalEntry>, BackendError> {
            Ok(self.entries.borrow().values().find(|e| e.uuid == Some(*uuid)).cloned())
        }
        fn search_by_dn(&self, dn: &str) -> Result<Option<LocalEntry>, BackendError> {
            Ok(self.entries.borrow().get(&dn.to_lowercase()).cloned())
        }
        fn add(&self, dn: &str, attributes: Vec<(String, Vec<Vec<u8>>)>) -> Result<(), BackendError> {
            let key = dn.to_lowercase();
            if self.entries.borrow().contains_key(&key) {
                return Err(BackendError::AlreadyExists { dn: dn.to_string() });
            }
            if let Some(parent) = parent_dn(dn) {
                if !parent.is_empty() && !self.entries.borrow().contains_key(&parent.to_lowercase()) {
                    return Err(BackendError::NoSuchObject { dn: parent });
                }
            }
            let uuid = attributes
                .iter()
                .find(|(a, _)| a.eq_ignore_ascii_case("entryuuid"))
                .and_then(|(_, v)| v.first())
                .and_then(|v| std::str::from_utf8(v).ok())
                .and_then(|s| s.parse().ok());
            self.entries.borrow_mut().insert(key, LocalEntry { dn: dn.to_string(), uuid, attributes });
            Ok(())
        }
        fn modify(&self, dn: &str, mods: &ModList) -> Result<(), BackendError> {
            let mut entries = self.entries.borrow_mut();
            let entry = entries.get_mut(&dn.to_lowercase()).ok_or_else(|| BackendError::NoSuchObject { dn: dn.to_string() })?;
            for m in mods {
                entry.attributes.retain(|(a, _)| !a.eq_ignore_ascii_case(&m.attribute));
                if !m.values.is_empty() {
                    entry.attributes.push((m.attribute.clone(), m.values.clone()));
                }
            }
            Ok(())
        }
        fn modrename(&self, dn: &str, new_rdn: &str, _delete_old_rdn: bool, new_superior: Option<&str>, _mods: &ModList) -> Result<(), BackendError> {
            let mut entries = self.entries.borrow_mut();
            let entry = entries.remove(&dn.to_lowercase()).ok_or_else(|| BackendError::NoSuchObject { dn: dn.to_string() })?;
            let superior = new_superior.map(str::to_string).or_else(|| parent_dn(dn));
            let new_dn = match superior {
                Some(s) if !s.is_empty() => format!("{new_rdn},{s}"),
                _ => new_rdn.to_string(),
            };
            entries.insert(new_dn.to_lowercase(), LocalEntry { dn: new_dn, ..entry });
            Ok(())
        }
        fn delete(&self, dn: &str) -> Result<(), BackendError> {
            self.entries
                .borrow_mut()
                .remove(&dn.to_lowercase())
                .map(|_| ())
                .ok_or_else(|| BackendError::NoSuchObject { dn: dn.to_string() })
        }
        fn get_attribute(&self, dn: &str, attr: &str) -> Result<Vec<Vec<u8>>, BackendError> {
            Ok(self
                .entries
                .borrow()
                .get(&dn.to_lowercase())
                .and_then(|e| e.attribute(attr).map(|v| v.to_vec()))
                .unwrap_or_default())
        }
    }

    struct FakeTransport {
        bind_outcome: Result<BindOutcome, ()>,
        messages: RefCell<Vec<SyncMessage>>,
        abandoned: RefCell<Vec<MessageId>>,
    }

    impl FakeTransport {
        fn new(messages: Vec<SyncMessage>) -> Self {
            Self { bind_outcome: Ok(BindOutcome::Bound), messages: RefCell::new(messages), abandoned: RefCell::new(Vec::new()) }
        }
    }

    impl Transport for FakeTransport {
        fn bind(&mut self) -> Result<BindOutcome, SyncreplError> {
            self.bind_outcome.clone().map_err(|_| SyncreplError::TransportDown {
                replica: test_replica_display(),
                detail: "bind refused".to_string(),
            })
        }
        fn search_with_control(&mut self, _request: &SearchRequest) -> Result<MessageId, SyncreplError> {
            Ok(MessageId(1))
        }
        fn next_message(&mut self, _message_id: MessageId) -> Result<SyncMessage, SyncreplError> {
            let mut messages = self.messages.borrow_mut();
            if messages.is_empty() {
                Ok(SyncMessage::SearchResult(SearchResultOutcome::Success { cookie: None }))
            } else {
                Ok(messages.remove(0))
            }
        }
        fn abandon(&mut self, message_id: MessageId) {
            self.abandoned.borrow_mut().push(message_id);
        }
    }

    fn test_replica_display() -> ReplicaDisplay {
        ReplicaDisplay::new(Rid::new(1), "ldap://provider.example.com")
    }

    fn test_search() -> SearchParams {
        SearchParams {
            base: "dc=example,dc=com".to_string(),
            scope: Scope::Subtree,
            filter: "(objectClass=*)".to_string(),
            attrs: Vec::new(),
            exattrs: Vec::new(),
            all_user_attrs: true,
            all_op_attrs: false,
            size_limit: None,
            time_limit: None,
        }
    }

    fn test_retry() -> RetrySchedule {
        RetrySchedule::new(vec![RetryStep::Finite { interval: Duration::from_secs(1), remaining: 1 }])
    }

    fn machine(messages: Vec<SyncMessage>) -> SessionMachine<FakeTransport> {
        let replica = ReplicaState::new(
            Rid::new(1),
            test_replica_display(),
            ProtocolType::RefreshAndPersist,
            DataMode::Default,
            Duration::from_secs(60),
            test_search(),
            test_retry(),
        );
        SessionMachine::new(
            replica,
            FakeTransport::new(messages),
            ModBuilderRules::default(),
            ConflictRules::default(),
            DirectoryRules::default(),
            "dc=example,dc=com".to_string(),
            "dc=example,dc=com".to_string(),
            "dc=example,dc=com".to_string(),
        )
    }

    fn raw_add(dn: &str, uuid: EntryUuid, csn: Csn) -> SyncMessage {
        SyncMessage::RawEntry {
            entry: RawSyncEntry { dn: dn.to_string(), uuid, attributes: vec![("cn".to_string(), vec![b"Alice".to_vec()])] },
            state: SyncEntryState::Add,
            entry_csn: Some(csn),
        }
    }

    fn csn(counter: u32) -> Csn {
        Csn::new("20240101000000.000000", counter, Sid::new(1), 0).unwrap()
    }

    fn run_until_idle_or_persisting(machine: &mut SessionMachine<FakeTransport>, backend: &FakeBackend, cookies: &CookieState, shutdown: &AtomicBool) {
        for _ in 0..20 {
            match machine.state() {
                SessionState::Persisting | SessionState::Shutdown | SessionState::RetryWait | SessionState::Paused => break,
                _ => {
                    machine.step(backend, cookies, shutdown);
                }
            }
        }
    }

    #[test]
    fn referral_on_bind_is_chased() {
        let mut m = machine(vec![]);
        m.transport.bind_outcome = Ok(BindOutcome::Referral(vec!["ldap://other".to_string()]));
        let backend = FakeBackend::default();
        let cookies = CookieState::new(Cookie::empty());
        let shutdown = AtomicBool::new(false);
        let outcome = m.step(&backend, &cookies, &shutdown);
        assert_eq!(outcome, SessionOutcome::Success);
        assert_eq!(m.state(), SessionState::Refreshing);
    }

    #[test]
    fn incremental_add_then_delete_applies_in_order() {
        let uuid = EntryUuid::from_octets([9u8; 16]);
        let mut m = machine(vec![
            raw_add("uid=alice,dc=example,dc=com", uuid, csn(1)),
            SyncMessage::SearchResult(SearchResultOutcome::Success { cookie: None }),
        ]);
        let backend = FakeBackend::default();
        let cookies = CookieState::new(Cookie::empty());
        let shutdown = AtomicBool::new(false);
        run_until_idle_or_persisting(&mut m, &backend, &cookies, &shutdown);
        assert!(backend.contains("uid=alice,dc=example,dc=com"));
        assert_eq!(m.state(), SessionState::Persisting);
    }

    #[test]
    fn add_with_missing_parent_synthesizes_glue_ancestors() {
        let uuid = EntryUuid::from_octets([3u8; 16]);
        let mut m = machine(vec![
            raw_add("uid=alice,ou=people,dc=example,dc=com", uuid, csn(1)),
            SyncMessage::SearchResult(SearchResultOutcome::Success { cookie: None }),
        ]);
        let backend = FakeBackend::default();
        backend.seed("dc=example,dc=com", None);
        let cookies = CookieState::new(Cookie::empty());
        let shutdown = AtomicBool::new(false);
        run_until_idle_or_persisting(&mut m, &backend, &cookies, &shutdown);
        assert!(backend.contains("ou=people,dc=example,dc=com"));
        assert!(backend.contains("uid=alice,ou=people,dc=example,dc=com"));
    }

    #[test]
    fn access_log_modrdn_preserves_non_naming_attributes() {
        let uuid = EntryUuid::from_octets([11u8; 16]);
        let mods = vec![Modification::new(ModOp::Replace, "mail").with_value(b"alice@x.com".to_vec())];
        let mut m = machine(vec![
            SyncMessage::AccessLogRecord {
                target_dn: "uid=alice,dc=example,dc=com".to_string(),
                change_type: AccessLogChangeType::ModRdn,
                mods,
                entry_csn: csn(1),
                new_rdn: Some("uid=alice2".to_string()),
                new_superior: None,
            },
            SyncMessage::SearchResult(SearchResultOutcome::Success { cookie: None }),
        ]);
        let backend = FakeBackend::default();
        backend.seed_with_attrs(
            "uid=alice,dc=example,dc=com",
            Some(uuid),
            vec![("cn".to_string(), vec![b"Alice".to_vec()])],
        );
        let cookies = CookieState::new(Cookie::empty());
        let shutdown = AtomicBool::new(false);
        run_until_idle_or_persisting(&mut m, &backend, &cookies, &shutdown);
        assert!(!backend.contains("uid=alice,dc=example,dc=com"));
        assert!(backend.contains("uid=alice2,dc=example,dc=com"));
        assert_eq!(
            backend.attribute_of("uid=alice2,dc=example,dc=com", "mail"),
            Some(vec![b"alice@x.com".to_vec()]),
        );
    }

    #[test]
    fn dirsync_continue_flag_requests_immediate_repoll() {
        let mut m = machine(vec![SyncMessage::Intermediate(IntermediateMessage::DirSyncEnd {
            cookie: b"K2".to_vec(),
            continue_flag: true,
        })]);
        m.replica.protocol = ProtocolType::DirSync;
        let backend = FakeBackend::default();
        let cookies = CookieState::new(Cookie::empty());
        let shutdown = AtomicBool::new(false);
        run_until_idle_or_persisting(&mut m, &backend, &cookies, &shutdown);
        assert!(m.replica.immediate_repoll);
        assert_eq!(m.replica.dirsync_cookie.as_deref(), Some(&b"K2"[..]));
    }

    #[test]
    fn stale_csn_is_reported_but_does_not_fail_the_session() {
        let uuid = EntryUuid::from_octets([5u8; 16]);
        let mut m = machine(vec![
            raw_add("uid=bob,dc=example,dc=com", uuid, csn(5)),
            raw_add("uid=bob,dc=example,dc=com", uuid, csn(1)),
            SyncMessage::SearchResult(SearchResultOutcome::Success { cookie: None }),
        ]);
        let backend = FakeBackend::default();
        let cookies = CookieState::new(Cookie::empty());
        let shutdown = AtomicBool::new(false);
        run_until_idle_or_persisting(&mut m, &backend, &cookies, &shutdown);
        assert!(backend.contains("uid=bob,dc=example,dc=com"));
    }

    #[test]
    fn transport_failure_advances_retry_schedule() {
        let mut m = machine(vec![]);
        m.transport.bind_outcome = Err(());
        let backend = FakeBackend::default();
        let cookies = CookieState::new(Cookie::empty());
        let shutdown = AtomicBool::new(false);
        let outcome = m.step(&backend, &cookies, &shutdown);
        assert_eq!(outcome, SessionOutcome::TransportDown);
        assert_eq!(m.state(), SessionState::RetryWait);
        assert!(!m.replica.retry_schedule.is_exhausted());
    }

    #[test_case(ProtocolType::RefreshOnly, DataMode::Default, LoggingState::Logging ; "content-sync uses content-sync mode")]
    #[test_case(ProtocolType::DirSync, DataMode::Default, LoggingState::Logging ; "dirsync protocol uses dirsync mode regardless of data mode")]
    #[test_case(ProtocolType::RefreshAndPersist, DataMode::ChangeLog, LoggingState::Fallback ; "changelog mode in fallback uses content-sync mode")]
    fn request_mode_follows_protocol_and_data_mode(protocol: ProtocolType, data_mode: DataMode, logging_state: LoggingState) {
        let mut m = machine(vec![]);
        m.replica.protocol = protocol;
        m.replica.data_mode = data_mode;
        m.replica.logging_state = logging_state;
        let mode = m.request_mode();
        match (protocol, data_mode, logging_state) {
            (ProtocolType::DirSync, ..) => assert!(matches!(mode, RequestMode::DirSync { .. })),
            (_, DataMode::ChangeLog, LoggingState::Logging) => {
                assert!(matches!(mode, RequestMode::RetroChangeLog { .. }))
            }
            _ => assert!(matches!(mode, RequestMode::ContentSync { .. })),
        }
    }

    #[test]
    fn shutdown_flag_ends_the_session_immediately() {
        let mut m = machine(vec![]);
        let backend = FakeBackend::default();
        let cookies = CookieState::new(Cookie::empty());
        let shutdown = AtomicBool::new(true);
        let outcome = m.step(&backend, &cookies, &shutdown);
        assert_eq!(outcome, SessionOutcome::Shutdown);
        assert_eq!(m.state(), SessionState::Shutdown);
    }
}
