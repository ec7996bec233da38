//! Per-replica state (spec §3 "Replica state") and the session state
//! machine's named states (spec §4.6).

use std::time::Duration;

use syncrepl_types::{
    Cookie, DataMode, LoggingState, ProtocolType, ReplicaDisplay, Rid, RetrySchedule, SearchParams,
};

use syncrepl_modbuilder::SuffixRewrite;

/// States of one replica's session (spec §4.6). `RetryWait`, `Shutdown`,
/// and `Paused` are reachable from any non-closed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticating,
    Searching,
    Refreshing,
    RefreshDone,
    Persisting,
    Draining,
    Closed,
    RetryWait,
    Shutdown,
    Paused,
}

/// Everything one replica's session needs across restarts (spec §3).
/// Guarded by a per-replica mutex at the scheduler layer; the session
/// machine itself assumes exclusive access (one pool thread per session
/// at a time, spec §5).
pub struct ReplicaState {
    pub rid: Rid,
    pub replica: ReplicaDisplay,
    pub protocol: ProtocolType,
    pub data_mode: DataMode,
    pub logging_state: LoggingState,
    /// The cookie this replica last sent to / received from the provider,
    /// distinct from the shared [`syncrepl_csn::CookieState`] committed
    /// vector (spec §3: "session cookie").
    pub wire_cookie: Cookie,
    pub outstanding_message_id: Option<i32>,
    pub retry_schedule: RetrySchedule,
    /// Kept so [`RetrySchedule::reset`] can restore the original budget
    /// after a completed refresh (spec §4.6 "Retry").
    pub retry_schedule_template: RetrySchedule,
    pub interval: Duration,
    pub search: SearchParams,
    pub suffix_rewrite: Option<SuffixRewrite>,
    pub dirsync_cookie: Option<Vec<u8>>,
    pub retro_changelog_high_water: Option<u64>,
    /// Set by a DirSync `continueFlag=true` end-of-batch marker: the
    /// scheduler should re-poll immediately rather than waiting out the
    /// configured interval (spec §8 scenario 6).
    pub immediate_repoll: bool,
    pub strictrefresh: bool,
    /// Search base/filter for access-log mode (spec §6 `logbase`/`logfilter`).
    pub log_base: Option<String>,
    pub log_filter: Option<String>,
    /// Monotonic counter used to synthesize a [`syncrepl_types::Csn`] for
    /// delta sources that don't carry one on the wire (retro-change-log's
    /// `changeNumber`, DirSync's opaque cookie) so they can still flow
    /// through the shared freshness/commit machinery every other mode
    /// uses.
    pub apply_sequence: u32,
    /// The delay `retry_schedule.advance()` returned the last time a
    /// transport or protocol failure entered `RetryWait`, so a scheduler
    /// driving this machine through [`crate::SessionMachine::step`] can
    /// read the wait without advancing the schedule a second time.
    pub last_retry_delay: Option<Duration>,
}

impl ReplicaState {
    pub fn new(
        rid: Rid,
        replica: ReplicaDisplay,
        protocol: ProtocolType,
        data_mode: DataMode,
        interval: Duration,
        search: SearchParams,
        retry_schedule: RetrySchedule,
    ) -> Self {
        Self {
            rid,
            replica,
            protocol,
            data_mode,
            logging_state: LoggingState::Logging,
            wire_cookie: Cookie::empty(),
            outstanding_message_id: None,
            retry_schedule_template: retry_schedule.clone(),
            retry_schedule,
            interval,
            search,
            suffix_rewrite: None,
            dirsync_cookie: None,
            retro_changelog_high_water: None,
            immediate_repoll: false,
            strictrefresh: false,
            log_base: None,
            log_filter: None,
            apply_sequence: 0,
            last_retry_delay: None,
        }
    }

    /// Whether this replica's protocol keeps one connection open past
    /// refresh-done rather than disconnecting and re-polling on the next
    /// interval. DirSync is cookie-driven batch polling, not a kept-open
    /// stream (spec §8 scenario 6's "next poll"), so only
    /// refresh-and-persist counts.
    pub fn is_persistent(&self) -> bool {
        matches!(self.protocol, ProtocolType::RefreshAndPersist)
    }

    /// Meaningful progress: a completed refresh reinitializes the retry
    /// budget (spec §4.6).
    pub fn note_progress(&mut self) {
        let template = self.retry_schedule_template.clone();
        self.retry_schedule.reset(&template);
    }
}
