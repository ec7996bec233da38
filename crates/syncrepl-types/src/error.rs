//! Error taxonomy (spec §7). Every variant names the propagation policy
//! that motivated it in its doc comment so a caller deciding how to react
//! doesn't have to cross-reference the spec table.

use crate::ids::ReplicaDisplay;

/// Errors surfaced by the apply pipeline (modification builder, conflict
/// resolver, entry reconciler, cookie persistor).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncreplError {
    /// TCP reset, TLS failure, bind failure. Policy: close session, retry-wait.
    #[error("[{replica}] transport down: {detail}")]
    TransportDown {
        replica: ReplicaDisplay,
        detail: String,
    },

    /// Incoming CSN <= committed for its sid. Policy: drop silently, count in monitor.
    #[error("[{replica}] stale message for sid {sid} (dn={dn})")]
    FreshnessStale {
        replica: ReplicaDisplay,
        sid: String,
        dn: String,
    },

    /// Malformed control, missing UUID, duplicate sync-state control.
    /// Policy: close session, retry-wait.
    #[error("[{replica}] protocol error: {detail}")]
    ProtocolError {
        replica: ReplicaDisplay,
        detail: String,
    },

    /// Provider signals the consumer is too far behind. Policy: switch to
    /// fallback full refresh; suspend listeners if `strictrefresh`.
    #[error("[{replica}] refresh required")]
    RefreshRequired { replica: ReplicaDisplay },

    /// `add` returned already-exists with a newer existing CSN. Policy:
    /// treat as success.
    #[error("[{replica}] apply conflict on {dn} treated as success")]
    ApplyConflict { replica: ReplicaDisplay, dn: String },

    /// `apply` returned no-such-object for an ancestor. Policy: synthesize
    /// glue ancestors, retry once.
    #[error("[{replica}] missing parent for {dn}")]
    MissingParent { replica: ReplicaDisplay, dn: String },

    /// no-such-object on add during the persist phase. Policy: clear
    /// cookie, force restart from empty state.
    #[error("[{replica}] local state drifted from provider, restarting")]
    StateDrift { replica: ReplicaDisplay },

    /// Pool pause or refresh-gate contention. Policy: cooperatively yield,
    /// re-queue at zero delay.
    #[error("[{replica}] paused")]
    Paused { replica: ReplicaDisplay },

    /// Global shutdown flag observed. Policy: abandon search, drop
    /// connection, exit without retry.
    #[error("[{replica}] shutting down")]
    Shutdown { replica: ReplicaDisplay },

    /// Missing required key or unparseable filter. Policy: reject at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// The sum-type result of processing one session-state-machine step (spec
/// §9 "Exception-like control flow"). Distinct from [`SyncreplError`]:
/// this is the control-flow signal the session dispatch loop matches on,
/// not a carrier for error detail (which is logged at the point of origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Success,
    Stale,
    TransportDown,
    ProtocolError,
    Shutdown,
    Paused,
    RefreshRequired,
}
