//! Resolves parsed [`ReplicaDirective`]s into the state
//! [`syncrepl_session::SessionMachine`] needs (spec §3 "Replica state",
//! §6 "Configuration surface").

use syncrepl_config::ReplicaDirective;
use syncrepl_session::ReplicaState;
use syncrepl_types::{ReplicaDisplay, Rid};

/// One directive resolved into the pieces [`crate::runtime::build_task`]
/// needs: the session's initial state plus the local-database DNs the
/// directive only specifies implicitly (through `suffixmassage`, or
/// falling back to `searchbase` when the local database shares its
/// provider's naming context).
pub struct ResolvedReplica {
    pub replica_state: ReplicaState,
    /// Local search base for entryUUID lookups (spec §4.2/§4.3).
    pub base: String,
    /// Local naming-context suffix; glue-ancestor cleanup stops here
    /// (spec §4.3 "delete").
    pub suffix: String,
    /// DN of the context entry the cookie persistor reads/writes (spec
    /// §4.8): the root of the locally synced subtree.
    pub context_dn: String,
}

pub fn resolve(directive: ReplicaDirective) -> ResolvedReplica {
    let local_suffix = directive
        .suffix_rewrite
        .as_ref()
        .map(|r| r.to.clone())
        .unwrap_or_else(|| directive.search.base.clone());

    let rid = Rid::new(directive.rid);
    let display = ReplicaDisplay::new(rid, &directive.provider);

    let mut replica_state = ReplicaState::new(
        rid,
        display,
        directive.protocol,
        directive.syncdata,
        directive.interval,
        directive.search,
        directive.retry,
    );
    replica_state.suffix_rewrite = directive.suffix_rewrite;
    replica_state.strictrefresh = directive.strictrefresh;
    replica_state.log_base = directive.log_base;
    replica_state.log_filter = directive.log_filter;

    ResolvedReplica {
        replica_state,
        base: local_suffix.clone(),
        suffix: local_suffix.clone(),
        context_dn: local_suffix,
    }
}
