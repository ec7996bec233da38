//! # syncrepl-persist: cookie persistor (component H, spec §4.8)
//!
//! Reads and writes the context-entry attributes that survive a restart:
//! `contextCSN` (the committed cookie vector, one value per sid),
//! `dirSyncCookie` (an opaque DirSync blob), and `lastChangeNumber` (the
//! retro-change-log high-water mark). Writes go through
//! [`DirectoryBackend::modify`] directly rather than through
//! [`syncrepl_directory::reconcile`] -- the backend is expected to route a
//! context-entry write around its own replication pipeline the way the
//! original consumer's internal modify call does, so the write is not
//! echoed back to this consumer as an incoming change (spec §4.8).

use syncrepl_directory::{BackendError, DirectoryBackend};
use syncrepl_types::{Csn, ModList, Modification, ModOp, Sid, SyncreplError};

/// Attribute names on the context entry (spec §6 "Persisted state").
pub const CONTEXT_CSN_ATTR: &str = "contextCSN";
pub const DIRSYNC_COOKIE_ATTR: &str = "dirSyncCookie";
pub const LAST_CHANGE_NUMBER_ATTR: &str = "lastChangeNumber";

/// What was read back from the context entry at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    pub committed_csns: Vec<Csn>,
    pub dirsync_cookie: Option<Vec<u8>>,
    pub last_change_number: Option<u64>,
}

/// Reads and writes one context entry's persisted replication state.
pub struct CookiePersistor {
    context_dn: String,
}

impl CookiePersistor {
    pub fn new(context_dn: impl Into<String>) -> Self {
        Self {
            context_dn: context_dn.into(),
        }
    }

    /// Reads every persisted attribute at startup (spec §4.8 "Reads the
    /// context-entry attribute holding the committed cookie at startup").
    /// Malformed individual CSN values are skipped rather than failing the
    /// whole read -- a single corrupt value should not block startup when
    /// the others are still usable.
    pub fn load<B: DirectoryBackend>(&self, backend: &B) -> Result<PersistedState, SyncreplError> {
        let csn_values = self
            .get_attribute(backend, CONTEXT_CSN_ATTR)
            .map_err(|e| self.to_error(e, &self.context_dn))?;
        let committed_csns = csn_values
            .iter()
            .filter_map(|v| std::str::from_utf8(v).ok())
            .filter_map(|s| match s.parse::<Csn>() {
                Ok(csn) => Some(csn),
                Err(err) => {
                    tracing::warn!(dn = %self.context_dn, error = %err, "skipping malformed contextCSN value");
                    None
                }
            })
            .collect();

        let dirsync_values = self
            .get_attribute(backend, DIRSYNC_COOKIE_ATTR)
            .map_err(|e| self.to_error(e, &self.context_dn))?;
        let dirsync_cookie = dirsync_values.into_iter().next();

        let change_number_values = self
            .get_attribute(backend, LAST_CHANGE_NUMBER_ATTR)
            .map_err(|e| self.to_error(e, &self.context_dn))?;
        let last_change_number = change_number_values
            .first()
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.parse::<u64>().ok());

        Ok(PersistedState {
            committed_csns,
            dirsync_cookie,
            last_change_number,
        })
    }

    /// Writes the full committed cookie vector back atomically: one
    /// `replace` modification carrying every sid's CSN as a separate value
    /// (spec §4.8: "the persistor writes them all atomically").
    pub fn store_committed_csns<B: DirectoryBackend>(
        &self,
        backend: &B,
        csns: &[Csn],
    ) -> Result<(), SyncreplError> {
        let mut mod_ = Modification::new(ModOp::Replace, CONTEXT_CSN_ATTR);
        for csn in csns {
            mod_ = mod_.with_value(csn.to_string());
        }
        self.apply(backend, mod_)
    }

    /// Writes a single sid's CSN without touching the others -- used when a
    /// session only knows its own sid's committed CSN advanced (spec §4.1
    /// "merge"), leaving atomic whole-vector writes to [`Self::store_committed_csns`]
    /// for callers that hold the full vector.
    pub fn store_committed_csn<B: DirectoryBackend>(
        &self,
        backend: &B,
        sid: Sid,
        csn: Csn,
    ) -> Result<(), SyncreplError> {
        let _ = sid;
        self.apply(
            backend,
            Modification::new(ModOp::Add, CONTEXT_CSN_ATTR).with_value(csn.to_string()),
        )
    }

    pub fn store_dirsync_cookie<B: DirectoryBackend>(
        &self,
        backend: &B,
        blob: &[u8],
    ) -> Result<(), SyncreplError> {
        self.apply(
            backend,
            Modification::new(ModOp::Replace, DIRSYNC_COOKIE_ATTR).with_value(blob.to_vec()),
        )
    }

    pub fn store_last_change_number<B: DirectoryBackend>(
        &self,
        backend: &B,
        change_number: u64,
    ) -> Result<(), SyncreplError> {
        self.apply(
            backend,
            Modification::new(ModOp::Replace, LAST_CHANGE_NUMBER_ATTR)
                .with_value(change_number.to_string()),
        )
    }

    fn apply<B: DirectoryBackend>(&self, backend: &B, modification: Modification) -> Result<(), SyncreplError> {
        let mods: ModList = vec![modification];
        backend
            .modify(&self.context_dn, &mods)
            .map_err(|e| self.to_error(e, &self.context_dn))
    }

    fn get_attribute<B: DirectoryBackend>(
        &self,
        backend: &B,
        attr: &str,
    ) -> Result<Vec<Vec<u8>>, BackendError> {
        backend.get_attribute(&self.context_dn, attr)
    }

    fn to_error(&self, err: BackendError, dn: &str) -> SyncreplError {
        SyncreplError::Configuration(format!("context entry {dn}: {err}"))
    }
}
