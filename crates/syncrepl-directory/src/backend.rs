use syncrepl_types::{EntryUuid, ModList};

/// The local directory database, assumed as an external library exposing
/// transactional search/add/modify/modrename/delete/attribute-get calls.
/// The entry reconciler is generic over this trait so its dispatch logic
/// is unit-testable against an in-memory fake rather than a real LDAP
/// server.
pub trait DirectoryBackend {
    /// Subtree search by `(entryUUID = uuid)` at `base`, limit 1.
    fn search_by_uuid(&self, base: &str, uuid: &EntryUuid) -> Result<Option<LocalEntry>, BackendError>;
    fn search_by_dn(&self, dn: &str) -> Result<Option<LocalEntry>, BackendError>;
    fn add(&self, dn: &str, attributes: Vec<(String, Vec<Vec<u8>>)>) -> Result<(), BackendError>;
    fn modify(&self, dn: &str, mods: &ModList) -> Result<(), BackendError>;
    fn modrename(
        &self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
        mods: &ModList,
    ) -> Result<(), BackendError>;
    fn delete(&self, dn: &str) -> Result<(), BackendError>;
    fn get_attribute(&self, dn: &str, attr: &str) -> Result<Vec<Vec<u8>>, BackendError>;
}

/// A materialized local entry, as returned by [`DirectoryBackend::search_by_uuid`]
/// or [`DirectoryBackend::search_by_dn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub dn: String,
    pub uuid: Option<EntryUuid>,
    pub attributes: Vec<(String, Vec<Vec<u8>>)>,
}

impl LocalEntry {
    pub fn attribute(&self, name: &str) -> Option<&[Vec<u8>]> {
        self.attributes
            .iter()
            .find(|(a, _)| a.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("no such object: {dn}")]
    NoSuchObject { dn: String },
    #[error("already exists: {dn}")]
    AlreadyExists { dn: String },
    #[error("referral for {dn}: {uris:?}")]
    Referral { dn: String, uris: Vec<String> },
    #[error("not empty: {dn}")]
    NotEmpty { dn: String },
    #[error("backend error for {dn}: {detail}")]
    Other { dn: String, detail: String },
}
