use bastion_kv::KVError;
use thiserror::Error;

/// Permission resolution error type.
///
/// Only `UnknownSubjectKind`, `Storage` and `Config` reach callers of the
/// resolver. Cache and catalog problems are logged and recovered from.
#[derive(Debug, Error)]
pub enum PermsError {
    /// No rule query is registered for this subject kind.
    #[error("unknown subject kind: {0}")]
    UnknownSubjectKind(String),

    /// The cache backend could not be reached.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(#[from] KVError),

    /// A node or asset referenced by a rule no longer exists in the catalog.
    #[error("catalog inconsistency: {0}")]
    CatalogInconsistency(String),

    /// A cached tree could not be encoded or decoded.
    #[error("serialization: {0}")]
    Serialization(String),

    /// The grant rule store failed.
    #[error("storage: {0}")]
    Storage(String),

    /// Configuration could not be read or parsed.
    #[error("config: {0}")]
    Config(String),
}

pub type PermsResult<T> = Result<T, PermsError>;
