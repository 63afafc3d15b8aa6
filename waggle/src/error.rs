use thiserror::Error;

/// Errors surfaced by the shard engine.
///
/// Variants discriminate the failure kinds callers react to: `NotFound` and
/// `AlreadyExists` are surfaced verbatim, `InvalidParameter` aborts the
/// operation, `Timeout` covers lock acquisition deadlines, and `Corrupted`
/// marks the shard unusable.
#[derive(Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("corrupted shard state: {0}")]
    Corrupted(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for faults that leave the shard unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Corrupted(_) | Error::Store(_))
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(err: redb::DatabaseError) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(err: redb::TransactionError) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<redb::TableError> for Error {
    fn from(err: redb::TableError) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<redb::StorageError> for Error {
    fn from(err: redb::StorageError) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<redb::CommitError> for Error {
    fn from(err: redb::CommitError) -> Self {
        Error::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
