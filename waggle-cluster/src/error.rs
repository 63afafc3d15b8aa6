//! Cluster-specific error types.
//!
//! `ClusterError` crosses the RPC boundary, so it is serializable and
//! carries messages rather than source errors. The replica-write kinds
//! (`StaleData`, `Conflict`, `PartialSuccess`, `NoSuccess`) exist for the
//! placement contract: callers discriminate on them to decide retries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("stale data: {0}")]
    StaleData(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("partial success: {succeeded}/{attempted} replicas")]
    PartialSuccess { succeeded: usize, attempted: usize },

    #[error("no replica succeeded: {0}")]
    NoSuccess(String),

    #[error("shard error: {0}")]
    Shard(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClusterError {
    /// Short label for structured log fields.
    pub fn error_type(&self) -> &'static str {
        match self {
            ClusterError::NotFound(_) => "not_found",
            ClusterError::AlreadyExists(_) => "already_exists",
            ClusterError::InvalidRequest(_) => "invalid_request",
            ClusterError::Timeout(_) => "timeout",
            ClusterError::StaleData(_) => "stale_data",
            ClusterError::Conflict(_) => "conflict",
            ClusterError::PartialSuccess { .. } => "partial_success",
            ClusterError::NoSuccess(_) => "no_success",
            ClusterError::Shard(_) => "shard",
            ClusterError::Catalog(_) => "catalog",
            ClusterError::Transport(_) => "transport",
            ClusterError::Serialization(_) => "serialization",
        }
    }
}

impl From<waggle::Error> for ClusterError {
    fn from(err: waggle::Error) -> Self {
        match err {
            waggle::Error::NotFound(msg) => ClusterError::NotFound(msg),
            waggle::Error::AlreadyExists(msg) => ClusterError::AlreadyExists(msg),
            waggle::Error::InvalidParameter(msg) => ClusterError::InvalidRequest(msg),
            waggle::Error::Timeout(msg) => ClusterError::Timeout(msg),
            other => ClusterError::Shard(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ClusterError {
    fn from(err: std::io::Error) -> Self {
        ClusterError::Transport(err.to_string())
    }
}

impl From<bincode::Error> for ClusterError {
    fn from(err: bincode::Error) -> Self {
        ClusterError::Serialization(err.to_string())
    }
}

impl From<tarpc::client::RpcError> for ClusterError {
    fn from(err: tarpc::client::RpcError) -> Self {
        match err {
            tarpc::client::RpcError::DeadlineExceeded => {
                ClusterError::Timeout("rpc deadline exceeded".into())
            }
            other => ClusterError::Transport(other.to_string()),
        }
    }
}

impl From<redb::DatabaseError> for ClusterError {
    fn from(err: redb::DatabaseError) -> Self {
        ClusterError::Catalog(err.to_string())
    }
}

impl From<redb::TransactionError> for ClusterError {
    fn from(err: redb::TransactionError) -> Self {
        ClusterError::Catalog(err.to_string())
    }
}

impl From<redb::TableError> for ClusterError {
    fn from(err: redb::TableError) -> Self {
        ClusterError::Catalog(err.to_string())
    }
}

impl From<redb::StorageError> for ClusterError {
    fn from(err: redb::StorageError) -> Self {
        ClusterError::Catalog(err.to_string())
    }
}

impl From<redb::CommitError> for ClusterError {
    fn from(err: redb::CommitError) -> Self {
        ClusterError::Catalog(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
