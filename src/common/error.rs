//! Error types for shardpilot

use crate::topo::NodeIdentity;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

fn join_nodes(nodes: &[NodeIdentity]) -> String {
    nodes
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Topology Errors ===
    #[error("shard not found: {keyspace}/{shard}")]
    ShardNotFound { keyspace: String, shard: String },

    #[error("node not found: {0}")]
    NodeNotFound(NodeIdentity),

    #[error("node {node} does not belong to shard {keyspace}/{shard}")]
    NodeNotInShard {
        node: NodeIdentity,
        keyspace: String,
        shard: String,
    },

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("shard {keyspace}/{shard} is locked by another operation")]
    ShardLocked { keyspace: String, shard: String },

    #[error("topology corrupted: {0}")]
    TopoCorrupted(String),

    // === Reparent Errors ===
    #[error("node {0} is already the shard primary")]
    AlreadyPrimary(NodeIdentity),

    #[error("previous primary {0} has no topology record (use force to override)")]
    PreviousPrimaryMissing(NodeIdentity),

    #[error("promotion of {node} failed: {reason}")]
    PromotionFailed { node: NodeIdentity, reason: String },

    #[error("new primary committed, but nodes did not follow: {}", join_nodes(.lagging))]
    PartialReparent { lagging: Vec<NodeIdentity> },

    // === Store / Transport Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("operation timeout: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    // === Config Errors ===
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    ///
    /// Only transport-level failures toward the coordination store qualify;
    /// action outcomes (a node that did not follow) are never retryable here.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::StoreUnavailable(_)
        )
    }

    /// Convert to HTTP status code for the admin API
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::ShardNotFound { .. } | Error::NodeNotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyPrimary(_) | Error::ShardLocked { .. } | Error::AlreadyExists(_) => {
                StatusCode::CONFLICT
            }
            Error::NodeNotInShard { .. } | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::PreviousPrimaryMissing(_) => StatusCode::PRECONDITION_FAILED,
            // Topology was committed; only part of the shard converged.
            Error::PartialReparent { .. } => StatusCode::MULTI_STATUS,
            Error::PromotionFailed { .. } => StatusCode::BAD_GATEWAY,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::StoreUnavailable(_) | Error::ConnectionFailed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Implement From for common error types
impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
