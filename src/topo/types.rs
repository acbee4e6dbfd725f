//! Topology record types
//!
//! Records are owned by the coordination store:
//! - `ShardRecord` names the node currently considered primary for a shard
//! - `NodeRecord` describes one managed node (role, serving state, parent,
//!   endpoints)
//!
//! The orchestrator mutates role/parent fields during a reparent; each
//! node's own action handler maintains its self-describing fields.

use crate::common::timestamp_now;
use serde::{Deserialize, Serialize};

/// Globally unique node address: (cell, numeric id).
///
/// Immutable once assigned; used as the addressing key into the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub cell: String,
    pub uid: u32,
}

impl NodeIdentity {
    pub fn new(cell: impl Into<String>, uid: u32) -> Self {
        Self {
            cell: cell.into(),
            uid,
        }
    }

    /// Storage key for this node ("cell-uid").
    pub fn key(&self) -> String {
        format!("{}-{}", self.cell, self.uid)
    }
}

impl std::fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.cell, self.uid)
    }
}

/// Node role within a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    Replica,
    Spare,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Replica => write!(f, "replica"),
            NodeRole::Spare => write!(f, "spare"),
        }
    }
}

/// Serving state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingState {
    ReadWrite,
    ReadOnly,
}

/// Shard metadata
///
/// Invariant: at most one primary alias per shard at any committed point in
/// time. Mutated only through `TopoStore::set_shard_primary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardRecord {
    pub keyspace: String,
    pub shard: String,
    pub primary: Option<NodeIdentity>,
    pub updated_at: u64,
}

impl ShardRecord {
    pub fn new(keyspace: impl Into<String>, shard: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            shard: shard.into(),
            primary: None,
            updated_at: timestamp_now(),
        }
    }

    /// Storage key for this shard ("keyspace/shard").
    pub fn key(&self) -> String {
        shard_key(&self.keyspace, &self.shard)
    }
}

/// Storage key for a (keyspace, shard) pair
pub fn shard_key(keyspace: &str, shard: &str) -> String {
    format!("{}/{}", keyspace, shard)
}

/// Node metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeIdentity,
    pub keyspace: String,
    pub shard: String,
    pub role: NodeRole,
    pub serving: ServingState,
    /// The primary this node replicates from, if any
    pub parent: Option<NodeIdentity>,
    /// Control endpoint (agent RPC)
    pub addr: String,
    /// Replication endpoint (what replicas of this node point at)
    pub db_addr: String,
    pub updated_at: u64,
}

impl NodeRecord {
    pub fn is_primary(&self) -> bool {
        self.role == NodeRole::Primary
    }

    pub fn in_shard(&self, keyspace: &str, shard: &str) -> bool {
        self.keyspace == keyspace && self.shard == shard
    }
}
