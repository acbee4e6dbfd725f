//! Coordination store boundary
//!
//! The trait below is the full contract the orchestrator and the node action
//! loops need from the coordination store: shard/node records keyed by
//! (keyspace, shard) and node identity, a per-node action inbox with
//! at-least-once delivery and per-node FIFO ordering, and outcome
//! subscription with a caller-supplied timeout.
//!
//! Two implementations ship with the crate: [`MemoryTopoStore`] for tests
//! and single-process deployments, and [`RocksTopoStore`] for durable
//! topology.
//!
//! [`MemoryTopoStore`]: crate::topo::memory::MemoryTopoStore
//! [`RocksTopoStore`]: crate::topo::rocks::RocksTopoStore

use crate::common::Result;
use crate::topo::{ActionOutcome, ActionRequest, NodeIdentity, NodeRecord, ShardRecord};
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait TopoStore: Send + Sync {
    // === Shard records ===

    /// Register a new shard. Fails if it already exists.
    async fn create_shard(&self, record: &ShardRecord) -> Result<()>;

    async fn get_shard(&self, keyspace: &str, shard: &str) -> Result<ShardRecord>;

    /// Atomically set the shard's primary alias (single read-modify-write).
    async fn set_shard_primary(
        &self,
        keyspace: &str,
        shard: &str,
        primary: &NodeIdentity,
    ) -> Result<ShardRecord>;

    // === Node records ===

    /// Register a new node. Fails if it already exists; nodes are never
    /// deleted by this crate.
    async fn create_node(&self, record: &NodeRecord) -> Result<()>;

    async fn get_node(&self, id: &NodeIdentity) -> Result<NodeRecord>;

    async fn put_node(&self, record: &NodeRecord) -> Result<()>;

    /// All node records belonging to a shard.
    async fn list_shard_nodes(&self, keyspace: &str, shard: &str) -> Result<Vec<NodeRecord>>;

    // === Shard lock ===

    /// Take the per-shard operation lock. A second caller gets
    /// `Error::ShardLocked` rather than queueing.
    async fn lock_shard(&self, keyspace: &str, shard: &str) -> Result<()>;

    async fn unlock_shard(&self, keyspace: &str, shard: &str) -> Result<()>;

    // === Action inbox ===

    /// Enqueue an action addressed to one node (at-least-once, per-node
    /// FIFO).
    async fn enqueue_action(&self, request: &ActionRequest) -> Result<()>;

    /// Front of the node's inbox, blocking up to `wait` for one to arrive.
    /// The entry stays queued until [`TopoStore::ack_action`]; a crashed
    /// consumer sees it again.
    async fn next_action(&self, node: &NodeIdentity, wait: Duration)
        -> Result<Option<ActionRequest>>;

    /// Remove a delivered action from the node's inbox.
    async fn ack_action(&self, node: &NodeIdentity, request_id: Uuid) -> Result<()>;

    // === Action outcomes ===

    /// Best-effort completion report, correlated by request id.
    async fn report_outcome(&self, outcome: &ActionOutcome) -> Result<()>;

    /// Wait up to `wait` for the outcome of one request. `Ok(None)` means
    /// the bound elapsed; the caller classifies that, it is not a transport
    /// error.
    async fn wait_outcome(&self, request_id: Uuid, wait: Duration) -> Result<Option<ActionOutcome>>;
}
