//! # shardpilot
//!
//! Coordination of **external master failover** for a sharded, replicated
//! relational data store. Some outside process elects and promotes a new
//! primary at the database level; shardpilot makes the cluster agree:
//! - validates the request against recorded topology
//! - tells the promoted node to finalize its role
//! - re-points every other node's replication stream, concurrently
//! - tolerates and reports nodes that fail to follow
//! - durably commits the new topology
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Admin daemon                 │
//! │  Reparenter + topology store (RocksDB)  │
//! │  HTTP API for operators / automation    │
//! └───────────┬─────────────────────────────┘
//!             │ per-node action inbox (FIFO, at-least-once)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌────▼───────┐   ┌──▼───────────┐
//! │ ActionLoop │   │ ActionLoop │   │ ActionLoop   │
//! │ (node 100) │   │ (node 101) │   │ (node 102)   │
//! │  + local db│   │  + local db│   │  + local db  │
//! └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the admin daemon
//! ```bash
//! shardpilot-admin serve --bind 0.0.0.0:7000 --db ./topo-data
//! ```
//!
//! ### Use the CLI
//! ```bash
//! # Inspect a shard
//! shardpilot topology --keyspace test_keyspace --shard 0
//!
//! # Reparent to an already-promoted candidate
//! shardpilot reparent --keyspace test_keyspace --shard 0 \
//!   --cell cell1 --uid 101 --timeout 60s
//! ```

pub mod agent;
pub mod common;
pub mod orchestrator;
pub mod topo;

// Re-export commonly used types
pub use agent::{ActionLoop, DatabaseDaemon, FakeDaemon};
pub use common::{Config, Error, Result};
pub use orchestrator::{AdminServer, Reparenter};
pub use topo::{
    MemoryTopoStore, NodeIdentity, NodeRecord, NodeRole, RocksTopoStore, ServingState,
    ShardRecord, TopoStore,
};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
