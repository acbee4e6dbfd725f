//! Topology model and coordination store
//!
//! Holds the shard/node records that describe cluster topology, plus the
//! per-node action inbox the orchestrator dispatches through.

pub mod actions;
pub mod memory;
pub mod rocks;
pub mod store;
pub mod types;

pub use actions::{ActionKind, ActionOutcome, ActionRequest};
pub use memory::MemoryTopoStore;
pub use rocks::RocksTopoStore;
pub use store::TopoStore;
pub use types::{shard_key, NodeIdentity, NodeRecord, NodeRole, ServingState, ShardRecord};
