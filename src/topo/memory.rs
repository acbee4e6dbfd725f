//! In-process coordination store
//!
//! Backs tests and single-process deployments. Records live in mutexed
//! maps; inbox and outcome waiters are woken through `tokio::sync::Notify`
//! and re-check state, so a wakeup lost to a race only costs one loop
//! iteration.

use crate::common::{timestamp_now, Error, Result};
use crate::topo::{
    shard_key, ActionOutcome, ActionRequest, NodeIdentity, NodeRecord, ShardRecord, TopoStore,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryTopoStore {
    shards: Mutex<HashMap<String, ShardRecord>>,
    nodes: Mutex<HashMap<String, NodeRecord>>,
    locks: Mutex<HashSet<String>>,
    inboxes: Mutex<HashMap<String, VecDeque<ActionRequest>>>,
    outcomes: Mutex<HashMap<Uuid, ActionOutcome>>,
    inbox_notify: Notify,
    outcome_notify: Notify,
}

impl MemoryTopoStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn front_of_inbox(&self, node: &NodeIdentity) -> Option<ActionRequest> {
        let inboxes = self.inboxes.lock().unwrap();
        inboxes.get(&node.key()).and_then(|q| q.front().cloned())
    }
}

#[async_trait]
impl TopoStore for MemoryTopoStore {
    async fn create_shard(&self, record: &ShardRecord) -> Result<()> {
        let mut shards = self.shards.lock().unwrap();
        if shards.contains_key(&record.key()) {
            return Err(Error::AlreadyExists(format!("shard {}", record.key())));
        }
        shards.insert(record.key(), record.clone());
        Ok(())
    }

    async fn get_shard(&self, keyspace: &str, shard: &str) -> Result<ShardRecord> {
        let shards = self.shards.lock().unwrap();
        shards
            .get(&shard_key(keyspace, shard))
            .cloned()
            .ok_or_else(|| Error::ShardNotFound {
                keyspace: keyspace.to_string(),
                shard: shard.to_string(),
            })
    }

    async fn set_shard_primary(
        &self,
        keyspace: &str,
        shard: &str,
        primary: &NodeIdentity,
    ) -> Result<ShardRecord> {
        let mut shards = self.shards.lock().unwrap();
        let record = shards
            .get_mut(&shard_key(keyspace, shard))
            .ok_or_else(|| Error::ShardNotFound {
                keyspace: keyspace.to_string(),
                shard: shard.to_string(),
            })?;
        record.primary = Some(primary.clone());
        record.updated_at = timestamp_now();
        Ok(record.clone())
    }

    async fn create_node(&self, record: &NodeRecord) -> Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&record.id.key()) {
            return Err(Error::AlreadyExists(format!("node {}", record.id)));
        }
        nodes.insert(record.id.key(), record.clone());
        Ok(())
    }

    async fn get_node(&self, id: &NodeIdentity) -> Result<NodeRecord> {
        let nodes = self.nodes.lock().unwrap();
        nodes
            .get(&id.key())
            .cloned()
            .ok_or_else(|| Error::NodeNotFound(id.clone()))
    }

    async fn put_node(&self, record: &NodeRecord) -> Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        nodes.insert(record.id.key(), record.clone());
        Ok(())
    }

    async fn list_shard_nodes(&self, keyspace: &str, shard: &str) -> Result<Vec<NodeRecord>> {
        let nodes = self.nodes.lock().unwrap();
        let mut records: Vec<NodeRecord> = nodes
            .values()
            .filter(|n| n.in_shard(keyspace, shard))
            .cloned()
            .collect();
        records.sort_by_key(|n| n.id.key());
        Ok(records)
    }

    async fn lock_shard(&self, keyspace: &str, shard: &str) -> Result<()> {
        let mut locks = self.locks.lock().unwrap();
        if !locks.insert(shard_key(keyspace, shard)) {
            return Err(Error::ShardLocked {
                keyspace: keyspace.to_string(),
                shard: shard.to_string(),
            });
        }
        Ok(())
    }

    async fn unlock_shard(&self, keyspace: &str, shard: &str) -> Result<()> {
        let mut locks = self.locks.lock().unwrap();
        locks.remove(&shard_key(keyspace, shard));
        Ok(())
    }

    async fn enqueue_action(&self, request: &ActionRequest) -> Result<()> {
        {
            let mut inboxes = self.inboxes.lock().unwrap();
            inboxes
                .entry(request.node.key())
                .or_default()
                .push_back(request.clone());
        }
        self.inbox_notify.notify_waiters();
        Ok(())
    }

    async fn next_action(
        &self,
        node: &NodeIdentity,
        wait: Duration,
    ) -> Result<Option<ActionRequest>> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before checking, so an enqueue between the
            // check and the await still wakes us.
            let notified = self.inbox_notify.notified();
            if let Some(request) = self.front_of_inbox(node) {
                return Ok(Some(request));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack_action(&self, node: &NodeIdentity, request_id: Uuid) -> Result<()> {
        let mut inboxes = self.inboxes.lock().unwrap();
        if let Some(queue) = inboxes.get_mut(&node.key()) {
            queue.retain(|r| r.id != request_id);
        }
        Ok(())
    }

    async fn report_outcome(&self, outcome: &ActionOutcome) -> Result<()> {
        {
            let mut outcomes = self.outcomes.lock().unwrap();
            outcomes.insert(outcome.request_id, outcome.clone());
        }
        self.outcome_notify.notify_waiters();
        Ok(())
    }

    async fn wait_outcome(
        &self,
        request_id: Uuid,
        wait: Duration,
    ) -> Result<Option<ActionOutcome>> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.outcome_notify.notified();
            {
                let outcomes = self.outcomes.lock().unwrap();
                if let Some(outcome) = outcomes.get(&request_id) {
                    return Ok(Some(outcome.clone()));
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}
