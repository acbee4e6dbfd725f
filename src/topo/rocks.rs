//! Durable coordination store over RocksDB
//!
//! Column families:
//! - `shards`: shard records, keyed by "keyspace/shard"
//! - `nodes`: node records, keyed by "cell-uid"
//! - `actions`: per-node inbox, keyed by "cell-uid/<seq>" so a prefix scan
//!   yields FIFO order; entries stay until acked (at-least-once across
//!   restarts)
//! - `outcomes`: action outcomes keyed by request id
//!
//! Inbox and outcome wakeups are in-process (`Notify`); so is the shard
//! lock. The admin daemon is the single topology writer per deployment.

use crate::common::{timestamp_now, Error, Result};
use crate::topo::{
    shard_key, ActionOutcome, ActionRequest, NodeIdentity, NodeRecord, ShardRecord, TopoStore,
};
use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

const CF_SHARDS: &str = "shards";
const CF_NODES: &str = "nodes";
const CF_ACTIONS: &str = "actions";
const CF_OUTCOMES: &str = "outcomes";

pub struct RocksTopoStore {
    db: DB,
    /// Serializes shard record read-modify-writes
    shard_write: Mutex<()>,
    locks: Mutex<HashSet<String>>,
    action_seq: AtomicU64,
    inbox_notify: Notify,
    outcome_notify: Notify,
}

impl RocksTopoStore {
    /// Open or create the topology store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(
            &opts,
            path,
            vec![CF_SHARDS, CF_NODES, CF_ACTIONS, CF_OUTCOMES],
        )?;

        let next_seq = highest_action_seq(&db)? + 1;

        Ok(Self {
            db,
            shard_write: Mutex::new(()),
            locks: Mutex::new(HashSet::new()),
            action_seq: AtomicU64::new(next_seq),
            inbox_notify: Notify::new(),
            outcome_notify: Notify::new(),
        })
    }

    fn front_of_inbox(&self, node: &NodeIdentity) -> Result<Option<ActionRequest>> {
        let cf = self.db.cf_handle(CF_ACTIONS).unwrap();
        let prefix = format!("{}/", node.key());
        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        match iter.next() {
            Some(item) => {
                let (key, value) = item?;
                if !key.starts_with(prefix.as_bytes()) {
                    return Ok(None);
                }
                let request: ActionRequest = bincode::deserialize(&value)
                    .map_err(|e| Error::TopoCorrupted(e.to_string()))?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }
}

/// Scan the actions column family for the highest sequence suffix in use.
fn highest_action_seq(db: &DB) -> Result<u64> {
    let cf = db.cf_handle(CF_ACTIONS).unwrap();
    let mut highest = 0u64;
    for item in db.iterator_cf(cf, IteratorMode::Start) {
        let (key, _) = item?;
        let key = String::from_utf8(key.to_vec())
            .map_err(|_| Error::TopoCorrupted("invalid UTF-8 action key".into()))?;
        if let Some((_, seq)) = key.rsplit_once('/') {
            let seq: u64 = seq
                .parse()
                .map_err(|_| Error::TopoCorrupted(format!("bad action key: {}", key)))?;
            highest = highest.max(seq);
        }
    }
    Ok(highest)
}

#[async_trait]
impl TopoStore for RocksTopoStore {
    async fn create_shard(&self, record: &ShardRecord) -> Result<()> {
        let _guard = self.shard_write.lock().unwrap();
        let cf = self.db.cf_handle(CF_SHARDS).unwrap();
        if self.db.get_cf(cf, record.key().as_bytes())?.is_some() {
            return Err(Error::AlreadyExists(format!("shard {}", record.key())));
        }
        let value = bincode::serialize(record)
            .map_err(|e| Error::Internal(format!("serialize error: {}", e)))?;
        self.db.put_cf(cf, record.key().as_bytes(), value)?;
        Ok(())
    }

    async fn get_shard(&self, keyspace: &str, shard: &str) -> Result<ShardRecord> {
        let cf = self.db.cf_handle(CF_SHARDS).unwrap();
        match self.db.get_cf(cf, shard_key(keyspace, shard).as_bytes())? {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| Error::TopoCorrupted(e.to_string()))
            }
            None => Err(Error::ShardNotFound {
                keyspace: keyspace.to_string(),
                shard: shard.to_string(),
            }),
        }
    }

    async fn set_shard_primary(
        &self,
        keyspace: &str,
        shard: &str,
        primary: &NodeIdentity,
    ) -> Result<ShardRecord> {
        let _guard = self.shard_write.lock().unwrap();
        let cf = self.db.cf_handle(CF_SHARDS).unwrap();
        let key = shard_key(keyspace, shard);
        let mut record: ShardRecord = match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| Error::TopoCorrupted(e.to_string()))?
            }
            None => {
                return Err(Error::ShardNotFound {
                    keyspace: keyspace.to_string(),
                    shard: shard.to_string(),
                })
            }
        };
        record.primary = Some(primary.clone());
        record.updated_at = timestamp_now();
        let value = bincode::serialize(&record)
            .map_err(|e| Error::Internal(format!("serialize error: {}", e)))?;
        self.db.put_cf(cf, key.as_bytes(), value)?;
        Ok(record)
    }

    async fn create_node(&self, record: &NodeRecord) -> Result<()> {
        let cf = self.db.cf_handle(CF_NODES).unwrap();
        if self.db.get_cf(cf, record.id.key().as_bytes())?.is_some() {
            return Err(Error::AlreadyExists(format!("node {}", record.id)));
        }
        let value = bincode::serialize(record)
            .map_err(|e| Error::Internal(format!("serialize error: {}", e)))?;
        self.db.put_cf(cf, record.id.key().as_bytes(), value)?;
        Ok(())
    }

    async fn get_node(&self, id: &NodeIdentity) -> Result<NodeRecord> {
        let cf = self.db.cf_handle(CF_NODES).unwrap();
        match self.db.get_cf(cf, id.key().as_bytes())? {
            Some(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| Error::TopoCorrupted(e.to_string()))
            }
            None => Err(Error::NodeNotFound(id.clone())),
        }
    }

    async fn put_node(&self, record: &NodeRecord) -> Result<()> {
        let cf = self.db.cf_handle(CF_NODES).unwrap();
        let value = bincode::serialize(record)
            .map_err(|e| Error::Internal(format!("serialize error: {}", e)))?;
        self.db.put_cf(cf, record.id.key().as_bytes(), value)?;
        Ok(())
    }

    async fn list_shard_nodes(&self, keyspace: &str, shard: &str) -> Result<Vec<NodeRecord>> {
        let cf = self.db.cf_handle(CF_NODES).unwrap();
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let record: NodeRecord =
                bincode::deserialize(&value).map_err(|e| Error::TopoCorrupted(e.to_string()))?;
            if record.in_shard(keyspace, shard) {
                records.push(record);
            }
        }
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
        let cf = self.db.cf_handle(CF_ACTIONS).unwrap();
        let seq = self.action_seq.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}/{:020}", request.node.key(), seq);
        let value = bincode::serialize(request)
            .map_err(|e| Error::Internal(format!("serialize error: {}", e)))?;
        self.db.put_cf(cf, key.as_bytes(), value)?;
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
            let notified = self.inbox_notify.notified();
            if let Some(request) = self.front_of_inbox(node)? {
                return Ok(Some(request));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack_action(&self, node: &NodeIdentity, request_id: Uuid) -> Result<()> {
        let cf = self.db.cf_handle(CF_ACTIONS).unwrap();
        let prefix = format!("{}/", node.key());
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let request: ActionRequest =
                bincode::deserialize(&value).map_err(|e| Error::TopoCorrupted(e.to_string()))?;
            if request.id == request_id {
                self.db.delete_cf(cf, key)?;
                return Ok(());
            }
        }
        Ok(())
    }

    async fn report_outcome(&self, outcome: &ActionOutcome) -> Result<()> {
        let cf = self.db.cf_handle(CF_OUTCOMES).unwrap();
        let value = bincode::serialize(outcome)
            .map_err(|e| Error::Internal(format!("serialize error: {}", e)))?;
        self.db.put_cf(cf, outcome.request_id.as_bytes(), value)?;
        self.outcome_notify.notify_waiters();
        Ok(())
    }

    async fn wait_outcome(
        &self,
        request_id: Uuid,
        wait: Duration,
    ) -> Result<Option<ActionOutcome>> {
        let cf = self.db.cf_handle(CF_OUTCOMES).unwrap();
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.outcome_notify.notified();
            if let Some(bytes) = self.db.get_cf(cf, request_id.as_bytes())? {
                let outcome: ActionOutcome = bincode::deserialize(&bytes)
                    .map_err(|e| Error::TopoCorrupted(e.to_string()))?;
                return Ok(Some(outcome));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}
