//! Per-node action loop
//!
//! One loop runs per managed node, wherever that node's control process
//! lives. It watches the node's inbox through the store, executes each
//! action against the local database daemon, best-effort reports the
//! outcome, then acks. The orchestrator never invokes it directly.

use crate::agent::DatabaseDaemon;
use crate::common::timestamp_now;
use crate::topo::{
    ActionKind, ActionOutcome, ActionRequest, NodeIdentity, NodeRole, ServingState, TopoStore,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct ActionLoop {
    store: Arc<dyn TopoStore>,
    node: NodeIdentity,
    daemon: Arc<dyn DatabaseDaemon>,
    poll_interval: Duration,
}

/// Handle to a spawned loop; dropping it leaves the loop running.
pub struct ActionLoopHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ActionLoopHandle {
    /// Signal shutdown and wait for the loop to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

impl ActionLoop {
    pub fn new(
        store: Arc<dyn TopoStore>,
        node: NodeIdentity,
        daemon: Arc<dyn DatabaseDaemon>,
    ) -> Self {
        Self {
            store,
            node,
            daemon,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start the loop as a background task.
    pub fn spawn(self) -> ActionLoopHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        ActionLoopHandle {
            shutdown: shutdown_tx,
            join,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("action loop started for {}", self.node);
        loop {
            tokio::select! {
                res = self.store.next_action(&self.node, self.poll_interval) => match res {
                    Ok(Some(request)) => self.execute(request).await,
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!("action loop for {}: inbox read failed: {}", self.node, e);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                },
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
        }
        tracing::debug!("action loop stopped for {}", self.node);
    }

    async fn execute(&self, request: ActionRequest) {
        tracing::info!(
            "{}: executing {} ({})",
            self.node,
            request.kind.name(),
            request.id
        );
        let outcome = self.handle(&request).await;
        if !outcome.success {
            tracing::warn!("{}: {} failed: {}", self.node, request.kind.name(), outcome.message);
        }
        if let Err(e) = self.store.report_outcome(&outcome).await {
            tracing::warn!("{}: outcome report failed: {}", self.node, e);
        }
        // Ack even on failure so a poison action cannot wedge the inbox.
        if let Err(e) = self.store.ack_action(&self.node, request.id).await {
            tracing::warn!("{}: ack failed: {}", self.node, e);
        }
    }

    async fn handle(&self, request: &ActionRequest) -> ActionOutcome {
        match &request.kind {
            ActionKind::PromoteSelf => self.handle_promote_self(request).await,
            ActionKind::RepointReplication {
                primary,
                primary_db_addr,
            } => self.handle_repoint(request, primary, primary_db_addr).await,
        }
    }

    async fn handle_promote_self(&self, request: &ActionRequest) -> ActionOutcome {
        if let Err(e) = self.daemon.promote().await {
            return ActionOutcome::failed(request, format!("promote failed: {}", e));
        }
        match self.finalize_self_as_primary().await {
            Ok(()) => ActionOutcome::ok(request, "promoted"),
            Err(e) => ActionOutcome::failed(request, format!("record update failed: {}", e)),
        }
    }

    async fn handle_repoint(
        &self,
        request: &ActionRequest,
        primary: &NodeIdentity,
        primary_db_addr: &str,
    ) -> ActionOutcome {
        if let Err(e) = self.daemon.repoint(primary_db_addr).await {
            // Not fatal here: the self-reported source below decides.
            tracing::warn!("{}: repoint call failed: {}", self.node, e);
        }

        let source = match self.daemon.replication_source().await {
            Ok(source) => source,
            Err(e) => {
                return ActionOutcome::failed(request, format!("source query failed: {}", e))
            }
        };

        let converged = source.as_deref() == Some(primary_db_addr);
        if converged {
            if let Err(e) = self.record_new_parent(primary).await {
                return ActionOutcome::failed(request, format!("record update failed: {}", e))
                    .with_source(source);
            }
            ActionOutcome::ok(request, format!("now replicating from {}", primary_db_addr))
                .with_source(source)
        } else {
            let message = match &source {
                Some(actual) => format!("still replicating from {}", actual),
                None => "not replicating from anyone".to_string(),
            };
            ActionOutcome::failed(request, message).with_source(source)
        }
    }

    /// Update our own record after a successful promotion.
    async fn finalize_self_as_primary(&self) -> crate::Result<()> {
        let mut record = self.store.get_node(&self.node).await?;
        record.role = NodeRole::Primary;
        record.serving = ServingState::ReadWrite;
        record.parent = None;
        record.updated_at = timestamp_now();
        self.store.put_node(&record).await
    }

    /// Update our own parent field after a confirmed repoint.
    async fn record_new_parent(&self, primary: &NodeIdentity) -> crate::Result<()> {
        let mut record = self.store.get_node(&self.node).await?;
        record.parent = Some(primary.clone());
        if record.role == NodeRole::Primary {
            record.role = NodeRole::Replica;
            record.serving = ServingState::ReadOnly;
        }
        record.updated_at = timestamp_now();
        self.store.put_node(&record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::FakeDaemon;
    use crate::topo::{MemoryTopoStore, NodeRecord, ShardRecord};

    async fn seed_node(store: &MemoryTopoStore, uid: u32, role: NodeRole) -> NodeIdentity {
        let id = NodeIdentity::new("cell1", uid);
        let record = NodeRecord {
            id: id.clone(),
            keyspace: "ks".to_string(),
            shard: "0".to_string(),
            role,
            serving: if role == NodeRole::Primary {
                ServingState::ReadWrite
            } else {
                ServingState::ReadOnly
            },
            parent: None,
            addr: format!("cell1host:{}", 8000 + uid),
            db_addr: format!("{}.0.0.1:3300", uid),
            updated_at: 0,
        };
        store.create_node(&record).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_promote_self_updates_record() {
        let store = Arc::new(MemoryTopoStore::new());
        store.create_shard(&ShardRecord::new("ks", "0")).await.unwrap();
        let node = seed_node(&store, 101, NodeRole::Replica).await;

        let handle = ActionLoop::new(store.clone(), node.clone(), Arc::new(FakeDaemon::new()))
            .with_poll_interval(Duration::from_millis(20))
            .spawn();

        let request = ActionRequest::new(node.clone(), ActionKind::PromoteSelf);
        store.enqueue_action(&request).await.unwrap();

        let outcome = store
            .wait_outcome(request.id, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.success);

        let record = store.get_node(&node).await.unwrap();
        assert_eq!(record.role, NodeRole::Primary);
        assert_eq!(record.serving, ServingState::ReadWrite);
        assert!(record.parent.is_none());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_repoint_reports_actual_source() {
        let store = Arc::new(MemoryTopoStore::new());
        let node = seed_node(&store, 104, NodeRole::Replica).await;

        // Stuck daemon: accepts the call, keeps its old source
        let handle = ActionLoop::new(
            store.clone(),
            node.clone(),
            Arc::new(FakeDaemon::stuck_on("234.0.0.1:3301")),
        )
        .with_poll_interval(Duration::from_millis(20))
        .spawn();

        let request = ActionRequest::new(
            node.clone(),
            ActionKind::RepointReplication {
                primary: NodeIdentity::new("cell1", 101),
                primary_db_addr: "101.0.0.1:3301".to_string(),
            },
        );
        store.enqueue_action(&request).await.unwrap();

        let outcome = store
            .wait_outcome(request.id, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.replication_source.as_deref(), Some("234.0.0.1:3301"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_repoint_demotes_old_primary() {
        let store = Arc::new(MemoryTopoStore::new());
        let node = seed_node(&store, 100, NodeRole::Primary).await;

        let handle = ActionLoop::new(
            store.clone(),
            node.clone(),
            Arc::new(FakeDaemon::following("100.0.0.1:3300")),
        )
        .with_poll_interval(Duration::from_millis(20))
        .spawn();

        let new_primary = NodeIdentity::new("cell1", 101);
        let request = ActionRequest::new(
            node.clone(),
            ActionKind::RepointReplication {
                primary: new_primary.clone(),
                primary_db_addr: "101.0.0.1:3301".to_string(),
            },
        );
        store.enqueue_action(&request).await.unwrap();

        let outcome = store
            .wait_outcome(request.id, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.success);

        let record = store.get_node(&node).await.unwrap();
        assert_eq!(record.role, NodeRole::Replica);
        assert_eq!(record.parent, Some(new_primary));

        handle.shutdown().await;
    }
}
