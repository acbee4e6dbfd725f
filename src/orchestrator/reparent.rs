//! Reparent orchestration
//!
//! Single entry point invoked once per failover event, after some outside
//! process has already elected and promoted a candidate at the database
//! level. The orchestrator validates the request, tells the candidate to
//! finalize its role, re-points every other node in the shard, classifies
//! who followed, and commits the new topology.
//!
//! Success policy: the candidate's promotion must succeed or nothing is
//! committed. Remaining nodes that fail to follow never block the commit;
//! they are reported through [`Error::PartialReparent`] after the shard
//! record already names the new primary. Stragglers are repaired
//! out-of-band.

use crate::common::{timestamp_now, Error, Result};
use crate::topo::{
    ActionKind, ActionOutcome, ActionRequest, NodeIdentity, NodeRecord, NodeRole, ServingState,
    TopoStore,
};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Stateless between calls; safe to share across concurrent reparents of
/// different shards. Same-shard calls are rejected by the store's shard
/// lock.
pub struct Reparenter {
    store: Arc<dyn TopoStore>,
}

/// How one dispatched node fared. Store-transport failures are kept apart
/// from "node did not follow" so callers can retry them.
enum Attempt {
    Outcome(ActionOutcome),
    NoResponse,
    StoreError(Error),
}

struct NodeAttempt {
    node: NodeIdentity,
    attempt: Attempt,
}

impl Reparenter {
    pub fn new(store: Arc<dyn TopoStore>) -> Self {
        Self { store }
    }

    /// Converge the shard on `candidate` as its new primary.
    ///
    /// `force` relaxes otherwise-fatal pre-checks (a recorded previous
    /// primary with no node record), never the already-primary check.
    /// `wait_timeout` bounds the whole outcome collection; a node that
    /// stays silent past it counts as failed for that node only.
    pub async fn reparent_shard(
        &self,
        keyspace: &str,
        shard: &str,
        candidate: &NodeIdentity,
        force: bool,
        wait_timeout: Duration,
    ) -> Result<()> {
        self.store.lock_shard(keyspace, shard).await?;
        let result = self
            .reparent_locked(keyspace, shard, candidate, force, wait_timeout)
            .await;
        if let Err(e) = self.store.unlock_shard(keyspace, shard).await {
            tracing::warn!("failed to unlock {}/{}: {}", keyspace, shard, e);
        }
        result
    }

    async fn reparent_locked(
        &self,
        keyspace: &str,
        shard: &str,
        candidate: &NodeIdentity,
        force: bool,
        wait_timeout: Duration,
    ) -> Result<()> {
        let shard_record = self.store.get_shard(keyspace, shard).await?;
        let candidate_record = self.store.get_node(candidate).await?;
        if !candidate_record.in_shard(keyspace, shard) {
            return Err(Error::NodeNotInShard {
                node: candidate.clone(),
                keyspace: keyspace.to_string(),
                shard: shard.to_string(),
            });
        }
        if shard_record.primary.as_ref() == Some(candidate) {
            return Err(Error::AlreadyPrimary(candidate.clone()));
        }

        let nodes = self.store.list_shard_nodes(keyspace, shard).await?;

        // A recorded primary with no node record means we cannot tell it to
        // stand down; fatal unless forced.
        if let Some(recorded) = &shard_record.primary {
            if !nodes.iter().any(|n| n.id == *recorded) {
                if !force {
                    return Err(Error::PreviousPrimaryMissing(recorded.clone()));
                }
                tracing::warn!(
                    "previous primary {} has no record, continuing under force",
                    recorded
                );
            }
        }

        let remaining: Vec<NodeRecord> =
            nodes.into_iter().filter(|n| n.id != *candidate).collect();
        let prev_primaries: Vec<NodeIdentity> = remaining
            .iter()
            .filter(|n| n.is_primary())
            .map(|n| n.id.clone())
            .collect();

        tracing::info!(
            "reparenting {}/{} to {} ({} other nodes)",
            keyspace,
            shard,
            candidate,
            remaining.len()
        );

        let deadline = Instant::now() + wait_timeout;

        // Promotion is dispatched alongside the re-point fan-out; the
        // success policy below just evaluates it first.
        let promotion = self.dispatch_and_wait(
            ActionRequest::new(candidate.clone(), ActionKind::PromoteSelf),
            deadline,
        );
        let repoints = remaining.iter().map(|node| {
            self.dispatch_and_wait(
                ActionRequest::new(
                    node.id.clone(),
                    ActionKind::RepointReplication {
                        primary: candidate.clone(),
                        primary_db_addr: candidate_record.db_addr.clone(),
                    },
                ),
                deadline,
            )
        });
        let (promotion, repoint_results) = tokio::join!(promotion, join_all(repoints));

        match promotion.attempt {
            Attempt::Outcome(outcome) if outcome.success => {}
            Attempt::Outcome(outcome) => {
                return Err(Error::PromotionFailed {
                    node: candidate.clone(),
                    reason: outcome.message,
                })
            }
            Attempt::NoResponse => {
                return Err(Error::PromotionFailed {
                    node: candidate.clone(),
                    reason: format!("no outcome within {:?}", wait_timeout),
                })
            }
            Attempt::StoreError(e) => return Err(e),
        }

        // The node's own post-action source report decides convergence, not
        // whether the action call claimed success.
        let mut lagging = Vec::new();
        let mut store_errors = Vec::new();
        for result in repoint_results {
            match result.attempt {
                Attempt::Outcome(outcome)
                    if outcome.replication_source.as_deref()
                        == Some(candidate_record.db_addr.as_str()) => {}
                Attempt::Outcome(outcome) => {
                    tracing::warn!("node {} did not follow: {}", result.node, outcome.message);
                    lagging.push(result.node);
                }
                Attempt::NoResponse => {
                    tracing::warn!("node {} reported no outcome within the deadline", result.node);
                    lagging.push(result.node);
                }
                Attempt::StoreError(e) => {
                    tracing::warn!("store error dispatching to {}: {}", result.node, e);
                    store_errors.push(format!("{}: {}", result.node, e));
                }
            }
        }

        self.commit_topology(keyspace, shard, candidate, &prev_primaries)
            .await?;

        if !store_errors.is_empty() {
            return Err(Error::StoreUnavailable(format!(
                "topology committed, but outcome collection hit store errors: {}",
                store_errors.join(", ")
            )));
        }
        if !lagging.is_empty() {
            return Err(Error::PartialReparent { lagging });
        }

        tracing::info!("reparent of {}/{} to {} complete", keyspace, shard, candidate);
        Ok(())
    }

    async fn dispatch_and_wait(&self, request: ActionRequest, deadline: Instant) -> NodeAttempt {
        let node = request.node.clone();
        if let Err(e) = self.store.enqueue_action(&request).await {
            return NodeAttempt {
                node,
                attempt: Attempt::StoreError(e),
            };
        }
        let wait = deadline.saturating_duration_since(Instant::now());
        match self.store.wait_outcome(request.id, wait).await {
            Ok(Some(outcome)) => NodeAttempt {
                node,
                attempt: Attempt::Outcome(outcome),
            },
            Ok(None) => NodeAttempt {
                node,
                attempt: Attempt::NoResponse,
            },
            Err(e) => NodeAttempt {
                node,
                attempt: Attempt::StoreError(e),
            },
        }
    }

    /// Single read-modify-write on the shard record, then record-level
    /// fixups: the candidate becomes primary/read-write, and any remaining
    /// node still marked primary is demoted (its own repoint handler may
    /// never have run).
    async fn commit_topology(
        &self,
        keyspace: &str,
        shard: &str,
        candidate: &NodeIdentity,
        prev_primaries: &[NodeIdentity],
    ) -> Result<()> {
        self.store
            .set_shard_primary(keyspace, shard, candidate)
            .await?;

        // Idempotent with the candidate's own promote handler.
        let mut record = self.store.get_node(candidate).await?;
        if record.role != NodeRole::Primary
            || record.serving != ServingState::ReadWrite
            || record.parent.is_some()
        {
            record.role = NodeRole::Primary;
            record.serving = ServingState::ReadWrite;
            record.parent = None;
            record.updated_at = timestamp_now();
            self.store.put_node(&record).await?;
        }

        for prev in prev_primaries {
            match self.store.get_node(prev).await {
                Ok(mut record) if record.is_primary() => {
                    record.role = NodeRole::Replica;
                    record.serving = ServingState::ReadOnly;
                    record.parent = Some(candidate.clone());
                    record.updated_at = timestamp_now();
                    self.store.put_node(&record).await?;
                }
                Ok(_) => {}
                Err(Error::NodeNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::info!("committed {}/{} primary = {}", keyspace, shard, candidate);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::{MemoryTopoStore, ShardRecord};

    fn node_record(uid: u32, role: NodeRole) -> NodeRecord {
        NodeRecord {
            id: NodeIdentity::new("cell1", uid),
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
        }
    }

    async fn seeded_store() -> Arc<MemoryTopoStore> {
        let store = Arc::new(MemoryTopoStore::new());
        let mut shard = ShardRecord::new("ks", "0");
        shard.primary = Some(NodeIdentity::new("cell1", 100));
        store.create_shard(&shard).await.unwrap();
        store.create_node(&node_record(100, NodeRole::Primary)).await.unwrap();
        store.create_node(&node_record(101, NodeRole::Replica)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_shard_not_found_is_fatal() {
        let store = Arc::new(MemoryTopoStore::new());
        let reparenter = Reparenter::new(store);
        let err = reparenter
            .reparent_shard(
                "ks",
                "0",
                &NodeIdentity::new("cell1", 101),
                false,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShardNotFound { .. }));
    }

    #[tokio::test]
    async fn test_candidate_not_found_is_fatal() {
        let store = seeded_store().await;
        let reparenter = Reparenter::new(store);
        let err = reparenter
            .reparent_shard(
                "ks",
                "0",
                &NodeIdentity::new("cell1", 999),
                false,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn test_candidate_in_wrong_shard() {
        let store = seeded_store().await;
        let mut stray = node_record(200, NodeRole::Replica);
        stray.shard = "1".to_string();
        store.create_node(&stray).await.unwrap();

        let reparenter = Reparenter::new(store);
        let err = reparenter
            .reparent_shard("ks", "0", &stray.id, false, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NodeNotInShard { .. }));
    }

    #[tokio::test]
    async fn test_already_primary_no_side_effects() {
        let store = seeded_store().await;
        let before = store.get_shard("ks", "0").await.unwrap();

        let reparenter = Reparenter::new(store.clone());
        let err = reparenter
            .reparent_shard(
                "ks",
                "0",
                &NodeIdentity::new("cell1", 100),
                false,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyPrimary(_)));

        let after = store.get_shard("ks", "0").await.unwrap();
        assert_eq!(before, after);
        // Nothing was dispatched to the candidate either
        let inbox = store
            .next_action(&NodeIdentity::new("cell1", 100), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(inbox.is_none());
    }

    #[tokio::test]
    async fn test_force_does_not_relax_already_primary() {
        let store = seeded_store().await;
        let reparenter = Reparenter::new(store);
        let err = reparenter
            .reparent_shard(
                "ks",
                "0",
                &NodeIdentity::new("cell1", 100),
                true,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyPrimary(_)));
    }

    #[tokio::test]
    async fn test_missing_previous_primary_requires_force() {
        let store = Arc::new(MemoryTopoStore::new());
        let mut shard = ShardRecord::new("ks", "0");
        shard.primary = Some(NodeIdentity::new("cell1", 50));
        store.create_shard(&shard).await.unwrap();
        store.create_node(&node_record(101, NodeRole::Replica)).await.unwrap();

        let reparenter = Reparenter::new(store);
        let err = reparenter
            .reparent_shard(
                "ks",
                "0",
                &NodeIdentity::new("cell1", 101),
                false,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreviousPrimaryMissing(_)));
    }

    #[tokio::test]
    async fn test_locked_shard_rejected() {
        let store = seeded_store().await;
        store.lock_shard("ks", "0").await.unwrap();

        let reparenter = Reparenter::new(store.clone());
        let err = reparenter
            .reparent_shard(
                "ks",
                "0",
                &NodeIdentity::new("cell1", 101),
                false,
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShardLocked { .. }));

        // No dispatch happened
        let inbox = store
            .next_action(&NodeIdentity::new("cell1", 101), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(inbox.is_none());
    }
}
