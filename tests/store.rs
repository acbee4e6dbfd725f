//! Store contract tests, run against both implementations

use shardpilot::topo::{
    ActionKind, ActionOutcome, ActionRequest, MemoryTopoStore, NodeIdentity, NodeRecord,
    NodeRole, RocksTopoStore, ServingState, ShardRecord, TopoStore,
};
use shardpilot::Error;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn test_record(uid: u32) -> NodeRecord {
    NodeRecord {
        id: NodeIdentity::new("cell1", uid),
        keyspace: "ks".to_string(),
        shard: "0".to_string(),
        role: NodeRole::Replica,
        serving: ServingState::ReadOnly,
        parent: None,
        addr: format!("cell1host:{}", 8000 + uid),
        db_addr: format!("{}.0.0.1:3300", uid),
        updated_at: 0,
    }
}

async fn check_record_crud(store: Arc<dyn TopoStore>) {
    store.create_shard(&ShardRecord::new("ks", "0")).await.unwrap();
    assert!(matches!(
        store.create_shard(&ShardRecord::new("ks", "0")).await,
        Err(Error::AlreadyExists(_))
    ));
    assert!(matches!(
        store.get_shard("ks", "missing").await,
        Err(Error::ShardNotFound { .. })
    ));

    store.create_node(&test_record(100)).await.unwrap();
    store.create_node(&test_record(101)).await.unwrap();
    assert!(matches!(
        store.create_node(&test_record(100)).await,
        Err(Error::AlreadyExists(_))
    ));
    assert!(matches!(
        store.get_node(&NodeIdentity::new("cell1", 999)).await,
        Err(Error::NodeNotFound(_))
    ));

    let nodes = store.list_shard_nodes("ks", "0").await.unwrap();
    assert_eq!(nodes.len(), 2);
    assert!(store.list_shard_nodes("ks", "1").await.unwrap().is_empty());

    let mut updated = test_record(100);
    updated.role = NodeRole::Primary;
    store.put_node(&updated).await.unwrap();
    let fetched = store.get_node(&updated.id).await.unwrap();
    assert_eq!(fetched.role, NodeRole::Primary);

    let primary = NodeIdentity::new("cell1", 100);
    let shard = store.set_shard_primary("ks", "0", &primary).await.unwrap();
    assert_eq!(shard.primary, Some(primary));
}

async fn check_inbox_contract(store: Arc<dyn TopoStore>) {
    let node = NodeIdentity::new("cell1", 100);
    let other = NodeIdentity::new("cell1", 101);

    let first = ActionRequest::new(node.clone(), ActionKind::PromoteSelf);
    let second = ActionRequest::new(
        node.clone(),
        ActionKind::RepointReplication {
            primary: other.clone(),
            primary_db_addr: "101.0.0.1:3301".to_string(),
        },
    );
    let elsewhere = ActionRequest::new(other.clone(), ActionKind::PromoteSelf);

    store.enqueue_action(&first).await.unwrap();
    store.enqueue_action(&second).await.unwrap();
    store.enqueue_action(&elsewhere).await.unwrap();

    // FIFO per node, redelivered until acked, no bleed across inboxes
    let got = store
        .next_action(&node, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.id, first.id);
    let redelivered = store
        .next_action(&node, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(redelivered.id, first.id);

    store.ack_action(&node, first.id).await.unwrap();
    let got = store
        .next_action(&node, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.id, second.id);

    let got = store
        .next_action(&other, Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.id, elsewhere.id);
}

async fn check_outcome_contract(store: Arc<dyn TopoStore>) {
    let node = NodeIdentity::new("cell1", 100);
    let request = ActionRequest::new(node, ActionKind::PromoteSelf);

    // Caller-supplied bound is honored when nothing arrives
    let got = store
        .wait_outcome(request.id, Duration::from_millis(30))
        .await
        .unwrap();
    assert!(got.is_none());

    // A waiter parked before the report still observes it
    let waiter = {
        let store = store.clone();
        let id = request.id;
        tokio::spawn(async move { store.wait_outcome(id, Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    store
        .report_outcome(&ActionOutcome::ok(&request, "done"))
        .await
        .unwrap();
    let got = waiter.await.unwrap().unwrap().unwrap();
    assert!(got.success);
}

async fn check_shard_lock(store: Arc<dyn TopoStore>) {
    store.lock_shard("ks", "0").await.unwrap();
    assert!(matches!(
        store.lock_shard("ks", "0").await,
        Err(Error::ShardLocked { .. })
    ));
    // Other shards are unaffected
    store.lock_shard("ks", "1").await.unwrap();
    store.unlock_shard("ks", "0").await.unwrap();
    store.lock_shard("ks", "0").await.unwrap();
}

#[tokio::test]
async fn test_memory_store_contract() {
    check_record_crud(Arc::new(MemoryTopoStore::new())).await;
    check_inbox_contract(Arc::new(MemoryTopoStore::new())).await;
    check_outcome_contract(Arc::new(MemoryTopoStore::new())).await;
    check_shard_lock(Arc::new(MemoryTopoStore::new())).await;
}

#[tokio::test]
async fn test_rocks_store_contract() {
    let dir = TempDir::new().unwrap();
    let open = |name: &str| {
        Arc::new(RocksTopoStore::open(dir.path().join(name)).unwrap()) as Arc<dyn TopoStore>
    };
    check_record_crud(open("crud.db")).await;
    check_inbox_contract(open("inbox.db")).await;
    check_outcome_contract(open("outcomes.db")).await;
    check_shard_lock(open("locks.db")).await;
}
