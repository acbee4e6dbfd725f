//! HTTP API for the admin daemon
//!
//! Thin JSON surface over the store and the reparent orchestrator. Errors
//! use the envelope `{"status":"error","message":...}`; a reparent that
//! committed but left stragglers behind comes back as 207 with the lagging
//! node list so automation can tell it apart from failure.

use crate::common::{timestamp_now, Error};
use crate::orchestrator::reparent::Reparenter;
use crate::topo::{NodeIdentity, NodeRecord, NodeRole, ServingState, ShardRecord, TopoStore};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AdminState {
    pub store: Arc<dyn TopoStore>,
    pub reparenter: Arc<Reparenter>,
    pub default_wait_timeout: Duration,
}

pub fn create_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route(
            "/v1/topology/:keyspace/:shard",
            axum::routing::get(get_topology),
        )
        .route("/v1/shards", axum::routing::post(create_shard))
        .route("/v1/nodes", axum::routing::post(create_node))
        .route("/v1/reparent", axum::routing::post(reparent))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

fn error_response(e: &Error) -> (StatusCode, Json<serde_json::Value>) {
    (
        e.to_http_status(),
        Json(json!({ "status": "error", "message": e.to_string() })),
    )
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": crate::VERSION }))
}

async fn get_topology(
    State(state): State<AdminState>,
    Path((keyspace, shard)): Path<(String, String)>,
) -> impl IntoResponse {
    let shard_record = match state.store.get_shard(&keyspace, &shard).await {
        Ok(record) => record,
        Err(e) => return error_response(&e).into_response(),
    };
    let nodes = match state.store.list_shard_nodes(&keyspace, &shard).await {
        Ok(nodes) => nodes,
        Err(e) => return error_response(&e).into_response(),
    };
    Json(json!({ "shard": shard_record, "nodes": nodes })).into_response()
}

#[derive(Debug, Deserialize)]
struct CreateShardRequest {
    keyspace: String,
    shard: String,
}

async fn create_shard(
    State(state): State<AdminState>,
    Json(req): Json<CreateShardRequest>,
) -> impl IntoResponse {
    let record = ShardRecord::new(req.keyspace, req.shard);
    match state.store.create_shard(&record).await {
        Ok(()) => (StatusCode::CREATED, Json(json!({ "status": "ok", "shard": record })))
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct CreateNodeRequest {
    cell: String,
    uid: u32,
    keyspace: String,
    shard: String,
    #[serde(default = "default_role")]
    role: NodeRole,
    addr: String,
    db_addr: String,
    parent: Option<NodeIdentity>,
}

fn default_role() -> NodeRole {
    NodeRole::Replica
}

async fn create_node(
    State(state): State<AdminState>,
    Json(req): Json<CreateNodeRequest>,
) -> impl IntoResponse {
    let serving = if req.role == NodeRole::Primary {
        ServingState::ReadWrite
    } else {
        ServingState::ReadOnly
    };
    let record = NodeRecord {
        id: NodeIdentity::new(req.cell, req.uid),
        keyspace: req.keyspace,
        shard: req.shard,
        role: req.role,
        serving,
        parent: req.parent,
        addr: req.addr,
        db_addr: req.db_addr,
        updated_at: timestamp_now(),
    };
    match state.store.create_node(&record).await {
        Ok(()) => (StatusCode::CREATED, Json(json!({ "status": "ok", "node": record })))
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ReparentRequest {
    keyspace: String,
    shard: String,
    candidate: NodeIdentity,
    #[serde(default)]
    force: bool,
    wait_timeout_secs: Option<u64>,
}

async fn reparent(
    State(state): State<AdminState>,
    Json(req): Json<ReparentRequest>,
) -> impl IntoResponse {
    let wait_timeout = req
        .wait_timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(state.default_wait_timeout);

    let result = state
        .reparenter
        .reparent_shard(&req.keyspace, &req.shard, &req.candidate, req.force, wait_timeout)
        .await;

    match result {
        Ok(()) => Json(json!({
            "status": "ok",
            "keyspace": req.keyspace,
            "shard": req.shard,
            "primary": req.candidate,
        }))
        .into_response(),
        Err(Error::PartialReparent { lagging }) => (
            StatusCode::MULTI_STATUS,
            Json(json!({
                "status": "partial",
                "keyspace": req.keyspace,
                "shard": req.shard,
                "primary": req.candidate,
                "lagging": lagging.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}
