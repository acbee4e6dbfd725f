//! Action inbox message types
//!
//! An `ActionRequest` is a unit of work addressed to one node and delivered
//! through the store's per-node inbox (at-least-once, FIFO per node, no
//! ordering across nodes). The matching `ActionOutcome` is correlated by
//! request id and lives only for the duration of one failover call.

use crate::topo::NodeIdentity;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The operations a node action loop knows how to execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Finalize the receiving node's own role as primary
    PromoteSelf,
    /// Re-point the receiving node's replication stream at a new primary
    RepointReplication {
        primary: NodeIdentity,
        primary_db_addr: String,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::PromoteSelf => "promote_self",
            ActionKind::RepointReplication { .. } => "repoint_replication",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: Uuid,
    pub node: NodeIdentity,
    pub kind: ActionKind,
}

impl ActionRequest {
    pub fn new(node: NodeIdentity, kind: ActionKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            node,
            kind,
        }
    }
}

/// Result of one executed action, reported back through the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub request_id: Uuid,
    pub node: NodeIdentity,
    pub success: bool,
    pub message: String,
    /// For repoint actions: the replication source actually in effect after
    /// the attempt. Authoritative for convergence classification.
    pub replication_source: Option<String>,
}

impl ActionOutcome {
    pub fn ok(request: &ActionRequest, message: impl Into<String>) -> Self {
        Self {
            request_id: request.id,
            node: request.node.clone(),
            success: true,
            message: message.into(),
            replication_source: None,
        }
    }

    pub fn failed(request: &ActionRequest, message: impl Into<String>) -> Self {
        Self {
            request_id: request.id,
            node: request.node.clone(),
            success: false,
            message: message.into(),
            replication_source: None,
        }
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.replication_source = source;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let node = NodeIdentity::new("cell1", 100);
        let a = ActionRequest::new(node.clone(), ActionKind::PromoteSelf);
        let b = ActionRequest::new(node, ActionKind::PromoteSelf);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_outcome_correlation() {
        let request = ActionRequest::new(
            NodeIdentity::new("cell1", 102),
            ActionKind::RepointReplication {
                primary: NodeIdentity::new("cell1", 101),
                primary_db_addr: "101.0.0.1:3301".to_string(),
            },
        );
        let outcome =
            ActionOutcome::ok(&request, "repointed").with_source(Some("101.0.0.1:3301".into()));
        assert_eq!(outcome.request_id, request.id);
        assert_eq!(outcome.replication_source.as_deref(), Some("101.0.0.1:3301"));
    }
}
