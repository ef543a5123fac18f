//! Per-chain execution DAG
//!
//! Every LLM or tool invocation inside a chain becomes a node. Nodes hold
//! parent ids, never parent pointers, so snapshots serialise cleanly and
//! the graph owns no cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Kind of operation a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Llm,
    Tool,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Llm => "llm",
            NodeKind::Tool => "tool",
        }
    }
}

/// Terminal and transient states of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Running,
    Success,
    Error,
    Halted,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Running => "running",
            NodeStatus::Success => "success",
            NodeStatus::Error => "error",
            NodeStatus::Halted => "halted",
        }
    }
}

/// Record of a single LLM or tool call within the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: NodeId,
    pub parent_id: Option<NodeId>,
    pub kind: NodeKind,
    pub operation_name: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub status: NodeStatus,
    pub cost_usd: f64,
    pub retries_used: u32,
}

/// Append-only node store for one chain.
///
/// The currently open nodes form a stack; a freshly opened node becomes a
/// child of the innermost open node.
#[derive(Debug, Default)]
pub struct ExecutionGraph {
    nodes: Vec<NodeRecord>,
    open_stack: Vec<NodeId>,
}

impl ExecutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new node under the innermost running node.
    pub fn open_node(&mut self, kind: NodeKind, operation_name: &str) -> NodeId {
        let node_id = NodeId::new();
        let parent_id = self.open_stack.last().copied();
        self.nodes.push(NodeRecord {
            node_id,
            parent_id,
            kind,
            operation_name: operation_name.to_string(),
            start_ts: Utc::now(),
            end_ts: None,
            status: NodeStatus::Running,
            cost_usd: 0.0,
            retries_used: 0,
        });
        self.open_stack.push(node_id);
        node_id
    }

    /// Close a node with its final status, cost, and retry count.
    pub fn close_node(&mut self, node_id: NodeId, status: NodeStatus, cost_usd: f64, retries: u32) {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.node_id == node_id) {
            node.status = status;
            node.end_ts = Some(Utc::now());
            node.cost_usd = cost_usd;
            node.retries_used = retries;
        }
        if let Some(pos) = self.open_stack.iter().rposition(|id| *id == node_id) {
            self.open_stack.remove(pos);
        }
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Sum of cost over SUCCESS and ERROR nodes.
    pub fn cost_usd_accumulated(&self) -> f64 {
        self.nodes
            .iter()
            .filter(|n| matches!(n.status, NodeStatus::Success | NodeStatus::Error))
            .map(|n| n.cost_usd)
            .sum()
    }

    /// Aggregates for the compliance export's `graph_summary`.
    pub fn aggregates(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut by_status = std::collections::BTreeMap::new();
        for node in &self.nodes {
            *by_status.entry(node.status.as_str()).or_insert(0u64) += 1;
        }
        let mut summary = serde_json::Map::new();
        summary.insert("node_count".into(), serde_json::Value::from(self.nodes.len()));
        summary.insert(
            "by_status".into(),
            serde_json::to_value(by_status).unwrap_or_default(),
        );
        summary.insert(
            "total_cost_usd".into(),
            serde_json::Value::from(self.cost_usd_accumulated()),
        );
        summary
    }
}
