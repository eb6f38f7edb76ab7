//! Node scoring for placement decisions.
//!
//! Best-fit: a node's score is the slack it would have left after the
//! placement, with memory normalized to cores at 1024 MB per core. Lower
//! is better.

use nimbus_core::ResourceSpec;

/// MB of memory counted as one core of slack.
pub const MB_PER_CORE: f64 = 1024.0;

/// Capacity and current reservations of one candidate node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeResources {
    pub node_id: String,
    pub total: ResourceSpec,
    pub used: ResourceSpec,
}

impl NodeResources {
    pub fn free_cpu(&self) -> f64 {
        self.total.cpu - self.used.cpu
    }

    pub fn free_memory_mb(&self) -> u64 {
        self.total.memory_mb.saturating_sub(self.used.memory_mb)
    }
}

/// Scored placement result for a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeScore {
    pub node_id: String,
    /// Remaining slack after placement (lower = tighter fit).
    pub score: f64,
}

/// Slack left on `node` after placing `req`.
///
/// The caller is expected to have checked admission; an ineligible node
/// simply produces a negative component.
pub fn score_node(node: &NodeResources, req: &ResourceSpec) -> NodeScore {
    let cpu_left = node.total.cpu - (node.used.cpu + req.cpu);
    let memory_left = node.total.memory_mb as f64 - (node.used.memory_mb + req.memory_mb) as f64;
    NodeScore {
        node_id: node.node_id.clone(),
        score: cpu_left + memory_left / MB_PER_CORE,
    }
}

/// Score all candidates and return them best first.
///
/// The sort is stable, so equal scores keep candidate order.
pub fn rank_nodes(nodes: &[NodeResources], req: &ResourceSpec) -> Vec<NodeScore> {
    let mut scores: Vec<NodeScore> = nodes.iter().map(|n| score_node(n, req)).collect();
    scores.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
    scores
}
