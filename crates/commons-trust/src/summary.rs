use serde::{Deserialize, Serialize};

use commons_core::Aid;

use crate::graph::{TrustGraph, TrustNode};

/// Aggregate statistics of a trust graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub average_score: f64,
    pub max_score: f64,
    pub min_score: f64,
    /// Median depth over reachable nodes.
    pub median_depth: Option<u32>,
    /// Unordered pairs with edges both ways.
    pub bidirectional_count: usize,
}

impl ScoreSummary {
    pub fn of(graph: &TrustGraph) -> Self {
        let scores: Vec<f64> = graph.nodes.values().map(|n| n.trust_score).collect();
        let (average_score, max_score, min_score) = if scores.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                scores.iter().sum::<f64>() / scores.len() as f64,
                scores.iter().copied().fold(f64::MIN, f64::max),
                scores.iter().copied().fold(f64::MAX, f64::min),
            )
        };

        let mut depths: Vec<u32> = graph.nodes.values().filter_map(|n| n.graph_depth).collect();
        depths.sort_unstable();
        let median_depth = depths.get(depths.len() / 2).copied();

        Self {
            total_nodes: graph.node_count(),
            total_edges: graph.edge_count(),
            average_score,
            max_score,
            min_score,
            median_depth,
            bidirectional_count: graph.edges.iter().filter(|e| e.bidirectional).count() / 2,
        }
    }
}

/// Score row for ranking output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeScore {
    pub aid: Aid,
    pub alias: Option<String>,
    pub role: String,
    pub score: f64,
    pub depth: Option<u32>,
}

impl From<&TrustNode> for NodeScore {
    fn from(node: &TrustNode) -> Self {
        Self {
            aid: node.aid.clone(),
            alias: node.alias.clone(),
            role: node.role.clone(),
            score: node.trust_score,
            depth: node.graph_depth,
        }
    }
}
