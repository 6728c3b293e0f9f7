use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Visited/total counter for one ID space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tally {
    /// IDs visited, bounded to the known universe when one is set.
    pub visited: usize,
    /// Size of the known universe, or the declared total without one.
    pub total: usize,
    /// `visited / total` as a percentage rounded to one decimal.
    pub percent: f64,
}

impl Tally {
    /// Build a tally, computing the rounded percentage.
    pub fn new(visited: usize, total: usize) -> Self {
        Self {
            visited,
            total,
            percent: percent(visited, total),
        }
    }
}

/// Per-node card breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeCardCoverage {
    /// All cards mapped to the node, sorted.
    pub card_ids: Vec<String>,
    /// Mapped cards visited on behalf of the node, sorted.
    pub visited_card_ids: Vec<String>,
    /// Mapped cards not yet visited, sorted.
    pub unvisited_card_ids: Vec<String>,
    pub visited: usize,
    pub total: usize,
    pub unvisited: usize,
}

/// Flat per-node summary row, ordered by node ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeCardSummary {
    pub node_id: String,
    /// Graph the node was loaded from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<String>,
    pub visited_cards: usize,
    pub total_cards: usize,
    pub percent: f64,
}

/// Coverage snapshot as returned to callers and embedded in the session file.
///
/// Besides the aggregates, the snapshot carries every raw set and counter the
/// store needs to rebuild itself, so persisting and reloading it is lossless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageStats {
    pub nodes: Tally,
    pub cards: Tally,
    pub visited_node_ids: Vec<String>,
    pub visited_card_ids: Vec<String>,
    pub node_visit_counts: BTreeMap<String, u64>,
    pub card_visit_counts: BTreeMap<String, u64>,
    pub node_card_mapping: BTreeMap<String, Vec<String>>,
    pub visited_cards_per_node: BTreeMap<String, Vec<String>>,
    pub per_node_card_coverage: BTreeMap<String, NodeCardCoverage>,
    pub node_card_summary: Vec<NodeCardSummary>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_graphs: BTreeMap<String, String>,
    /// Known node universe; absent until coverage is initialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_node_ids: Option<Vec<String>>,
    /// Known card universe; absent until coverage is initialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_card_ids: Option<Vec<String>>,
}

impl CoverageStats {
    /// Summary row for a node, if it is mapped.
    pub fn node_summary(&self, node_id: &str) -> Option<NodeCardSummary> {
        let coverage = self.per_node_card_coverage.get(node_id)?;
        Some(NodeCardSummary {
            node_id: node_id.to_string(),
            graph: self.node_graphs.get(node_id).cloned(),
            visited_cards: coverage.visited,
            total_cards: coverage.total,
            percent: percent(coverage.visited, coverage.total),
        })
    }
}

/// Percentage rounded to one decimal; zero when `total` is zero.
pub fn percent(visited: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (visited as f64 / total as f64 * 1000.0).round() / 10.0
}
