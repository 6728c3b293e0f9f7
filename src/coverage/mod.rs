//! Coverage store for audit sessions.
//!
//! [`CoverageStore`] is the authoritative in-memory record of what an audit
//! session has looked at: visited nodes and cards, visit counters, the
//! node ↔ card mapping, and the known-ID universes that bound reported
//! percentages.
//!
//! # Invariants
//!
//! - `card_to_nodes` is the exact inverse of `node_card_mapping`. A card entry
//!   disappears once no node references it.
//! - `visited_cards_per_node[n]` is a subset of `node_card_mapping[n]` at all
//!   times. Re-registration intersects, it never unions.
//! - Reported visited counts never exceed reported totals: once a known
//!   universe is set, visited IDs are intersected with it before counting,
//!   even when that universe is empty.

mod stats;


pub use stats::{percent, CoverageStats, NodeCardCoverage, NodeCardSummary, Tally};

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

/// Authoritative coverage state for one session.
#[derive(Debug, Clone, Default)]
pub struct CoverageStore {
    visited_nodes: BTreeSet<String>,
    visited_cards: BTreeSet<String>,
    /// Declared totals, used only while no known universe is set.
    total_nodes: usize,
    total_cards: usize,
    node_visit_counts: BTreeMap<String, u64>,
    card_visit_counts: BTreeMap<String, u64>,
    /// `None` until coverage is initialized.
    known_node_ids: Option<BTreeSet<String>>,
    known_card_ids: Option<BTreeSet<String>>,
    node_card_mapping: BTreeMap<String, BTreeSet<String>>,
    visited_cards_per_node: BTreeMap<String, BTreeSet<String>>,
    card_to_nodes: BTreeMap<String, BTreeSet<String>>,
    /// Node → label of the graph it was loaded from.
    node_graphs: BTreeMap<String, String>,
}

impl CoverageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a persisted snapshot.
    pub fn from_stats(stats: &CoverageStats) -> Self {
        let mut store = Self {
            visited_nodes: stats.visited_node_ids.iter().cloned().collect(),
            visited_cards: stats.visited_card_ids.iter().cloned().collect(),
            total_nodes: stats.nodes.total,
            total_cards: stats.cards.total,
            node_visit_counts: stats.node_visit_counts.clone(),
            card_visit_counts: stats.card_visit_counts.clone(),
            known_node_ids: stats
                .known_node_ids
                .as_ref()
                .map(|ids| ids.iter().cloned().collect()),
            known_card_ids: stats
                .known_card_ids
                .as_ref()
                .map(|ids| ids.iter().cloned().collect()),
            node_graphs: stats.node_graphs.clone(),
            ..Self::default()
        };

        for (node_id, cards) in &stats.node_card_mapping {
            let previously_visited = stats
                .visited_cards_per_node
                .get(node_id)
                .map(|visited| visited.iter().cloned().collect())
                .unwrap_or_default();
            store.register_node_cards(
                node_id,
                cards.iter().cloned().collect(),
                Some(previously_visited),
            );
        }
        store
    }

    /// Mark a node visited. Membership is idempotent, the counter cumulative.
    pub fn mark_node_visited(&mut self, node_id: &str) {
        self.visited_nodes.insert(node_id.to_string());
        *self.node_visit_counts.entry(node_id.to_string()).or_insert(0) += 1;
    }

    /// Mark a card visited. Membership is idempotent, the counter cumulative.
    pub fn mark_card_visited(&mut self, card_id: &str) {
        self.visited_cards.insert(card_id.to_string());
        *self.card_visit_counts.entry(card_id.to_string()).or_insert(0) += 1;
    }

    /// Replace the cards associated with `node_id`.
    ///
    /// Back-references of cards dropped from the node are removed. The node's
    /// visited subset becomes `previously_visited` (or its current subset when
    /// `None`) intersected with the new card set.
    pub fn register_node_cards(
        &mut self,
        node_id: &str,
        cards: BTreeSet<String>,
        previously_visited: Option<BTreeSet<String>>,
    ) {
        let new_cards: BTreeSet<String> = cards.into_iter().filter(|c| !c.is_empty()).collect();

        if let Some(old_cards) = self.node_card_mapping.get(node_id) {
            for removed in old_cards.difference(&new_cards) {
                if let Some(nodes) = self.card_to_nodes.get_mut(removed) {
                    nodes.remove(node_id);
                    if nodes.is_empty() {
                        self.card_to_nodes.remove(removed);
                    }
                }
            }
        }

        for card_id in &new_cards {
            self.card_to_nodes
                .entry(card_id.clone())
                .or_default()
                .insert(node_id.to_string());
        }

        let seed = match previously_visited {
            Some(visited) => visited,
            None => self
                .visited_cards_per_node
                .get(node_id)
                .cloned()
                .unwrap_or_default(),
        };
        let retained: BTreeSet<String> = seed.intersection(&new_cards).cloned().collect();

        self.visited_cards_per_node
            .insert(node_id.to_string(), retained);
        self.node_card_mapping.insert(node_id.to_string(), new_cards);
    }

    /// Record that `card_id` was visited on behalf of `node_id`.
    ///
    /// Ignored unless the card is part of the node's current mapping. Returns
    /// whether the visit was recorded.
    pub fn mark_card_visited_for_node(&mut self, node_id: &str, card_id: &str) -> bool {
        let mapped = self
            .node_card_mapping
            .get(node_id)
            .is_some_and(|cards| cards.contains(card_id));
        if !mapped {
            debug!(node_id, card_id, "Card not mapped to node, skipping per-node visit");
            return false;
        }
        self.visited_cards_per_node
            .entry(node_id.to_string())
            .or_default()
            .insert(card_id.to_string());
        true
    }

    /// Nodes whose mapping contains `card_id`.
    pub fn nodes_referencing(&self, card_id: &str) -> BTreeSet<String> {
        self.card_to_nodes.get(card_id).cloned().unwrap_or_default()
    }

    /// Whether a bare ID is a legitimate card: in the known universe or
    /// referenced by some node.
    pub fn is_known_card(&self, card_id: &str) -> bool {
        self.known_card_ids
            .as_ref()
            .is_some_and(|known| known.contains(card_id))
            || self.card_to_nodes.contains_key(card_id)
    }

    /// Clear the mapping state ahead of a rebuild.
    ///
    /// Returns each node's visited subset so it can be carried into
    /// [`register_node_cards`](Self::register_node_cards). Visited sets and
    /// counters are untouched.
    pub fn reset_mapping(&mut self) -> BTreeMap<String, BTreeSet<String>> {
        self.node_card_mapping.clear();
        self.card_to_nodes.clear();
        self.node_graphs.clear();
        std::mem::take(&mut self.visited_cards_per_node)
    }

    /// Replace the known-ID universes. An empty universe still bounds the
    /// statistics: nothing visited counts against it.
    pub fn set_known_universe(&mut self, node_ids: BTreeSet<String>, card_ids: BTreeSet<String>) {
        self.known_node_ids = Some(node_ids);
        self.known_card_ids = Some(card_ids);
    }

    /// Replace the declared totals.
    pub fn set_totals(&mut self, total_nodes: usize, total_cards: usize) {
        self.total_nodes = total_nodes;
        self.total_cards = total_cards;
    }

    /// Label a node with the graph it came from.
    pub fn set_node_graph(&mut self, node_id: &str, graph: &str) {
        self.node_graphs
            .insert(node_id.to_string(), graph.to_string());
    }

    pub fn visited_nodes(&self) -> &BTreeSet<String> {
        &self.visited_nodes
    }

    pub fn visited_cards(&self) -> &BTreeSet<String> {
        &self.visited_cards
    }

    pub fn node_visit_count(&self, node_id: &str) -> u64 {
        self.node_visit_counts.get(node_id).copied().unwrap_or(0)
    }

    pub fn card_visit_count(&self, card_id: &str) -> u64 {
        self.card_visit_counts.get(card_id).copied().unwrap_or(0)
    }

    /// Cards currently mapped to a node.
    pub fn node_cards(&self, node_id: &str) -> Option<&BTreeSet<String>> {
        self.node_card_mapping.get(node_id)
    }

    /// Cards visited on behalf of a node.
    pub fn visited_cards_for_node(&self, node_id: &str) -> Option<&BTreeSet<String>> {
        self.visited_cards_per_node.get(node_id)
    }

    pub fn known_node_ids(&self) -> Option<&BTreeSet<String>> {
        self.known_node_ids.as_ref()
    }

    pub fn known_card_ids(&self) -> Option<&BTreeSet<String>> {
        self.known_card_ids.as_ref()
    }

    pub fn node_graph(&self, node_id: &str) -> Option<&str> {
        self.node_graphs.get(node_id).map(String::as_str)
    }

    /// Aggregate statistics bounded to the known universes.
    pub fn compute_stats(&self) -> CoverageStats {
        let nodes = bounded_tally(
            &self.visited_nodes,
            self.known_node_ids.as_ref(),
            self.total_nodes,
        );
        let cards = bounded_tally(
            &self.visited_cards,
            self.known_card_ids.as_ref(),
            self.total_cards,
        );

        let mut per_node_card_coverage = BTreeMap::new();
        let mut node_card_summary = Vec::with_capacity(self.node_card_mapping.len());
        for (node_id, cards_for_node) in &self.node_card_mapping {
            let empty = BTreeSet::new();
            let visited_for_node = self.visited_cards_per_node.get(node_id).unwrap_or(&empty);
            let visited: Vec<String> = visited_for_node
                .intersection(cards_for_node)
                .cloned()
                .collect();
            let unvisited: Vec<String> = cards_for_node
                .difference(visited_for_node)
                .cloned()
                .collect();

            node_card_summary.push(NodeCardSummary {
                node_id: node_id.clone(),
                graph: self.node_graphs.get(node_id).cloned(),
                visited_cards: visited.len(),
                total_cards: cards_for_node.len(),
                percent: percent(visited.len(), cards_for_node.len()),
            });
            per_node_card_coverage.insert(
                node_id.clone(),
                NodeCardCoverage {
                    card_ids: cards_for_node.iter().cloned().collect(),
                    visited: visited.len(),
                    total: cards_for_node.len(),
                    unvisited: unvisited.len(),
                    visited_card_ids: visited,
                    unvisited_card_ids: unvisited,
                },
            );
        }

        CoverageStats {
            nodes,
            cards,
            visited_node_ids: self.visited_nodes.iter().cloned().collect(),
            visited_card_ids: self.visited_cards.iter().cloned().collect(),
            node_visit_counts: self.node_visit_counts.clone(),
            card_visit_counts: self.card_visit_counts.clone(),
            node_card_mapping: sorted_lists(&self.node_card_mapping),
            visited_cards_per_node: sorted_lists(&self.visited_cards_per_node),
            per_node_card_coverage,
            node_card_summary,
            node_graphs: self.node_graphs.clone(),
            known_node_ids: self
                .known_node_ids
                .as_ref()
                .map(|ids| ids.iter().cloned().collect()),
            known_card_ids: self
                .known_card_ids
                .as_ref()
                .map(|ids| ids.iter().cloned().collect()),
        }
    }
}

fn bounded_tally(
    visited: &BTreeSet<String>,
    known: Option<&BTreeSet<String>>,
    declared: usize,
) -> Tally {
    match known {
        Some(known) => Tally::new(visited.intersection(known).count(), known.len()),
        None => Tally::new(visited.len(), declared),
    }
}

fn sorted_lists(map: &BTreeMap<String, BTreeSet<String>>) -> BTreeMap<String, Vec<String>> {
    map.iter()
        .map(|(key, values)| (key.clone(), values.iter().cloned().collect()))
        .collect()
}
