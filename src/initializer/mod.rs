//! Coverage initialization from graph and manifest artifacts.
//!
//! ```text
//! graphs/graph_*.json ─┐
//!                      ├─▶ ingest (shape-sniffing) ─▶ CoverageInputs ─▶ apply ─▶ CoverageStore
//! manifest/*.json(l) ──┘                                                  └──▶ CardResolver
//! ```
//!
//! Initialization may run repeatedly in one session as the graphs are
//! regenerated. Each run replaces the mapping and universes, and carries each
//! node's visited cards forward by intersecting them with its new card set.

pub mod ingest;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::coverage::CoverageStore;
use crate::resolver::CardResolver;

pub use ingest::{GraphInventory, ManifestInventory};

/// Canonical inputs read from one graph/manifest generation.
#[derive(Debug, Clone, Default)]
pub struct CoverageInputs {
    pub graphs: GraphInventory,
    pub manifest: ManifestInventory,
}

/// Rebuilds coverage mapping and universes from external artifacts.
#[derive(Debug, Clone)]
pub struct CoverageInitializer {
    graphs_dir: PathBuf,
    manifest_dir: PathBuf,
}

impl CoverageInitializer {
    /// Create an initializer over a graphs directory and a manifest directory.
    pub fn new(graphs_dir: impl Into<PathBuf>, manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            graphs_dir: graphs_dir.into(),
            manifest_dir: manifest_dir.into(),
        }
    }

    pub fn graphs_dir(&self) -> &Path {
        &self.graphs_dir
    }

    pub fn manifest_dir(&self) -> &Path {
        &self.manifest_dir
    }

    /// Read both directories. Never fails; unusable files are skipped.
    pub fn load(&self) -> CoverageInputs {
        CoverageInputs {
            graphs: ingest::read_graphs(&self.graphs_dir),
            manifest: ingest::read_manifest(&self.manifest_dir),
        }
    }

    /// Read the artifacts and rebuild `store` from them.
    pub fn initialize(&self, store: &mut CoverageStore) -> CardResolver {
        apply(self.load(), store)
    }
}

/// Rebuild `store` from `inputs` and return the resolver for this generation.
///
/// Visit sets and counters are kept. The mapping, graph labels, universes and
/// totals are replaced.
pub fn apply(inputs: CoverageInputs, store: &mut CoverageStore) -> CardResolver {
    let CoverageInputs {
        mut graphs,
        manifest,
    } = inputs;

    let mut resolver = match &manifest.repo_root {
        Some(root) => CardResolver::new().with_repo_root(root),
        None => CardResolver::new(),
    };
    for (path, card_id) in &manifest.path_aliases {
        resolver.index_path(path, card_id);
    }

    let known_card_ids: BTreeSet<String> = graphs
        .referenced_card_ids
        .union(&manifest.card_ids)
        .cloned()
        .collect();

    let previous_visits = store.reset_mapping();

    let node_ids: BTreeSet<String> = graphs
        .node_cards
        .keys()
        .chain(graphs.known_node_ids.iter())
        .cloned()
        .collect();
    for node_id in &node_ids {
        let cards = graphs.node_cards.remove(node_id).unwrap_or_default();
        let previously_visited = previous_visits.get(node_id).cloned().unwrap_or_default();
        store.register_node_cards(node_id, cards, Some(previously_visited));
        if let Some(graph) = graphs.node_graphs.get(node_id) {
            store.set_node_graph(node_id, graph);
        }
    }

    let total_cards = manifest
        .declared_cards
        .unwrap_or(0)
        .max(known_card_ids.len());

    info!(
        graphs = graphs.graphs_loaded,
        nodes = graphs.known_node_ids.len(),
        cards = known_card_ids.len(),
        declared_cards = total_cards,
        path_keys = resolver.len(),
        repo_root = ?resolver.repo_root(),
        "Coverage initialized"
    );

    store.set_known_universe(graphs.known_node_ids, known_card_ids);
    store.set_totals(graphs.total_nodes, total_cards);
    resolver
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn inputs(nodes: &[(&str, &[&str])], manifest_cards: &[(&str, &str)]) -> CoverageInputs {
        let mut graphs = GraphInventory {
            graphs_loaded: 1,
            total_nodes: nodes.len(),
            ..GraphInventory::default()
        };
        for (node, cards) in nodes {
            graphs.known_node_ids.insert(node.to_string());
            graphs.node_cards.insert(node.to_string(), set(cards));
            graphs.referenced_card_ids.extend(set(cards));
        }
        let mut manifest = ManifestInventory::default();
        for (card, path) in manifest_cards {
            manifest.card_ids.insert(card.to_string());
            manifest
                .path_aliases
                .push((path.to_string(), card.to_string()));
        }
        CoverageInputs { graphs, manifest }
    }

    #[test]
    fn test_apply_builds_mapping_and_universe() {
        let mut store = CoverageStore::new();
        let resolver = apply(
            inputs(
                &[("A", &["card1", "card2"]), ("B", &["card2"]), ("C", &[])],
                &[("card1", "src/x.ext"), ("card3", "src/z.ext")],
            ),
            &mut store,
        );

        assert_eq!(store.node_cards("A"), Some(&set(&["card1", "card2"])));
        assert_eq!(store.node_cards("C"), Some(&set(&[])));
        assert_eq!(store.known_card_ids(), Some(&set(&["card1", "card2", "card3"])));
        assert_eq!(store.known_node_ids(), Some(&set(&["A", "B", "C"])));
        assert_eq!(resolver.resolve("src/z.ext", |_| false), set(&["card3"]));

        let stats = store.compute_stats();
        assert_eq!(stats.cards.total, 3);
        assert_eq!(stats.nodes.total, 3);
    }

    #[test]
    fn test_apply_carries_visits_forward_by_intersection() {
        let mut store = CoverageStore::new();
        apply(inputs(&[("A", &["card1", "card2"])], &[]), &mut store);
        store.mark_card_visited("card1");
        store.mark_card_visited("card2");
        store.mark_card_visited_for_node("A", "card1");
        store.mark_card_visited_for_node("A", "card2");

        apply(inputs(&[("A", &["card1"])], &[]), &mut store);

        assert_eq!(store.visited_cards_for_node("A"), Some(&set(&["card1"])));
        assert!(store.nodes_referencing("card2").is_empty());
        assert_eq!(store.visited_cards().len(), 2);
        let stats = store.compute_stats();
        assert_eq!(stats.cards.visited, 1);
        assert_eq!(stats.cards.total, 1);
    }

    #[test]
    fn test_declared_total_never_below_known_cards() {
        let mut store = CoverageStore::new();
        let mut generation = inputs(&[("A", &["card1", "card2"])], &[]);
        generation.manifest.declared_cards = Some(1);
        apply(generation, &mut store);
        assert_eq!(store.compute_stats().cards.total, 2);

        let mut generation = inputs(&[("A", &["card1"])], &[]);
        generation.manifest.declared_cards = Some(10);
        generation.manifest.card_ids.clear();
        apply(generation, &mut store);
        // Percentages are bounded to the known universe; the declared total
        // only matters while no universe is known.
        assert_eq!(store.compute_stats().cards.total, 1);
    }

    #[test]
    fn test_generation_without_cards_or_nodes_bounds_stale_visits() {
        let mut store = CoverageStore::new();
        apply(inputs(&[("A", &["card1"])], &[]), &mut store);
        store.mark_node_visited("A");
        store.mark_card_visited("card1");
        store.mark_card_visited_for_node("A", "card1");

        apply(inputs(&[("A", &[])], &[]), &mut store);
        let stats = store.compute_stats();
        assert_eq!((stats.cards.visited, stats.cards.total), (0, 0));
        assert_eq!((stats.nodes.visited, stats.nodes.total), (1, 1));
        assert_eq!(store.visited_cards_for_node("A"), Some(&set(&[])));

        apply(CoverageInputs::default(), &mut store);
        let stats = store.compute_stats();
        assert_eq!((stats.nodes.visited, stats.nodes.total), (0, 0));
        assert_eq!((stats.cards.visited, stats.cards.total), (0, 0));
        assert_eq!(store.known_node_ids(), Some(&set(&[])));
        assert!(store.visited_nodes().contains("A"));
    }

    #[test]
    fn test_repo_root_feeds_resolver() {
        let mut store = CoverageStore::new();
        let mut generation = inputs(&[], &[("card1", "src/x.ext")]);
        generation.manifest.repo_root = Some("/work/repo".to_string());
        let resolver = apply(generation, &mut store);

        assert_eq!(resolver.repo_root(), Some("/work/repo"));
        assert_eq!(resolver.resolve("/work/repo/src/x.ext", |_| false), set(&["card1"]));
    }
}
