//! Coverage initializer tests against artifacts on disk
//!
//! Graph documents and manifest files are written to a temp directory and
//! read back through the public initializer API.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;

use audit_coverage::initializer::ingest::{read_graphs, read_manifest};
use audit_coverage::{CoverageInitializer, CoverageStore};

fn set(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn write(dir: &Path, name: &str, body: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), body).unwrap();
}

// ============================================================================
// Graph documents
// ============================================================================

#[test]
fn test_graph_documents_are_merged() {
    let dir = tempdir().unwrap();
    let graphs = dir.path().join("graphs");
    write(
        &graphs,
        "graph_SystemArchitecture.json",
        &json!({
            "name": "System Architecture",
            "nodes": [
                {"id": "AuthService", "source_refs": ["card-auth", {"card_id": "card-token"}]},
                {"id": "Storage", "refs": ["card-db"]},
                {"label": "no id, ignored"}
            ]
        })
        .to_string(),
    );
    write(
        &graphs,
        "graph_DataFlow.json",
        &json!({
            "nodes": [
                {"id": "AuthService", "artifacts": [{"id": "card-session", "type": "code"}]},
                {"id": 42, "cards": ["card-misc", {"id": "note-1", "type": "comment"}]}
            ]
        })
        .to_string(),
    );

    let inventory = read_graphs(&graphs);
    assert_eq!(inventory.graphs_loaded, 2);
    assert_eq!(inventory.total_nodes, 5);
    assert_eq!(inventory.known_node_ids, set(&["42", "AuthService", "Storage"]));
    assert_eq!(
        inventory.node_cards["AuthService"],
        set(&["card-auth", "card-session", "card-token"])
    );
    assert_eq!(inventory.node_cards["42"], set(&["card-misc"]));
    assert!(!inventory.referenced_card_ids.contains("note-1"));
    // Files are read in sorted order, so DataFlow labels the shared node first.
    assert_eq!(inventory.node_graphs["AuthService"], "DataFlow");
    assert_eq!(inventory.node_graphs["Storage"], "System Architecture");
}

#[test]
fn test_unusable_graph_files_are_skipped() {
    let dir = tempdir().unwrap();
    let graphs = dir.path().join("graphs");
    write(&graphs, "graph_broken.json", "{ not json");
    write(&graphs, "graph_list.json", "[1, 2, 3]");
    write(&graphs, "graph_bad_nodes.json", r#"{"nodes": "nope"}"#);
    write(&graphs, "graph_empty.json", r#"{"name": "Empty"}"#);
    write(&graphs, "other.json", r#"{"nodes": [{"id": "ignored"}]}"#);
    write(&graphs, "graph_notes.txt", r#"{"nodes": [{"id": "ignored"}]}"#);
    write(&graphs, "graph_ok.json", r#"{"nodes": [{"id": "n1"}]}"#);

    let inventory = read_graphs(&graphs);
    assert_eq!(inventory.graphs_loaded, 2);
    assert_eq!(inventory.known_node_ids, set(&["n1"]));
    assert_eq!(inventory.node_cards["n1"], set(&[]));
}

// ============================================================================
// Manifest
// ============================================================================

#[test]
fn test_manifest_files_are_combined() {
    let dir = tempdir().unwrap();
    let manifest = dir.path().join("manifest");
    write(
        &manifest,
        "manifest.json",
        &json!({"repository": "/work/repo", "num_cards": 6}).to_string(),
    );
    write(
        &manifest,
        "cards.jsonl",
        &[
            json!({"id": "card-1", "relpath": "src/a.rs"}).to_string(),
            "this line is not json".to_string(),
            json!({"id": "card-2", "metadata": {"path": "src/b.rs"}}).to_string(),
            json!({"relpath": "src/no_id.rs"}).to_string(),
            String::new(),
            json!({"id": 3}).to_string(),
        ]
        .join("\n"),
    );
    write(
        &manifest,
        "files.json",
        &json!([
            {"path": "src/c.rs", "card_ids": ["card-4", "card-5"]},
            {"card_ids": ["card-6"]},
            "junk"
        ])
        .to_string(),
    );

    let inventory = read_manifest(&manifest);
    assert_eq!(inventory.declared_cards, Some(6));
    assert_eq!(inventory.repo_root.as_deref(), Some("/work/repo"));
    assert_eq!(
        inventory.card_ids,
        set(&["3", "card-1", "card-2", "card-4", "card-5", "card-6"])
    );
    assert!(inventory
        .path_aliases
        .contains(&("src/b.rs".to_string(), "card-2".to_string())));
    assert!(inventory
        .path_aliases
        .contains(&("src/c.rs".to_string(), "card-5".to_string())));
}

#[test]
fn test_manifest_file_count_stands_in_for_card_count() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "manifest.json",
        &json!({"files": ["a.rs", "b.rs", "c.rs"]}).to_string(),
    );

    let inventory = read_manifest(dir.path());
    assert_eq!(inventory.declared_cards, Some(3));
    assert_eq!(inventory.repo_root, None);
}

#[test]
fn test_malformed_manifest_files_are_skipped() {
    let dir = tempdir().unwrap();
    write(dir.path(), "manifest.json", "[\"not an object\"]");
    write(dir.path(), "files.json", "{\"not\": \"a list\"}");
    write(dir.path(), "cards.jsonl", &json!({"id": "card-1"}).to_string());

    let inventory = read_manifest(dir.path());
    assert_eq!(inventory.declared_cards, None);
    assert_eq!(inventory.card_ids, set(&["card-1"]));
}

// ============================================================================
// Initialization
// ============================================================================

#[test]
fn test_initialize_counts_nodes_and_cards() {
    let dir = tempdir().unwrap();
    let graphs = dir.path().join("graphs");
    let manifest = dir.path().join("manifest");
    write(
        &graphs,
        "graph_Test.json",
        &json!({"nodes": [{"id": "n1"}, {"id": "n2"}]}).to_string(),
    );
    write(
        &manifest,
        "cards.jsonl",
        &["card-1", "card-2", "card-3"]
            .iter()
            .map(|id| json!({"id": id}).to_string())
            .collect::<Vec<_>>()
            .join("\n"),
    );

    let mut store = CoverageStore::new();
    CoverageInitializer::new(&graphs, &manifest).initialize(&mut store);
    store.mark_node_visited("n1");
    store.mark_card_visited("card-2");

    let stats = store.compute_stats();
    assert_eq!((stats.nodes.visited, stats.nodes.total), (1, 2));
    assert_eq!((stats.cards.visited, stats.cards.total), (1, 3));
    assert_eq!(stats.nodes.percent, 50.0);
    assert_eq!(stats.cards.percent, 33.3);
}

#[test]
fn test_initialize_with_missing_directories() {
    let dir = tempdir().unwrap();
    let initializer =
        CoverageInitializer::new(dir.path().join("absent"), dir.path().join("also-absent"));

    let mut store = CoverageStore::new();
    let resolver = initializer.initialize(&mut store);

    assert!(resolver.is_empty());
    let stats = store.compute_stats();
    assert_eq!(stats.nodes.total, 0);
    assert_eq!(stats.cards.total, 0);
    assert!(stats.node_card_mapping.is_empty());
}

#[test]
fn test_initialize_labels_nodes_by_graph() {
    let dir = tempdir().unwrap();
    let graphs = dir.path().join("graphs");
    write(
        &graphs,
        "graph_CallGraph.json",
        &json!({"nodes": [{"id": "main", "source_refs": ["card-main"]}]}).to_string(),
    );

    let mut store = CoverageStore::new();
    CoverageInitializer::new(&graphs, dir.path().join("manifest")).initialize(&mut store);

    assert_eq!(store.node_graph("main"), Some("CallGraph"));
    let summary = store.compute_stats().node_summary("main").unwrap();
    assert_eq!(summary.graph.as_deref(), Some("CallGraph"));
    assert_eq!(summary.total_cards, 1);
}
