//! Tolerant readers for graph and manifest artifacts.
//!
//! The ingestion pipeline writes these files in several loosely related shapes.
//! Every shape question is answered here, and the rest of the crate only sees
//! the canonical [`GraphInventory`] and [`ManifestInventory`]. Missing files are
//! skipped quietly; unreadable or malformed ones are skipped with a warning.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{IngestError, IngestResult};

/// Graph documents are named `graph_<Label>.json`.
const GRAPH_FILE_PREFIX: &str = "graph_";
const GRAPH_FILE_EXTENSION: &str = "json";

const MANIFEST_FILE: &str = "manifest.json";
const CARDS_FILE: &str = "cards.jsonl";
const FILES_FILE: &str = "files.json";

/// Keys under which a reference object may carry its card ID, in priority order.
const REFERENCE_ID_KEYS: [&str; 4] = ["card_id", "id", "card", "cardId"];
/// Keys naming an entry's content type inside `cards`/`artifacts` lists.
const CONTENT_TYPE_KEYS: [&str; 3] = ["type", "kind", "content_type"];
/// Content-type fragments accepted as card-like.
const CARD_TYPE_HINTS: [&str; 5] = ["card", "code", "file", "source", "artifact"];

/// Canonical view of every graph document in a directory.
#[derive(Debug, Clone, Default)]
pub struct GraphInventory {
    /// Node entries across all graphs, duplicates included.
    pub total_nodes: usize,
    pub known_node_ids: BTreeSet<String>,
    pub node_cards: BTreeMap<String, BTreeSet<String>>,
    /// Node → label of the graph that declared it (first graph wins).
    pub node_graphs: BTreeMap<String, String>,
    pub referenced_card_ids: BTreeSet<String>,
    pub graphs_loaded: usize,
}

/// Canonical view of a manifest directory.
#[derive(Debug, Clone, Default)]
pub struct ManifestInventory {
    /// Explicit `num_cards`, else the length of the `files` list.
    pub declared_cards: Option<usize>,
    pub repo_root: Option<String>,
    pub card_ids: BTreeSet<String>,
    /// `(path, card_id)` pairs for the resolver index.
    pub path_aliases: Vec<(String, String)>,
}

#[derive(Debug)]
struct GraphDocument {
    label: String,
    entries: usize,
    nodes: Vec<(String, BTreeSet<String>)>,
}

/// Read every `graph_*.json` document under `dir`.
pub fn read_graphs(dir: &Path) -> GraphInventory {
    let mut inventory = GraphInventory::default();

    for path in graph_files(dir) {
        let document = match read_graph(&path) {
            Ok(document) => document,
            Err(e) => {
                warn!(error = %e, "Skipping graph document");
                continue;
            }
        };

        inventory.graphs_loaded += 1;
        inventory.total_nodes += document.entries;
        for (node_id, cards) in document.nodes {
            inventory.referenced_card_ids.extend(cards.iter().cloned());
            inventory
                .node_graphs
                .entry(node_id.clone())
                .or_insert_with(|| document.label.clone());
            inventory
                .node_cards
                .entry(node_id.clone())
                .or_default()
                .extend(cards);
            inventory.known_node_ids.insert(node_id);
        }
    }

    debug!(
        dir = %dir.display(),
        graphs = inventory.graphs_loaded,
        nodes = inventory.known_node_ids.len(),
        "Graph documents read"
    );
    inventory
}

/// Read `manifest.json`, `cards.jsonl` and `files.json` under `dir`.
pub fn read_manifest(dir: &Path) -> ManifestInventory {
    let mut inventory = ManifestInventory::default();
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "Manifest directory missing");
        return inventory;
    }

    let manifest_path = dir.join(MANIFEST_FILE);
    if manifest_path.exists() {
        if let Err(e) = read_manifest_header(&manifest_path, &mut inventory) {
            warn!(error = %e, "Skipping manifest header");
        }
    }

    let cards_path = dir.join(CARDS_FILE);
    if cards_path.exists() {
        if let Err(e) = read_card_records(&cards_path, &mut inventory) {
            warn!(error = %e, "Skipping card records");
        }
    }

    let files_path = dir.join(FILES_FILE);
    if files_path.exists() {
        if let Err(e) = read_file_list(&files_path, &mut inventory) {
            warn!(error = %e, "Skipping file list");
        }
    }

    inventory
}

fn graph_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Graph directory unavailable");
            return Vec::new();
        }
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            let name_ok = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(GRAPH_FILE_PREFIX));
            let ext_ok = path.extension().and_then(|e| e.to_str()) == Some(GRAPH_FILE_EXTENSION);
            name_ok && ext_ok && path.is_file()
        })
        .collect();
    files.sort();
    files
}

fn read_json(path: &Path) -> IngestResult<Value> {
    let text = fs::read_to_string(path).map_err(|source| IngestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| IngestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn shape_error(path: &Path, message: &str) -> IngestError {
    IngestError::Shape {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn read_graph(path: &Path) -> IngestResult<GraphDocument> {
    let value = read_json(path)?;
    let root = value
        .as_object()
        .ok_or_else(|| shape_error(path, "graph document is not an object"))?;

    let label = ["name", "graph_name"]
        .iter()
        .find_map(|key| root.get(*key).and_then(Value::as_str))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| label_from_file_name(path));

    let entries = match root.get("nodes") {
        None | Some(Value::Null) => {
            return Ok(GraphDocument {
                label,
                entries: 0,
                nodes: Vec::new(),
            })
        }
        Some(Value::Array(entries)) => entries,
        Some(_) => return Err(shape_error(path, "`nodes` is not a list")),
    };

    let nodes = entries
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|node| {
            let node_id = node.get("id").and_then(scalar_id)?;
            Some((node_id, node_card_refs(node)))
        })
        .collect();

    Ok(GraphDocument {
        label,
        entries: entries.len(),
        nodes,
    })
}

fn label_from_file_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    stem.strip_prefix(GRAPH_FILE_PREFIX)
        .unwrap_or(stem)
        .to_string()
}

/// Card references of one graph node.
///
/// `source_refs` (or `refs` when that is absent or empty) holds strings or
/// reference objects. `cards` and `artifacts` hold entries filtered by
/// [`looks_like_card`].
pub(crate) fn node_card_refs(node: &Map<String, Value>) -> BTreeSet<String> {
    let mut cards = BTreeSet::new();

    let refs = ["source_refs", "refs"].iter().find_map(|key| {
        node.get(*key)
            .and_then(Value::as_array)
            .filter(|list| !list.is_empty())
    });
    for reference in refs.into_iter().flatten() {
        if let Some(card_id) = reference_id(reference) {
            cards.insert(card_id);
        }
    }

    for key in ["cards", "artifacts"] {
        let Some(entries) = node.get(key).and_then(Value::as_array) else {
            continue;
        };
        for entry in entries.iter().filter(|entry| looks_like_card(entry)) {
            if let Some(card_id) = reference_id(entry) {
                cards.insert(card_id);
            }
        }
    }

    cards
}

fn reference_id(reference: &Value) -> Option<String> {
    match reference {
        Value::Object(map) => REFERENCE_ID_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(scalar_id))
            .or_else(|| {
                map.get("value")
                    .and_then(Value::as_str)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            }),
        other => scalar_id(other),
    }
}

fn looks_like_card(entry: &Value) -> bool {
    match entry {
        Value::String(_) | Value::Number(_) => true,
        Value::Object(map) => {
            let content_type = CONTENT_TYPE_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str));
            match content_type {
                None => true,
                Some(kind) => {
                    let kind = kind.to_lowercase();
                    CARD_TYPE_HINTS.iter().any(|hint| kind.contains(hint))
                }
            }
        }
        _ => false,
    }
}

/// A non-empty string, or a number rendered as a string.
fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_path(map: &Map<String, Value>) -> Option<String> {
    ["relpath", "path"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

fn read_manifest_header(path: &Path, inventory: &mut ManifestInventory) -> IngestResult<()> {
    let value = read_json(path)?;
    let root = value
        .as_object()
        .ok_or_else(|| shape_error(path, "manifest is not an object"))?;

    inventory.declared_cards = match (root.get("num_cards"), root.get("files")) {
        (Some(Value::Number(n)), _) if n.is_u64() => n.as_u64().map(|n| n as usize),
        (_, Some(Value::Array(files))) => Some(files.len()),
        _ => None,
    };
    inventory.repo_root = root
        .get("repository")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    Ok(())
}

fn read_card_records(path: &Path, inventory: &mut ManifestInventory) -> IngestResult<()> {
    let text = fs::read_to_string(path).map_err(|source| IngestError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut malformed = 0usize;
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let record = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(record)) => record,
            _ => {
                malformed += 1;
                continue;
            }
        };
        let Some(card_id) = record.get("id").and_then(scalar_id) else {
            continue;
        };

        let mut paths: Vec<String> = first_path(&record).into_iter().collect();
        if let Some(metadata) = record.get("metadata").and_then(Value::as_object) {
            paths.extend(first_path(metadata));
        }
        for card_path in paths {
            inventory.path_aliases.push((card_path, card_id.clone()));
        }
        inventory.card_ids.insert(card_id);
    }

    if malformed > 0 {
        warn!(path = %path.display(), malformed, "Skipped malformed card records");
    }
    Ok(())
}

fn read_file_list(path: &Path, inventory: &mut ManifestInventory) -> IngestResult<()> {
    let value = read_json(path)?;
    let entries = value
        .as_array()
        .ok_or_else(|| shape_error(path, "file list is not a list"))?;

    for entry in entries.iter().filter_map(Value::as_object) {
        let file_path = first_path(entry);
        let card_ids = entry
            .get("card_ids")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for card_id in card_ids.iter().filter_map(scalar_id) {
            if let Some(file_path) = &file_path {
                inventory
                    .path_aliases
                    .push((file_path.clone(), card_id.clone()));
            }
            inventory.card_ids.insert(card_id);
        }
    }
    Ok(())
}
