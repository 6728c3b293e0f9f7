//! Session tracker: the tracking API used by the investigation loop.
//!
//! Every mutating call takes the session lock, applies the change, publishes a
//! fresh coverage snapshot and rewrites the session document before releasing
//! the lock, so an event and its persistence happen as one unit. Write failures
//! are logged and swallowed; the in-memory state stays authoritative and the
//! next successful write catches the file up.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::persistence;
use super::{InvestigationEntry, PlanningBatch, SessionRecord, SessionStatus};
use crate::config::SessionConfig;
use crate::coverage::{CoverageStats, CoverageStore};
use crate::initializer::CoverageInitializer;
use crate::resolver::CardResolver;

/// Investigation field holding a caller timestamp that could not be parsed.
const CALLER_TIMESTAMP_KEY: &str = "caller_timestamp";

/// Generate a new session ID.
pub fn generate_session_id() -> String {
    format!("session_{}", Uuid::new_v4().simple())
}

/// State guarded by the session lock.
#[derive(Debug)]
struct TrackerState {
    record: SessionRecord,
    coverage: CoverageStore,
    resolver: CardResolver,
}

/// Tracks one audit session: coverage, investigations, planning and status.
///
/// The tracker is `Send + Sync`; share it behind an `Arc` across threads.
#[derive(Debug)]
pub struct SessionTracker {
    session_id: String,
    session_file: PathBuf,
    pretty_json: bool,
    state: Mutex<TrackerState>,
    /// Snapshot published by the latest mutation, read without the session lock.
    published: RwLock<Arc<CoverageStats>>,
}

impl SessionTracker {
    /// Open the session `session_id` under `session_dir`, resuming it when a
    /// readable session file exists.
    pub fn new(session_dir: impl AsRef<Path>, session_id: impl Into<String>) -> Self {
        Self::open(session_dir.as_ref(), session_id.into(), true)
    }

    /// Open a session from configuration, generating an ID when none is set.
    pub fn from_config(config: &SessionConfig) -> Self {
        let session_id = config.id.clone().unwrap_or_else(generate_session_id);
        Self::open(&config.dir, session_id, config.pretty_json)
    }

    fn open(session_dir: &Path, session_id: String, pretty_json: bool) -> Self {
        if let Err(e) = std::fs::create_dir_all(session_dir) {
            warn!(dir = %session_dir.display(), error = %e, "Failed to create session directory");
        }
        let session_file = persistence::session_path(session_dir, &session_id);

        let record = match persistence::load(&session_file, &session_id) {
            Ok(Some(record)) => {
                info!(
                    session_id = %session_id,
                    status = %record.status,
                    investigations = record.investigations.len(),
                    "Resumed existing session"
                );
                record
            }
            Ok(None) => {
                info!(session_id = %session_id, "Starting new session");
                SessionRecord::new(session_id.clone())
            }
            Err(e) => {
                warn!(
                    path = %session_file.display(),
                    error = %e,
                    "Unreadable session file, starting a fresh session"
                );
                SessionRecord::new(session_id.clone())
            }
        };

        let coverage = CoverageStore::from_stats(&record.coverage);
        let published = RwLock::new(Arc::new(coverage.compute_stats()));

        Self {
            session_id,
            session_file,
            pretty_json,
            state: Mutex::new(TrackerState {
                record,
                coverage,
                resolver: CardResolver::new(),
            }),
            published,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Path of the persisted session document.
    pub fn session_file(&self) -> &Path {
        &self.session_file
    }

    /// Rebuild the node/card mapping and known universes from the current
    /// graph and manifest artifacts, carrying prior visits forward.
    pub fn initialize_coverage(&self, graphs_dir: impl AsRef<Path>, manifest_dir: impl AsRef<Path>) {
        let initializer = CoverageInitializer::new(graphs_dir.as_ref(), manifest_dir.as_ref());
        let mut state = self.lock();
        state.resolver = initializer.initialize(&mut state.coverage);
        self.commit(&mut state);
    }

    /// Record the models in use.
    pub fn set_models(&self, scout_model: &str, strategist_model: &str) {
        let mut state = self.lock();
        state.record.models = [
            ("scout".to_string(), scout_model.to_string()),
            ("strategist".to_string(), strategist_model.to_string()),
        ]
        .into_iter()
        .collect();
        self.commit(&mut state);
    }

    /// Track that a node was visited during investigation.
    pub fn track_node_visit(&self, node_id: &str) {
        let mut state = self.lock();
        state.coverage.mark_node_visited(node_id);
        self.commit(&mut state);
    }

    /// Track several node visits at once.
    pub fn track_nodes_batch<I, S>(&self, node_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.lock();
        for node_id in node_ids {
            state.coverage.mark_node_visited(node_id.as_ref());
        }
        self.commit(&mut state);
    }

    /// Track that a card was analyzed. `reference` may be a card ID or any
    /// spelling of the card's path.
    pub fn track_card_visit(&self, reference: &str) {
        let mut state = self.lock();
        record_card_visit(&mut state, reference);
        self.commit(&mut state);
    }

    /// Track several card references at once.
    pub fn track_cards_batch<I, S>(&self, references: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.lock();
        for reference in references {
            record_card_visit(&mut state, reference.as_ref());
        }
        self.commit(&mut state);
    }

    /// Append an investigation to the history. Object fields are stored
    /// beside the timestamp; any other value is stored under `value`.
    ///
    /// A caller-supplied `timestamp` is used when it parses. Otherwise the
    /// entry is stamped now and the caller's value moves to `caller_timestamp`.
    pub fn add_investigation(&self, investigation: Value) {
        let mut details = match investigation {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let timestamp = match details.remove("timestamp") {
            None => Utc::now(),
            Some(raw) => match raw.as_str().and_then(persistence::try_parse_timestamp) {
                Some(parsed) => parsed,
                None => {
                    debug!(timestamp = %raw, "Unparseable investigation timestamp, keeping it aside");
                    details.insert(CALLER_TIMESTAMP_KEY.to_string(), raw);
                    Utc::now()
                }
            },
        };

        let mut state = self.lock();
        state
            .record
            .investigations
            .push(InvestigationEntry { timestamp, details });
        self.commit(&mut state);
    }

    /// Append a planning batch to the history.
    pub fn add_planning(&self, items: Vec<Value>) {
        let mut state = self.lock();
        state.record.planning_history.push(PlanningBatch {
            timestamp: Utc::now(),
            items,
        });
        self.commit(&mut state);
    }

    /// Replace the token accounting structure wholesale.
    pub fn update_token_usage(&self, usage: Value) {
        let mut state = self.lock();
        state.record.token_usage = usage;
        self.commit(&mut state);
    }

    /// Change the status without finalizing. Ignored once finalized.
    pub fn set_status(&self, status: impl Into<SessionStatus>) {
        let status = status.into();
        let mut state = self.lock();
        if state.record.is_finalized() {
            warn!(
                session_id = %self.session_id,
                requested = %status,
                current = %state.record.status,
                "Session already finalized, status unchanged"
            );
            return;
        }
        state.record.status = status;
        self.commit(&mut state);
    }

    /// Finalize the session: fix its status and end time. Ignored once finalized.
    pub fn finalize(&self, status: impl Into<SessionStatus>) {
        let status = status.into();
        let mut state = self.lock();
        if state.record.is_finalized() {
            warn!(session_id = %self.session_id, "Session already finalized");
            return;
        }
        state.record.status = status;
        state.record.end_time = Some(Utc::now());
        info!(session_id = %self.session_id, status = %state.record.status, "Session finalized");
        self.commit(&mut state);
    }

    /// Current coverage statistics.
    ///
    /// Returns the snapshot published by the most recent mutation without
    /// taking the session lock, so it may trail a mutation in progress.
    pub fn get_coverage_stats(&self) -> Arc<CoverageStats> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.lock().record.status.clone()
    }

    /// Whether the session has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.lock().record.is_finalized()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the coverage snapshot and rewrite the session file. Called with
    /// the session lock held.
    fn commit(&self, state: &mut TrackerState) {
        let stats = state.coverage.compute_stats();
        *self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(stats.clone());
        state.record.coverage = stats;

        if let Err(e) = persistence::save(&self.session_file, &state.record, self.pretty_json) {
            warn!(
                session_id = %self.session_id,
                error = %e,
                "Failed to save session data"
            );
        }
    }
}

/// Resolve a card reference and apply the visit to the store.
///
/// Unresolvable references are tracked verbatim: they count as visited cards
/// but belong to no node.
fn record_card_visit(state: &mut TrackerState, reference: &str) {
    if reference.is_empty() {
        return;
    }

    let TrackerState {
        coverage, resolver, ..
    } = state;
    let resolved = resolver.resolve(reference, |id| coverage.is_known_card(id));

    if resolved.is_empty() {
        debug!(reference, "Unresolved card reference, tracking raw identifier");
        coverage.mark_card_visited(reference);
        return;
    }

    for card_id in &resolved {
        coverage.mark_card_visited(card_id);
        for node_id in coverage.nodes_referencing(card_id) {
            coverage.mark_card_visited_for_node(&node_id, card_id);
        }
    }
}
