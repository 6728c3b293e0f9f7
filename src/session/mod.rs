//! Audit session records and their tracker.
//!
//! A [`SessionRecord`] is the unit persisted to disk: metadata, history logs,
//! opaque token accounting and the latest coverage snapshot. The
//! [`SessionTracker`] owns the live record and coverage store and rewrites the
//! record after every mutation.

pub mod persistence;
mod tracker;

pub use tracker::{generate_session_id, SessionTracker};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::coverage::CoverageStats;

/// Lifecycle status of a session.
///
/// Unknown status strings from callers or older files are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SessionStatus {
    /// Session is running.
    #[default]
    Active,
    /// Session finished normally.
    Completed,
    /// Session was stopped before finishing.
    Interrupted,
    /// Session ended with an error.
    Failed,
    /// Any other caller-defined status.
    Other(String),
}

impl SessionStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Interrupted => "interrupted",
            SessionStatus::Failed => "failed",
            SessionStatus::Other(status) => status.as_str(),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for SessionStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "active" => SessionStatus::Active,
            "completed" => SessionStatus::Completed,
            "interrupted" => SessionStatus::Interrupted,
            "failed" => SessionStatus::Failed,
            _ => SessionStatus::Other(s.to_string()),
        }
    }
}

impl From<String> for SessionStatus {
    fn from(s: String) -> Self {
        SessionStatus::from(s.as_str())
    }
}

impl From<SessionStatus> for String {
    fn from(status: SessionStatus) -> Self {
        status.as_str().to_string()
    }
}

/// One investigation, stored with the caller's fields flattened beside the timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// One batch of planning items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningBatch {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<Value>,
}

/// Persisted session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub schema_version: u32,
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    /// Set once by finalize; a record with an end time is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: SessionStatus,
    /// Role (e.g. "scout", "strategist") → model identifier.
    #[serde(default)]
    pub models: BTreeMap<String, String>,
    #[serde(default)]
    pub investigations: Vec<InvestigationEntry>,
    #[serde(default)]
    pub planning_history: Vec<PlanningBatch>,
    /// Token accounting supplied by the caller, stored verbatim.
    #[serde(default = "empty_object")]
    pub token_usage: Value,
    #[serde(default)]
    pub coverage: CoverageStats,
}

impl SessionRecord {
    /// Create a fresh active record.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            schema_version: persistence::CURRENT_SCHEMA_VERSION,
            session_id: session_id.into(),
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Active,
            models: BTreeMap::new(),
            investigations: Vec::new(),
            planning_history: Vec::new(),
            token_usage: empty_object(),
            coverage: CoverageStats::default(),
        }
    }

    /// Whether the record reached its terminal state.
    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
