//! # Audit Coverage
//!
//! Coverage tracking and session state for exploratory code-audit runs.
//!
//! An audit explores a knowledge graph of logical **nodes**, each backed by one
//! or more **cards** (source artifacts such as a file or file fragment). This
//! crate reconciles the two, records which of each have been visited, and keeps
//! a durable, incrementally rewritten record of the session.
//!
//! ## Features
//!
//! - **Identifier resolution**: absolute paths, repository-relative paths, bare
//!   card IDs and mixed separators all resolve to the same canonical card
//! - **Consistent mapping**: the node ↔ card mapping stays bidirectional, and a
//!   node's visited cards stay a subset of its mapping across graph regeneration
//! - **Bounded statistics**: percentages are clipped to the current known
//!   universe, so stale or duplicate IDs never push coverage past 100%
//! - **Durable sessions**: every tracked event is persisted under the same lock
//!   that applied it; older session files are migrated on load
//!
//! ## Architecture
//!
//! ```text
//! graphs + manifest (external) → CoverageInitializer → CoverageStore
//!                                        ↓                  ↑
//! investigation loop → SessionTracker → CardResolver ───────┘
//!                            ↓
//!                   <session_id>.json
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use audit_coverage::SessionTracker;
//!
//! let tracker = SessionTracker::new("./.audit/sessions", "audit_42");
//! tracker.initialize_coverage("./.audit/graphs", "./.audit/manifest");
//! tracker.track_node_visit("AuthService");
//! tracker.track_card_visit("/work/repo/src/auth.rs");
//! println!("{:.1}% of cards", tracker.get_coverage_stats().cards.percent);
//! tracker.finalize("completed");
//! ```

#![warn(missing_docs)]

/// Configuration management.
pub mod config;
/// Coverage store and statistics.
pub mod coverage;
/// Error types and result aliases for the application.
pub mod error;
/// Coverage initialization from graph and manifest artifacts.
pub mod initializer;
/// Card identifier resolution.
pub mod resolver;
/// Session records, persistence and the session tracker.
pub mod session;

pub use config::Config;
pub use coverage::{CoverageStats, CoverageStore};
pub use error::{AppError, AppResult};
pub use initializer::CoverageInitializer;
pub use resolver::CardResolver;
pub use session::{SessionRecord, SessionStatus, SessionTracker};
