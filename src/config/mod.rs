use std::env;
use std::path::PathBuf;

use crate::error::{AppError, AppResult};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub inputs: InputConfig,
    pub logging: LoggingConfig,
}

/// Session persistence configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory holding one `<session_id>.json` document per session
    pub dir: PathBuf,
    /// Session to open; `None` starts a new one with a generated ID
    pub id: Option<String>,
    /// Indent the persisted JSON document
    pub pretty_json: bool,
}

/// Read-only artifact locations produced by the ingestion pipeline
#[derive(Debug, Clone)]
pub struct InputConfig {
    pub graphs_dir: PathBuf,
    pub manifest_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let id = match env::var("AUDIT_SESSION_ID") {
            Ok(raw) if !raw.trim().is_empty() => Some(validate_session_id(raw.trim())?),
            _ => None,
        };

        let session = SessionConfig {
            dir: PathBuf::from(
                env::var("AUDIT_SESSION_DIR").unwrap_or_else(|_| "./.audit/sessions".to_string()),
            ),
            id,
            pretty_json: env::var("AUDIT_PRETTY_JSON")
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(true),
        };

        let inputs = InputConfig {
            graphs_dir: PathBuf::from(
                env::var("AUDIT_GRAPHS_DIR").unwrap_or_else(|_| "./.audit/graphs".to_string()),
            ),
            manifest_dir: PathBuf::from(
                env::var("AUDIT_MANIFEST_DIR").unwrap_or_else(|_| "./.audit/manifest".to_string()),
            ),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        Ok(Config {
            session,
            inputs,
            logging,
        })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./.audit/sessions"),
            id: None,
            pretty_json: true,
        }
    }
}

/// Session IDs become file names, so they must not escape the session directory.
pub fn validate_session_id(id: &str) -> AppResult<String> {
    let invalid = |reason: &str| AppError::Config {
        message: format!("invalid session id {:?}: {}", id, reason),
    };

    if id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if id == "." || id == ".." {
        return Err(invalid("must not be a relative directory name"));
    }
    if id.contains('/') || id.contains('\\') {
        return Err(invalid("must not contain path separators"));
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(invalid("must not contain control characters"));
    }
    Ok(id.to_string())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
