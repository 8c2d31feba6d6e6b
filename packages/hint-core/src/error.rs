//! Typed errors for the audit core.
//!
//! Uses `thiserror` for library errors. Rule handlers return
//! `anyhow::Result` and their failures never cross the report boundary as
//! errors: the orchestrator turns them into diagnostic findings.
//!
//! Only setup errors ([`ConfigError`], duplicate rules) abort a run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::RunState;

/// Errors raised by the orchestration layer.
#[derive(Debug, Error)]
pub enum HintError {
    /// Configuration could not be resolved
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Topic or topic pattern could not be parsed
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: &'static str },

    /// Two rules share one id
    #[error("rule '{0}' is registered more than once")]
    DuplicateRule(String),

    /// Orchestrator asked to skip or reverse a state
    #[error("invalid run transition: {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },

    /// Event arrived while the run is not accepting events
    #[error("event '{topic}' rejected: run is {state}")]
    NotRunning { topic: String, state: RunState },

    /// Finding recorded after the report was finalized
    #[error("report is closed; finding from '{rule_id}' for {resource} rejected")]
    ReportClosed { rule_id: String, resource: String },
}

/// Configuration faults. These fail fast at resolution time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Severity string not in {off, default, hint, warning, error}
    #[error("invalid severity '{value}'")]
    InvalidSeverity { value: String },

    /// Ignore pattern is not a valid regular expression
    #[error("malformed ignore pattern '{pattern}': {source}")]
    InvalidIgnorePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Rule options must be an object
    #[error("options for rule '{rule_id}' must be a JSON object")]
    OptionsNotObject { rule_id: String },

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Config file could not be read
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure outcome of a content fetch.
///
/// An HTTP error status (4xx/5xx) is not a `FetchError`; it is a successful
/// fetch whose response carries that status.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FetchError {
    /// URL could not be parsed as an absolute URL
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Transport gave up waiting
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    /// Connection, TLS or protocol failure
    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    /// Redirect response without a resolvable `Location`
    #[error("redirect {status_code} from {url} has no usable Location header")]
    MissingLocation { url: String, status_code: u16 },

    /// Explicitly configured redirect limit was exceeded
    #[error("more than {limit} redirects fetching {url}")]
    RedirectLimit { url: String, limit: usize },

    /// Redirect chain revisits a URL it already passed through
    #[error("redirect loop fetching {url} after {hops} redirects")]
    RedirectLoop { url: String, hops: usize },
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }

    /// URL the failure is attributed to.
    pub fn url(&self) -> &str {
        match self {
            FetchError::InvalidUrl { url }
            | FetchError::Timeout { url }
            | FetchError::Transport { url, .. }
            | FetchError::MissingLocation { url, .. }
            | FetchError::RedirectLimit { url, .. }
            | FetchError::RedirectLoop { url, .. } => url,
        }
    }
}

/// Error reported by the external connector. Aborts the current run.
#[derive(Debug, Clone, Error)]
#[error("connector error: {message}")]
pub struct ConnectorError {
    pub message: String,
}

impl ConnectorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, HintError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;
