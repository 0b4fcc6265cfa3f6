//! Error types for popstream-client

use std::{sync::LazyLock, time::Duration};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using popstream-client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while streaming an optimization run
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request or body read failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP error! status: {status}")]
    Status { status: u16, body: String },

    /// Request or body read exceeded the configured ceiling
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Server accepted the request but sent nothing to read
    #[error("No response body")]
    MissingBody,

    /// Transport failure reported only as text
    #[error("Transport error: {0}")]
    Transport(String),

    /// A `data: ` line whose payload was not a valid event record
    #[error("Malformed event line {line:?}: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// Request was cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Deliberate stops never enter the retry path.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Categorize this error, preferring what the transport told us and
    /// falling back to matching the rendered message.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Http(e) => {
                if e.is_timeout() {
                    ErrorCategory::Timeout
                } else if e.status().is_some_and(|s| !s.is_success()) {
                    ErrorCategory::Server
                } else if e.is_connect() || e.is_request() || e.is_body() {
                    ErrorCategory::Network
                } else {
                    ErrorCategory::classify(&e.to_string())
                }
            }
            Error::Status { .. } => ErrorCategory::Server,
            Error::Timeout(_) => ErrorCategory::Timeout,
            Error::Transport(message) => ErrorCategory::classify(message),
            Error::MissingBody
            | Error::Decode { .. }
            | Error::Cancelled
            | Error::InvalidConfig(_) => ErrorCategory::Unknown,
        }
    }
}

/// Broad failure taxonomy shown to collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Server,
    Timeout,
    Unknown,
}

static TIMEOUT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)time(?:d\s*|\s|-)?out|deadline exceeded").expect("valid regex")
});

/// HTTP status in the 4xx/5xx range mentioned next to "status" or "http".
static SERVER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:status|http)\D{0,3}[45]\d\d\b|internal server error|bad gateway|service unavailable")
        .expect("valid regex")
});

static NETWORK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)network|fetch|connection|connect\b|dns|econn(?:refused|reset|aborted)|broken pipe|unreachable",
    )
    .expect("valid regex")
});

impl ErrorCategory {
    /// Best-effort classification of a failure message.
    ///
    /// Checked in a fixed order (timeout, server, network) so the same text
    /// always lands in the same bucket.
    pub fn classify(message: &str) -> Self {
        if TIMEOUT_PATTERN.is_match(message) {
            ErrorCategory::Timeout
        } else if SERVER_PATTERN.is_match(message) {
            ErrorCategory::Server
        } else if NETWORK_PATTERN.is_match(message) {
            ErrorCategory::Network
        } else {
            ErrorCategory::Unknown
        }
    }

    /// Short human title for this category
    pub fn title(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "Connection Error",
            ErrorCategory::Server => "Server Error",
            ErrorCategory::Timeout => "Request Timeout",
            ErrorCategory::Unknown => "Unexpected Error",
        }
    }
}

/// A failed attempt, as surfaced to collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub category: ErrorCategory,
    pub occurred_at: DateTime<Utc>,
    /// Automatic retries already consumed when the failing attempt ran.
    pub retry_count: u32,
}

impl ErrorInfo {
    pub fn from_error(error: &Error, retry_count: u32) -> Self {
        Self {
            message: error.to_string(),
            category: error.category(),
            occurred_at: Utc::now(),
            retry_count,
        }
    }
}
