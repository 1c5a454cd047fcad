//! Error types shared across the hooksync domain.
//!
//! Each port has its own error type so infrastructure crates can report
//! failures precisely:
//!
//! - [`HookApiError`]: remote hook API failures. Recorded as problem records
//!   against the repository being reconciled; never retried automatically.
//! - [`PersistenceError`]: the ignore list could not be loaded or saved.
//! - [`SubscriberError`]: a subscriber failed to handle a delivery. Isolated
//!   per subscriber; logged and never recorded as a problem.

use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Remote hook API
// ---------------------------------------------------------------------------

/// Failures talking to the remote hook API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookApiError {
    /// The request never produced an HTTP response (DNS, TLS, timeout, ...).
    #[error("Transport error: {message}")]
    Transport {
        /// Underlying client error.
        message: String,
    },

    /// The credential was rejected or lacks the required permission.
    #[error("Unauthorized ({status}): {message}")]
    Unauthorized {
        /// HTTP status (401 or 403).
        status: u16,
        /// Message returned by the API.
        message: String,
    },

    /// The repository or hook does not exist (or is invisible to the credential).
    #[error("Not found: {resource}")]
    NotFound {
        /// API path that returned 404.
        resource: String,
    },

    /// The API rate limit is exhausted.
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Delay suggested by `Retry-After` or `x-ratelimit-reset`, if any.
        retry_after: Option<Duration>,
    },

    /// Any other non-success status.
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("Could not decode response: {message}")]
    Decode {
        /// Decoder error.
        message: String,
    },

    /// The server configuration is unusable (missing credential, bad URL).
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Failures loading or saving persisted state.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Reading or writing the backing file failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file exists but does not contain a valid record.
    #[error("Corrupt state in '{path}': {message}")]
    Corrupt {
        /// File involved.
        path: String,
        /// Decoder error.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

/// A subscriber failed to handle a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SubscriberError {
    message: String,
}

impl SubscriberError {
    /// Creates an error with a human-readable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for SubscriberError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("malformed payload: {err}"))
    }
}
