//! Error types for relay-dl
//!
//! One crate-wide [`Error`] covers the four failure families the agent deals with:
//! - backend connectivity (JSON-RPC transport, timeouts, aria2 error objects)
//! - front-end delivery (chat API rejected or unreachable)
//! - configuration (missing credentials, malformed endpoint URLs)
//! - bus plumbing (duplicate service names, closed queues)

use std::time::Duration;
use thiserror::Error;

/// Result type alias for relay-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for relay-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "telegram.token")
        key: Option<String>,
    },

    /// The download backend answered with a JSON-RPC error object
    #[error("backend error: {0}")]
    Rpc(#[from] RpcError),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// An operation did not finish within its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What was being attempted (e.g., "aria2.tellStatus")
        operation: String,
        /// The deadline that elapsed
        after: Duration,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A chat API refused or failed to deliver a message
    #[error("delivery failed ({status}): {message}")]
    Delivery {
        /// HTTP status returned by the chat API
        status: u16,
        /// Description returned by the chat API
        message: String,
    },

    /// A subscribed feed could not be fetched or parsed
    #[error("feed error: {0}")]
    Feed(String),

    /// A service with the same name is already registered
    #[error("service {0:?} is already registered")]
    DuplicateService(String),

    /// The bus inbound queue is gone (bus shut down)
    #[error("message bus is closed")]
    BusClosed,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Error object returned by an aria2 JSON-RPC endpoint
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Deserialize)]
#[error("code {code}: {message}")]
pub struct RpcError {
    /// aria2 error code (1 = generic failure, -32600.. = JSON-RPC protocol errors)
    pub code: i64,
    /// Error message from the backend
    pub message: String,
}

impl RpcError {
    /// Whether the backend no longer knows the GID the call referred to
    ///
    /// aria2 answers `tellStatus` this way once a result was purged or evicted, or
    /// after a restart without a session file.
    pub fn is_unknown_gid(&self) -> bool {
        self.code == 1 && self.message.starts_with("GID ") && self.message.ends_with("is not found")
    }
}
