//! Error types for the bridge client

use std::time::Duration;

/// Result type alias
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge client errors
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out after {timeout:?} waiting for {target}")]
    Timeout { target: String, timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Upload failed ({status}): {body}")]
    Upload { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Plot tool error: {0}")]
    Plot(String),
}

impl BridgeError {
    /// True for failures where trying again later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::Connection(_) | BridgeError::Timeout { .. } | BridgeError::Io(_)
        )
    }
}
