use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for relay-core operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors raised while configuring or connecting the relay.
///
/// Per-event failures (parse, fetch, delivery) never surface here; they are
/// logged and counted where they happen.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A config value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML for [`crate::RelayConfig`].
    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// The HTTP client for the media source could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// The broker connection failed or was lost.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// A subscription request could not be queued.
    #[error("failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },
}
