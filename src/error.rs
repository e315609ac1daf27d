//! Error types for the playback coordinator

use thiserror::Error;

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the playback coordinator
#[derive(Error, Debug)]
pub enum Error {
    /// A handle id was rejected at registration time
    #[error("Invalid handle id: {0}")]
    InvalidHandle(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// A scroll script failed to load or validate
    #[error("Script error: {0}")]
    ScriptError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
