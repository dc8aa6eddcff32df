//! Common error types for PT DAF

use thiserror::Error;

/// Common result type for PT DAF operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types shared by the dispatcher and the workers
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid startup parameter; fatal before the pipeline starts
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML configuration could not be parsed
    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Reply for an inactive phase or malformed payload; logged and discarded
    #[error("Message protocol error: {0}")]
    Protocol(String),

    /// A collaborator computation failed inside a worker
    #[error("Computation error: {0}")]
    Computation(String),

    /// Named queue missing, duplicated or closed
    #[error("Channel error: {0}")]
    Channel(String),

    /// Message could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Protocol and codec errors are recoverable by discarding the message.
    pub fn is_discardable(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Codec(_))
    }
}
