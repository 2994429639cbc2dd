//! Error types for the relay hub and its client.

use skirmish_core::error::GameError;
use thiserror::Error;

/// Relay server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket or file failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad server configuration.
    #[error("Invalid server configuration: {0}")]
    Config(String),

    /// The hub refused the connection.
    #[error("Relay hub rejected the connection: {0}")]
    Rejected(String),

    /// The hub's first message was not a player number.
    #[error("Expected a player number from the relay hub, got: {0}")]
    Handshake(String),

    /// The hub did not answer in time.
    #[error("Timed out waiting for the relay hub")]
    Timeout,

    /// Message encoding or decoding failed.
    #[error(transparent)]
    Game(#[from] GameError),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
