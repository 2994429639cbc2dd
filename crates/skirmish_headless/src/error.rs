//! Error types for the headless runner.

use skirmish_core::error::GameError;
use skirmish_server::ServerError;
use thiserror::Error;

/// Headless runner error type.
#[derive(Debug, Error)]
pub enum HeadlessError {
    /// The battle failed to load or step.
    #[error(transparent)]
    Game(#[from] GameError),

    /// The relay hub connection failed.
    #[error(transparent)]
    Relay(#[from] ServerError),

    /// Reading input or writing output failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A report could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Repeated runs of the same battle disagreed.
    #[error("Battle is non-deterministic: hashes {hashes:?}")]
    NonDeterministic {
        /// Final hash of each run.
        hashes: Vec<u64>,
    },
}

/// Result type alias for headless operations.
pub type Result<T> = std::result::Result<T, HeadlessError>;
