//! Error types for the battle simulation.

use thiserror::Error;

use crate::actors::{ActorId, TeamId};

/// Result type alias using [`GameError`].
pub type Result<T> = std::result::Result<T, GameError>;

/// Top-level error type for all battle simulation errors.
#[derive(Debug, Error)]
pub enum GameError {
    /// A configuration attribute did not have its declared type.
    #[error("Config attribute '{attribute}' must be a {expected}, got {found}")]
    ConfigType {
        /// Attribute name.
        attribute: String,
        /// Declared type.
        expected: &'static str,
        /// Offending JSON value.
        found: String,
    },

    /// Configuration or game data is structurally invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Data file parsing error.
    #[error("Failed to parse {source_name}: {message}")]
    DataParse {
        /// What was being parsed (file path or data section).
        source_name: String,
        /// Error message.
        message: String,
    },

    /// No actor template with this name.
    #[error("Unknown actor type: {0}")]
    UnknownActorType(String),

    /// No ability template with this name.
    #[error("Unknown ability type: {0}")]
    UnknownAbilityType(String),

    /// An order or target references an id that is not in the actor table.
    #[error("Actor not found: {0}")]
    ActorNotFound(ActorId),

    /// An order points outside the battlefield.
    #[error("Order for actor {actor} targets ({x}, {y}), outside the battlefield")]
    OutOfBounds {
        /// Actor the order was for.
        actor: ActorId,
        /// Requested x.
        x: f64,
        /// Requested y.
        y: f64,
    },

    /// A command string no handler understands.
    #[error("Unrecognized command: {0}")]
    UnknownCommand(String),

    /// An AI or relay peer sent a message of an unrecognized kind.
    #[error("Protocol violation from {source_name}: {message}")]
    Protocol {
        /// Who sent the message (AI team, relay).
        source_name: String,
        /// What was wrong with it.
        message: String,
    },

    /// No AI class registered under this name.
    #[error("No AI class registered as '{0}'")]
    UnknownAi(String),

    /// An AI class was registered twice.
    #[error("AI class '{0}' is already registered")]
    DuplicateAi(String),

    /// An AI agent could not be started.
    #[error("Failed to spawn AI for team {team}: {message}")]
    AiSpawn {
        /// Team the agent was meant to control.
        team: TeamId,
        /// Underlying failure.
        message: String,
    },

    /// An AI agent outlived its time-to-live without observing a quit signal.
    #[error("AI for team {team} exceeded its time-to-live of {ttl_secs}s")]
    AiTimeToLive {
        /// Team the agent controlled.
        team: TeamId,
        /// Configured time-to-live in seconds.
        ttl_secs: u64,
    },

    /// The network relay failed or disconnected.
    #[error("Network relay error: {0}")]
    Relay(String),

    /// An order arrived for a tick that has already been simulated.
    #[error("Order for tick {order_tick} arrived at tick {current_tick}")]
    LateOrder {
        /// Tick the order was scheduled for.
        order_tick: u64,
        /// Tick the simulation had already reached.
        current_tick: u64,
    },

    /// Operation not allowed in the current state.
    #[error("Invalid game state: {0}")]
    InvalidState(String),

    /// Desync detected between two runs of the same input.
    #[error("Desync detected at tick {tick}: local hash {local_hash}, remote hash {remote_hash}")]
    DesyncDetected {
        /// Tick where desync occurred.
        tick: u64,
        /// Local simulation hash.
        local_hash: u64,
        /// Remote simulation hash.
        remote_hash: u64,
    },

    /// Filesystem or pipe failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GameError {
    /// Shorthand for a [`GameError::Protocol`] error.
    pub fn protocol(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Whether this error only affects a single order or message.
    ///
    /// Recoverable errors are logged and skipped inside a tick; everything
    /// else aborts the operation that produced it.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ActorNotFound(_)
                | Self::OutOfBounds { .. }
                | Self::UnknownCommand(_)
                | Self::Protocol { .. }
                | Self::LateOrder { .. }
        )
    }
}
