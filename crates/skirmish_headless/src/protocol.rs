//! JSON protocol for interactive headless sessions.
//!
//! A session drives one battle from a controller, one JSON object per line:
//!
//! **Input (stdin):** Commands from the controller
//! **Output (stdout):** Responses and battle state
//!
//! Orders go through the normal local input path, so they apply
//! `tick_jump` ticks after they are sent and the acknowledgement says when.
//!
//! # Example Session
//!
//! ```text
//! <- {"type":"ready","version":"1.0","tick":0}
//! -> {"cmd":"place","actor_type":"Tank","team":1,"x":100,"y":100}
//! <- {"type":"placed","actor":2}
//! -> {"cmd":"move","actor":2,"x":300,"y":100}
//! <- {"type":"ack","cmd":"move","applies_at":3}
//! -> {"cmd":"tick","count":60}
//! <- {"type":"ticked","tick":60,"spawned":[],"deaths":[],"hits":[]}
//! -> {"cmd":"hash"}
//! <- {"type":"state_hash","tick":60,"hash":1234}
//! ```

use serde::{Deserialize, Serialize};
use skirmish_core::actors::{Actor, ActorId, TeamId};

/// Protocol version announced in `ready`.
pub const PROTOCOL_VERSION: &str = "1.0";

// ============================================================================
// Input Commands (controller -> session)
// ============================================================================

/// Commands a controller can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Advance the battle by N ticks (default: 1).
    Tick {
        #[serde(default = "default_tick_count")]
        count: u32,
    },

    /// Report the battle state without advancing time.
    Query,

    /// Place an actor now.
    Place {
        actor_type: String,
        team: TeamId,
        x: f64,
        y: f64,
        /// Completion percentage; unset places a finished actor.
        #[serde(default)]
        completion: Option<f64>,
        /// Actors that receive an `aid` order for the new actor.
        #[serde(default)]
        builders: Vec<ActorId>,
    },

    /// Move an actor.
    Move {
        actor: ActorId,
        x: f64,
        y: f64,
        #[serde(default)]
        queue: bool,
    },

    /// Attack another actor.
    Attack {
        actor: ActorId,
        target: ActorId,
        #[serde(default)]
        queue: bool,
    },

    /// Build `type_name` at a position, or through the build queue.
    Build {
        actor: ActorId,
        type_name: String,
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
        #[serde(default)]
        queue: bool,
    },

    /// Clear an actor's orders.
    Stop { actor: ActorId },

    /// Report the state hash.
    Hash,

    /// End the session.
    Quit,
}

fn default_tick_count() -> u32 {
    1
}

// ============================================================================
// Output Responses (session -> controller)
// ============================================================================

/// Responses a session sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// The session is ready for commands.
    Ready { version: String, tick: u64 },

    /// An order was scheduled.
    Ack { cmd: String, applies_at: u64 },

    /// A command failed; the session continues.
    Error {
        message: String,
        cmd: Option<String>,
    },

    /// An actor was placed.
    Placed { actor: ActorId },

    /// Ticks were run. Event lists cover every tick run.
    Ticked {
        tick: u64,
        spawned: Vec<ActorId>,
        deaths: Vec<ActorId>,
        hits: Vec<ActorId>,
    },

    /// Full battle state.
    State {
        tick: u64,
        actors: Vec<ActorState>,
        bullets: usize,
        hash: u64,
    },

    /// State hash for determinism checks.
    StateHash { tick: u64, hash: u64 },

    /// The battle stopped (quit command, or a peer quit).
    Bye { tick: u64 },
}

/// One actor as reported to a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    pub id: ActorId,
    pub actor_type: String,
    pub team: TeamId,
    pub x: f64,
    pub y: f64,
    pub hp: f64,
    pub max_hp: f64,
    pub completion: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<String>,
}

impl ActorState {
    /// Report form of an actor.
    #[must_use]
    pub fn of(actor: &Actor) -> Self {
        Self {
            id: actor.oid,
            actor_type: actor.actor_type.clone(),
            team: actor.team,
            x: actor.pos.x.to_num(),
            y: actor.pos.y.to_num(),
            hp: actor.hp.to_num(),
            max_hp: actor.max_hp.to_num(),
            completion: actor.completion.to_num(),
            order: actor
                .current_order
                .as_ref()
                .map(|o| o.command.name().to_string()),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

impl Response {
    /// Create a ready response.
    #[must_use]
    pub fn ready(tick: u64) -> Self {
        Self::Ready {
            version: PROTOCOL_VERSION.to_string(),
            tick,
        }
    }

    /// Create an error response.
    pub fn error(message: impl Into<String>, cmd: Option<&str>) -> Self {
        Self::Error {
            message: message.into(),
            cmd: cmd.map(String::from),
        }
    }

    /// Serialize to a JSON line (with newline).
    #[must_use]
    pub fn to_json_line(&self) -> String {
        let mut json = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"Serialization failed: {e}"}}"#)
        });
        json.push('\n');
        json
    }
}

impl Command {
    /// Parse from a JSON line.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Command name for acknowledgements.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Tick { .. } => "tick",
            Self::Query => "query",
            Self::Place { .. } => "place",
            Self::Move { .. } => "move",
            Self::Attack { .. } => "attack",
            Self::Build { .. } => "build",
            Self::Stop { .. } => "stop",
            Self::Hash => "hash",
            Self::Quit => "quit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tick_command() {
        let cmd = Command::from_json(r#"{"cmd":"tick","count":60}"#).unwrap();
        assert_eq!(cmd, Command::Tick { count: 60 });
    }

    #[test]
    fn test_default_tick_count() {
        let cmd = Command::from_json(r#"{"cmd":"tick"}"#).unwrap();
        assert_eq!(cmd, Command::Tick { count: 1 });
    }

    #[test]
    fn test_parse_place_command() {
        let cmd = Command::from_json(
            r#"{"cmd":"place","actor_type":"Wall","team":1,"x":100,"y":200,"completion":0,"builders":[3]}"#,
        )
        .unwrap();
        assert!(matches!(
            cmd,
            Command::Place { actor_type, team: 1, completion: Some(c), builders, .. }
                if actor_type == "Wall" && c == 0.0 && builders == vec![3]
        ));
    }

    #[test]
    fn test_serialize_ack() {
        let json = Response::Ack {
            cmd: "move".to_string(),
            applies_at: 8,
        }
        .to_json_line();
        assert_eq!(json, "{\"type\":\"ack\",\"cmd\":\"move\",\"applies_at\":8}\n");
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Command::from_json(r#"{"cmd":"teleport"}"#).is_err());
    }
}
