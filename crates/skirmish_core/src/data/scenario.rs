//! Scenario definitions: battlefield, teams, AI assignments, initial actors.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::actors::TeamId;
use crate::error::{GameError, Result};
use crate::orders::OrderTarget;

/// A complete scenario.
///
/// # Example JSON
///
/// ```json
/// {
///     "battlefield": {"size": [1000, 1000]},
///     "teams": {"1": {"name": "Blue"}, "2": {"name": "Red"}},
///     "ais": {"2": {"type": "basic"}},
///     "actors": [
///         {"type": "Factory", "team": 1, "pos": [100, 100],
///          "rally_orders": [{"cmd": "move", "pos": [300, 300]}]},
///         {"type": "Tank", "team": 2, "pos": [800, 800], "hp": 50}
///     ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Battlefield bounds and metadata.
    pub battlefield: Battlefield,
    /// Per-team data keyed by team id.
    #[serde(default)]
    pub teams: BTreeMap<TeamId, Map<String, Value>>,
    /// Optional AI assignments keyed by team id.
    #[serde(default)]
    pub ais: BTreeMap<TeamId, AiAssignment>,
    /// Actors present when the battle starts.
    #[serde(default)]
    pub actors: Vec<ActorPlacement>,
}

impl Scenario {
    /// Load a scenario from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| GameError::DataParse {
            source_name: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Build a scenario from an already parsed JSON document.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| GameError::DataParse {
            source_name: "scenario".to_string(),
            message: e.to_string(),
        })
    }
}

/// Battlefield bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battlefield {
    /// Width and height in world units.
    pub size: [f64; 2],
    /// Anything else the scenario carries (background, terrain...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An AI assigned to a team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAssignment {
    /// Registered AI class name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Remaining fields, forwarded to the AI in its `init` message.
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

/// Data needed to place one actor.
///
/// Fields not listed here are template overrides: they replace the matching
/// field of the actor's type for this actor only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorPlacement {
    /// Actor type name.
    #[serde(rename = "type")]
    pub actor_type: String,
    /// Owning team.
    pub team: TeamId,
    /// Position as `[x, y]` or `[x, y, z]`.
    #[serde(default)]
    pub pos: Option<Vec<f64>>,
    /// Completion percentage.
    #[serde(default)]
    pub completion: Option<f64>,
    /// Starting hit points.
    #[serde(default)]
    pub hp: Option<f64>,
    /// Production already queued.
    #[serde(default)]
    pub build_queue: Vec<String>,
    /// Orders handed to every actor this one produces.
    #[serde(default)]
    pub rally_orders: Vec<RallyOrder>,
    /// Per-actor template overrides.
    #[serde(flatten)]
    pub overrides: Map<String, Value>,
}

impl ActorPlacement {
    /// Placement of `actor_type` for `team` at `pos`.
    #[must_use]
    pub fn new(actor_type: impl Into<String>, team: TeamId, pos: [f64; 2]) -> Self {
        Self {
            actor_type: actor_type.into(),
            team,
            pos: Some(pos.to_vec()),
            completion: None,
            hp: None,
            build_queue: Vec::new(),
            rally_orders: Vec::new(),
            overrides: Map::new(),
        }
    }

    /// Give produced actors these starting orders.
    #[must_use]
    pub fn with_rally_orders(mut self, orders: Vec<RallyOrder>) -> Self {
        self.rally_orders = orders;
        self
    }

    /// Set the completion percentage.
    #[must_use]
    pub fn with_completion(mut self, completion: f64) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Set the starting hit points.
    #[must_use]
    pub fn with_hp(mut self, hp: f64) -> Self {
        self.hp = Some(hp);
        self
    }

    /// Override one template field for this actor.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }
}

/// An order without an actor, in wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RallyOrder {
    /// Command name.
    pub cmd: String,
    /// Destination.
    #[serde(default)]
    pub pos: Option<Vec<f64>>,
    /// Target actor id, or type name for `build`.
    #[serde(default)]
    pub target: Option<OrderTarget>,
}

impl RallyOrder {
    /// Move to `pos`.
    #[must_use]
    pub fn move_to(pos: [f64; 2]) -> Self {
        Self {
            cmd: "move".to_string(),
            pos: Some(pos.to_vec()),
            target: None,
        }
    }
}
