//! Messages exchanged between the simulation and AI agents.
//!
//! Every message is a JSON object. Messages to an agent are tagged by `cmd`,
//! messages from an agent by `data_type`. Both directions carry the same JSON
//! whether the agent runs on a thread or in a subprocess.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::actors::{Actor, ActorId, TeamId};
use crate::data::ActorType;
use crate::error::{GameError, Result};
use crate::orders::{Command, OrderTarget};

/// Message from the simulation to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ToAi {
    /// Sent once at load.
    Init {
        /// Team the agent controls.
        team: TeamId,
        /// Scenario settings for this AI.
        #[serde(default)]
        settings: Map<String, Value>,
    },
    /// Periodic snapshot of the battlefield.
    Actors {
        /// Actors in the agent's declared format.
        actor_list: ActorList,
    },
    /// Actor templates, sent once at load.
    ActorTypes {
        /// Templates keyed by type name.
        actor_types: BTreeMap<String, ActorType>,
    },
    /// Build lists, sent once at load.
    BuildLists {
        /// Producible type names keyed by list name.
        build_lists: BTreeMap<String, Vec<String>>,
    },
    /// Stop the agent.
    Quit,
}

impl ToAi {
    /// Encode as a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode from a JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| GameError::protocol("simulation", e.to_string()))
    }
}

/// Message from an agent to the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "data_type", rename_all = "snake_case")]
pub enum FromAi {
    /// An order for one of the agent's actors.
    Orders(AiOrder),
    /// Snapshot preferences, sent right after the agent starts.
    Prefs {
        /// Declared preferences.
        prefs: AiPrefs,
    },
}

impl FromAi {
    /// Encode as a JSON value.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode from a JSON value, naming `source` in the error.
    pub fn from_value(value: Value, source: &str) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| GameError::protocol(source, e.to_string()))
    }
}

/// Order fields as an agent sends them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiOrder {
    /// Command name.
    pub cmd: String,
    /// Actor the order is for.
    pub actor: ActorId,
    /// Target actor id, or type name for `build`.
    #[serde(default)]
    pub target: Option<OrderTarget>,
    /// Destination.
    #[serde(default)]
    pub pos: Option<Vec<f64>>,
}

impl AiOrder {
    /// Attack order for `actor` against `target`.
    #[must_use]
    pub fn attack(actor: ActorId, target: ActorId) -> Self {
        Self {
            cmd: Command::Attack.name().to_string(),
            actor,
            target: Some(OrderTarget::Actor(target)),
            pos: None,
        }
    }
}

/// How an agent wants its snapshots shaped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorFormat {
    /// A JSON array of actors.
    #[default]
    List,
    /// A JSON object keyed by actor id.
    Dict,
}

/// Preferences an agent declares when it starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiPrefs {
    /// Snapshot format.
    #[serde(default)]
    pub actor_format: ActorFormat,
}

/// An actor's current order as agents see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotOrder {
    /// Command name.
    pub cmd: String,
    /// Destination.
    #[serde(default)]
    pub pos: Option<Vec<f64>>,
    /// Target actor id or build type name.
    #[serde(default)]
    pub target: Option<OrderTarget>,
}

/// The parts of an actor an agent can see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    /// Actor id.
    pub oid: ActorId,
    /// Template name.
    #[serde(rename = "type")]
    pub actor_type: String,
    /// Owning team.
    pub team: TeamId,
    /// Position `[x, y, z]`.
    pub pos: Vec<f64>,
    /// Velocity `[x, y, z]`.
    pub velocity: Vec<f64>,
    /// Heading `[xy, z]` degrees.
    pub facing: [f64; 2],
    /// Hit points.
    pub hp: f64,
    /// Maximum hit points.
    pub max_hp: f64,
    /// Construction progress.
    pub completion: f64,
    /// Ability names.
    #[serde(default)]
    pub abilities: Vec<String>,
    /// Pending production.
    #[serde(default)]
    pub build_queue: Vec<String>,
    /// Order being executed.
    #[serde(default)]
    pub current_order: Option<SnapshotOrder>,
}

impl From<&Actor> for ActorSnapshot {
    fn from(actor: &Actor) -> Self {
        Self {
            oid: actor.oid,
            actor_type: actor.actor_type.clone(),
            team: actor.team,
            pos: actor.pos.to_wire(),
            velocity: actor.velocity.to_wire(),
            facing: [actor.facing[0].to_num(), actor.facing[1].to_num()],
            hp: actor.hp.to_num(),
            max_hp: actor.max_hp.to_num(),
            completion: actor.completion.to_num(),
            abilities: actor.abilities.iter().map(|a| a.name.clone()).collect(),
            build_queue: actor.build_queue.iter().cloned().collect(),
            current_order: actor.current_order.as_ref().map(|order| SnapshotOrder {
                cmd: order.command.name().to_string(),
                pos: order.pos.map(|p| p.to_wire()),
                target: order.wire_target(),
            }),
        }
    }
}

/// A battlefield snapshot in one of the two declared formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActorList {
    /// Actors in ascending id order.
    List(Vec<ActorSnapshot>),
    /// Actors keyed by decimal id.
    Dict(BTreeMap<String, ActorSnapshot>),
}

impl ActorList {
    /// Shape `snapshots` as `format` asks.
    #[must_use]
    pub fn build(format: ActorFormat, snapshots: Vec<ActorSnapshot>) -> Self {
        match format {
            ActorFormat::List => Self::List(snapshots),
            ActorFormat::Dict => Self::Dict(
                snapshots
                    .into_iter()
                    .map(|s| (s.oid.to_string(), s))
                    .collect(),
            ),
        }
    }

    /// The snapshots regardless of format.
    #[must_use]
    pub fn into_snapshots(self) -> Vec<ActorSnapshot> {
        match self {
            Self::List(list) => list,
            Self::Dict(map) => map.into_values().collect(),
        }
    }

    /// Number of actors.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::List(list) => list.len(),
            Self::Dict(map) => map.len(),
        }
    }

    /// Whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_ai_wire_shape() {
        let value = ToAi::Init {
            team: 2,
            settings: Map::new(),
        }
        .to_value()
        .unwrap();
        assert_eq!(value, json!({"cmd": "init", "team": 2, "settings": {}}));
        assert_eq!(ToAi::Quit.to_value().unwrap(), json!({"cmd": "quit"}));
    }

    #[test]
    fn test_from_ai_orders_parse() {
        let message = FromAi::from_value(
            json!({"data_type": "orders", "cmd": "move", "actor": 4, "target": null, "pos": [1, 2]}),
            "team 1",
        )
        .unwrap();
        assert_eq!(
            message,
            FromAi::Orders(AiOrder {
                cmd: "move".to_string(),
                actor: 4,
                target: None,
                pos: Some(vec![1.0, 2.0]),
            })
        );
    }

    #[test]
    fn test_prefs_default_to_list() {
        let message = FromAi::from_value(json!({"data_type": "prefs", "prefs": {}}), "t").unwrap();
        assert_eq!(
            message,
            FromAi::Prefs {
                prefs: AiPrefs {
                    actor_format: ActorFormat::List
                }
            }
        );
    }

    #[test]
    fn test_unknown_data_type_is_protocol_error() {
        let result = FromAi::from_value(json!({"data_type": "chat", "text": "gg"}), "team 3");
        assert!(matches!(
            result,
            Err(GameError::Protocol { ref source_name, .. }) if source_name == "team 3"
        ));
    }

    #[test]
    fn test_dict_snapshot_keys_by_id() {
        let snapshot = ActorSnapshot {
            oid: 7,
            actor_type: "Tank".to_string(),
            team: 1,
            pos: vec![0.0, 0.0, 0.0],
            velocity: vec![0.0, 0.0, 0.0],
            facing: [0.0, 0.0],
            hp: 10.0,
            max_hp: 10.0,
            completion: 100.0,
            abilities: Vec::new(),
            build_queue: Vec::new(),
            current_order: None,
        };
        let list = ActorList::build(ActorFormat::Dict, vec![snapshot.clone()]);
        let value = serde_json::to_value(&list).unwrap();
        assert_eq!(value["7"]["type"], json!("Tank"));

        let parsed: ActorList = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.into_snapshots(), vec![snapshot]);
    }
}
