//! Actor and ability templates plus the game data bundle that holds them.
//!
//! Game data is a JSON document with `resources`, `abilities`, `actors`,
//! `tech_trees` and `build_lists` sections. Ability and actor entries may name
//! a parent through `inherits_from`; the child is the parent's fields with the
//! child's own fields laid over them, resolved recursively.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GameError, Result};

/// Key naming the parent template.
pub const INHERITS_FROM: &str = "inherits_from";

/// Behavioural class of an actor, selected by the template's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActorClass {
    /// Units that can move.
    #[default]
    Mobile,
    /// Structures that never move.
    Building,
}

impl ActorClass {
    /// Whether actors of this class can change position.
    #[must_use]
    pub const fn is_mobile(self) -> bool {
        matches!(self, Self::Mobile)
    }
}

/// Immutable actor type definition.
///
/// # Example JSON
///
/// ```json
/// "Tank": {
///     "inherits_from": "Vehicle",
///     "max_hp": 200,
///     "size": [30, 30],
///     "abilities": ["Cannon"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorType {
    /// Type name, filled in from the key the template was loaded under.
    #[serde(default)]
    pub name: String,

    /// Behavioural class.
    #[serde(rename = "type", default)]
    pub class: ActorClass,

    /// Footprint `[width, height]`; the actor's bounding rectangle.
    #[serde(default = "default_size")]
    pub size: [f64; 2],

    /// Maximum hit points.
    #[serde(default = "default_max_hp")]
    pub max_hp: f64,

    /// Distance moved per tick.
    #[serde(default)]
    pub move_speed: f64,

    /// Ability type names attached on placement.
    #[serde(default)]
    pub abilities: Vec<String>,

    /// Whether `build` orders append to this actor's build queue instead of
    /// placing a structure nearby.
    #[serde(default)]
    pub uses_build_queue: bool,

    /// Offset from the actor's position where queued production appears.
    #[serde(default)]
    pub build_offset: [f64; 3],

    /// Completion percentage this actor adds per tick when aiding.
    #[serde(default = "default_build_rate")]
    pub build_rate: f64,

    /// Name of the build list this actor may produce from.
    #[serde(default)]
    pub build_list: Option<String>,

    /// Free-form flags for game rules.
    #[serde(default)]
    pub flags: Vec<String>,
}

const fn default_size() -> [f64; 2] {
    [20.0, 20.0]
}

const fn default_max_hp() -> f64 {
    100.0
}

const fn default_build_rate() -> f64 {
    1.0
}

/// Category of an ability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AbilityKind {
    /// Fires bullets at the actor's attack target.
    #[default]
    Weapon,
    /// Carries no per-tick behaviour.
    Passive,
}

/// Immutable ability type definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilityType {
    /// Type name, filled in from the key the template was loaded under.
    #[serde(default)]
    pub name: String,

    /// Ability category.
    #[serde(rename = "type", default)]
    pub kind: AbilityKind,

    /// Damage dealt by each bullet.
    #[serde(default)]
    pub damage: f64,

    /// Maximum firing distance.
    #[serde(default)]
    pub range: f64,

    /// Ticks between shots.
    #[serde(default = "default_reload")]
    pub reload: u32,

    /// Bullet travel distance per tick.
    #[serde(default = "default_bullet_speed")]
    pub bullet_speed: f64,

    /// Radius around the impact point that takes damage.
    #[serde(default)]
    pub blast_radius: f64,

    /// Ticks the explosion effect stays alive.
    #[serde(default = "default_effect_lifetime")]
    pub effect_lifetime: u32,
}

const fn default_reload() -> u32 {
    20
}

const fn default_bullet_speed() -> f64 {
    10.0
}

const fn default_effect_lifetime() -> u32 {
    8
}

/// All templates and reference tables loaded at scenario start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameData {
    /// Named resource records.
    pub resources: BTreeMap<String, Value>,
    /// Ability templates with inheritance resolved.
    pub ability_types: BTreeMap<String, AbilityType>,
    /// Actor templates with inheritance resolved.
    pub actor_types: BTreeMap<String, ActorType>,
    /// Tech trees, kept verbatim.
    pub tech_trees: BTreeMap<String, Value>,
    /// Build lists: list name to producible type names.
    pub build_lists: BTreeMap<String, Vec<String>>,
}

impl GameData {
    /// Load game data from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&contents).map_err(|e| GameError::DataParse {
            source_name: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_value(&value)
    }

    /// Build game data from an already parsed JSON document.
    pub fn from_value(data: &Value) -> Result<Self> {
        let root = data
            .as_object()
            .ok_or_else(|| GameError::Config("game data must be a JSON object".to_string()))?;

        let mut game = Self::default();

        for record in section(root, "resources")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let name = record
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| GameError::Config("resource record without a name".to_string()))?;
            game.resources.insert(name.to_string(), record.clone());
        }

        let abilities = object_section(root, "abilities")?;
        for name in abilities.keys() {
            let mut ability: AbilityType = decode_template(abilities, name, "abilities")?;
            ability.name = name.clone();
            game.ability_types.insert(name.clone(), ability);
        }

        let actors = object_section(root, "actors")?;
        for name in actors.keys() {
            let mut actor: ActorType = decode_template(actors, name, "actors")?;
            actor.name = name.clone();
            if let Some(missing) = actor
                .abilities
                .iter()
                .find(|a| !game.ability_types.contains_key(*a))
            {
                return Err(GameError::UnknownAbilityType(missing.clone()));
            }
            game.actor_types.insert(name.clone(), actor);
        }

        if let Some(trees) = section(root, "tech_trees").and_then(Value::as_object) {
            for (name, tree) in trees {
                game.tech_trees.insert(name.clone(), tree.clone());
            }
        }

        if let Some(lists) = section(root, "build_lists") {
            game.build_lists = serde_json::from_value(lists.clone()).map_err(|e| {
                GameError::DataParse {
                    source_name: "build_lists".to_string(),
                    message: e.to_string(),
                }
            })?;
        }

        tracing::debug!(
            actor_types = game.actor_types.len(),
            ability_types = game.ability_types.len(),
            "Loaded game data"
        );
        Ok(game)
    }

    /// Look up an actor template.
    pub fn actor_type(&self, name: &str) -> Result<&ActorType> {
        self.actor_types
            .get(name)
            .ok_or_else(|| GameError::UnknownActorType(name.to_string()))
    }

    /// Look up an ability template.
    pub fn ability_type(&self, name: &str) -> Result<&AbilityType> {
        self.ability_types
            .get(name)
            .ok_or_else(|| GameError::UnknownAbilityType(name.to_string()))
    }

    /// Whether an actor of `builder` type may produce `target`.
    #[must_use]
    pub fn can_build(&self, builder: &str, target: &str) -> bool {
        self.actor_types
            .get(builder)
            .and_then(|b| b.build_list.as_ref())
            .and_then(|list| self.build_lists.get(list))
            .is_some_and(|list| list.iter().any(|t| t == target))
    }
}

fn section<'a>(root: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    root.get(key)
}

fn object_section<'a>(root: &'a Map<String, Value>, key: &str) -> Result<&'a Map<String, Value>> {
    static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();
    match root.get(key) {
        None => Ok(EMPTY.get_or_init(Map::new)),
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(GameError::Config(format!("'{key}' must be a JSON object"))),
    }
}

fn decode_template<T: for<'de> Deserialize<'de>>(
    templates: &Map<String, Value>,
    name: &str,
    section_name: &str,
) -> Result<T> {
    let resolved = resolve_inheritance(templates, name)?;
    serde_json::from_value(Value::Object(resolved)).map_err(|e| GameError::DataParse {
        source_name: format!("{section_name}.{name}"),
        message: e.to_string(),
    })
}

/// Resolve a template's `inherits_from` chain into a single flat object.
///
/// Parent fields come first; each child in the chain overlays its own
/// fields. The `inherits_from` key itself is not carried into the result.
pub fn resolve_inheritance(
    templates: &Map<String, Value>,
    name: &str,
) -> Result<Map<String, Value>> {
    let mut chain = Vec::new();
    let mut seen = BTreeSet::new();
    let mut current = name;

    loop {
        if !seen.insert(current.to_string()) {
            return Err(GameError::Config(format!(
                "inheritance cycle through '{current}' while resolving '{name}'"
            )));
        }
        let template = templates
            .get(current)
            .and_then(Value::as_object)
            .ok_or_else(|| {
                GameError::Config(format!(
                    "template '{current}' (needed by '{name}') is missing or not an object"
                ))
            })?;
        chain.push(template);
        match template.get(INHERITS_FROM) {
            Some(Value::String(parent)) => current = parent,
            Some(other) => {
                return Err(GameError::Config(format!(
                    "'{INHERITS_FROM}' of '{current}' must be a string, got {other}"
                )))
            }
            None => break,
        }
    }

    let mut combined = Map::new();
    for template in chain.into_iter().rev() {
        for (key, value) in template {
            if key != INHERITS_FROM {
                combined.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "resources": [{"name": "Credits", "start": 500}],
            "abilities": {
                "Gun": {"type": "weapon", "damage": 5, "range": 100, "reload": 10},
                "BigGun": {"inherits_from": "Gun", "damage": 20}
            },
            "actors": {
                "Base": {"type": "mobile", "max_hp": 50, "move_speed": 2},
                "Tank": {"inherits_from": "Base", "max_hp": 200, "abilities": ["BigGun"]},
                "Factory": {
                    "type": "building",
                    "uses_build_queue": true,
                    "build_list": "factory",
                    "size": [60, 60]
                }
            },
            "tech_trees": {"basic": {}},
            "build_lists": {"factory": ["Tank"]}
        })
    }

    #[test]
    fn test_child_overlays_parent() {
        let data = GameData::from_value(&sample()).unwrap();
        let tank = data.actor_type("Tank").unwrap();
        assert_eq!(tank.name, "Tank");
        assert_eq!(tank.max_hp, 200.0);
        assert_eq!(tank.move_speed, 2.0);
        assert_eq!(tank.class, ActorClass::Mobile);

        let big = data.ability_type("BigGun").unwrap();
        assert_eq!(big.damage, 20.0);
        assert_eq!(big.range, 100.0);
        assert_eq!(big.reload, 10);
    }

    #[test]
    fn test_inheritance_cycle_rejected() {
        let mut value = sample();
        value["actors"]["Base"]["inherits_from"] = json!("Tank");
        assert!(matches!(
            GameData::from_value(&value),
            Err(GameError::Config(_))
        ));
    }

    #[test]
    fn test_missing_ability_rejected() {
        let mut value = sample();
        value["actors"]["Tank"]["abilities"] = json!(["Laser"]);
        assert!(matches!(
            GameData::from_value(&value),
            Err(GameError::UnknownAbilityType(name)) if name == "Laser"
        ));
    }

    #[test]
    fn test_can_build_follows_build_lists() {
        let data = GameData::from_value(&sample()).unwrap();
        assert!(data.can_build("Factory", "Tank"));
        assert!(!data.can_build("Factory", "Factory"));
        assert!(!data.can_build("Tank", "Tank"));
        assert!(data.resources.contains_key("Credits"));
    }
}
