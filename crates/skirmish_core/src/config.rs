//! Simulation configuration.
//!
//! Configuration is a flat map of named attributes. Each known attribute has
//! a declared type (`number` or `boolean`) and a value of any other JSON type
//! is rejected. Unknown keys are ignored so that a single config file can be
//! shared with the UI layer.
//!
//! # Example
//!
//! ```json
//! {
//!     "tick_jump": 3,
//!     "collision_interval": 5,
//!     "ai_full_visibility": false,
//!     "ai_vision_range": 250
//! }
//! ```

use std::path::Path;

use serde_json::{Map, Value};

use crate::collision::DEFAULT_COLLISION_INTERVAL;
use crate::error::{GameError, Result};
use crate::math::Fixed;
use crate::orders::DEFAULT_TICK_JUMP;

/// Default ticks between AI snapshots.
pub const DEFAULT_AI_UPDATE_INTERVAL: u64 = 30;

/// Default hard lifetime of an AI agent, in seconds.
pub const DEFAULT_AI_TIME_TO_LIVE_SECS: u64 = 600;

/// Default AI vision range when visibility filtering is on.
pub const DEFAULT_AI_VISION_RANGE: i32 = 300;

/// Declared type of a configuration attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Any JSON number.
    Number,
    /// `true` or `false`.
    Boolean,
}

impl AttributeKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// Every attribute the simulation reads, with its declared type.
pub const ATTRIBUTES: &[(&str, AttributeKind)] = &[
    ("collision_interval", AttributeKind::Number),
    ("tick_jump", AttributeKind::Number),
    ("ai_update_interval", AttributeKind::Number),
    ("ai_time_to_live_secs", AttributeKind::Number),
    ("ai_full_visibility", AttributeKind::Boolean),
    ("ai_vision_range", AttributeKind::Number),
];

/// Typed simulation configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Ticks between collision passes.
    pub collision_interval: u64,
    /// Order delay in ticks. Zero is treated as one.
    pub tick_jump: u64,
    /// Ticks between AI snapshots. Zero is treated as one.
    pub ai_update_interval: u64,
    /// Hard lifetime of each AI agent, in seconds.
    pub ai_time_to_live_secs: u64,
    /// Whether AIs see every actor on the battlefield.
    pub ai_full_visibility: bool,
    /// How far AIs see enemies when visibility is filtered.
    pub ai_vision_range: Fixed,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            collision_interval: DEFAULT_COLLISION_INTERVAL,
            tick_jump: DEFAULT_TICK_JUMP,
            ai_update_interval: DEFAULT_AI_UPDATE_INTERVAL,
            ai_time_to_live_secs: DEFAULT_AI_TIME_TO_LIVE_SECS,
            ai_full_visibility: true,
            ai_vision_range: Fixed::from_num(DEFAULT_AI_VISION_RANGE),
        }
    }
}

impl SimConfig {
    /// Load from a `.json` or `.ron` file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let is_ron = path.extension().is_some_and(|ext| ext == "ron");
        if is_ron {
            Self::from_ron_str(&contents)
        } else {
            Self::from_json_str(&contents)
        }
    }

    /// Parse a JSON map.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(|e| GameError::DataParse {
            source_name: "config".to_string(),
            message: e.to_string(),
        })?;
        Self::from_value(&value)
    }

    /// Parse a RON map, e.g. `{"tick_jump": 3}`.
    pub fn from_ron_str(text: &str) -> Result<Self> {
        let value: Value = ron::from_str(text).map_err(|e| GameError::DataParse {
            source_name: "config".to_string(),
            message: e.to_string(),
        })?;
        Self::from_value(&value)
    }

    /// Apply a parsed attribute map over the defaults.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| GameError::Config("config must be a map".to_string()))?;
        let mut config = Self::default();
        config.apply(map)?;
        Ok(config)
    }

    /// Overlay the attributes present in `map`, checking declared types.
    pub fn apply(&mut self, map: &Map<String, Value>) -> Result<()> {
        for &(name, kind) in ATTRIBUTES {
            let Some(value) = map.get(name) else {
                continue;
            };
            if !kind.accepts(value) {
                return Err(GameError::ConfigType {
                    attribute: name.to_string(),
                    expected: kind.name(),
                    found: value.to_string(),
                });
            }
            match name {
                "collision_interval" => self.collision_interval = tick_count(name, value)?,
                "tick_jump" => self.tick_jump = tick_count(name, value)?,
                "ai_update_interval" => self.ai_update_interval = tick_count(name, value)?,
                "ai_time_to_live_secs" => self.ai_time_to_live_secs = tick_count(name, value)?,
                "ai_full_visibility" => self.ai_full_visibility = value.as_bool().unwrap_or(true),
                "ai_vision_range" => {
                    let range = value.as_f64().unwrap_or_default();
                    self.ai_vision_range = Fixed::checked_from_num(range).ok_or_else(|| {
                        GameError::Config(format!("'{name}' value {range} is out of range"))
                    })?;
                }
                _ => {}
            }
        }

        for key in map.keys() {
            if !ATTRIBUTES.iter().any(|(name, _)| name == key) {
                tracing::debug!(attribute = %key, "Ignoring unknown config attribute");
            }
        }
        Ok(())
    }

    /// The configuration as an attribute map.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "collision_interval": self.collision_interval,
            "tick_jump": self.tick_jump,
            "ai_update_interval": self.ai_update_interval,
            "ai_time_to_live_secs": self.ai_time_to_live_secs,
            "ai_full_visibility": self.ai_full_visibility,
            "ai_vision_range": self.ai_vision_range.to_num::<f64>(),
        })
    }
}

fn tick_count(name: &str, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .filter(|&n| n > 0)
        .ok_or_else(|| GameError::Config(format!("'{name}' must be a positive integer, got {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = SimConfig::default();
        assert_eq!(config.tick_jump, 3);
        assert_eq!(config.collision_interval, 5);
        assert_eq!(config.ai_update_interval, 30);
        assert_eq!(config.ai_time_to_live_secs, 600);
        assert!(config.ai_full_visibility);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let result = SimConfig::from_value(&json!({"tick_jump": "3"}));
        assert!(matches!(
            result,
            Err(GameError::ConfigType { ref attribute, expected: "number", .. }) if attribute == "tick_jump"
        ));

        let result = SimConfig::from_value(&json!({"ai_full_visibility": 1}));
        assert!(matches!(result, Err(GameError::ConfigType { expected: "boolean", .. })));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config =
            SimConfig::from_value(&json!({"scroll_speed": 10, "collision_interval": 7})).unwrap();
        assert_eq!(config.collision_interval, 7);
    }

    #[test]
    fn test_tick_counts_must_be_positive_integers() {
        assert!(matches!(
            SimConfig::from_value(&json!({"tick_jump": 0})),
            Err(GameError::Config(_))
        ));
        assert!(matches!(
            SimConfig::from_value(&json!({"tick_jump": 2.5})),
            Err(GameError::Config(_))
        ));
    }

    #[test]
    fn test_ron_map() {
        let config = SimConfig::from_ron_str(r#"{"tick_jump": 4, "ai_full_visibility": false}"#)
            .unwrap();
        assert_eq!(config.tick_jump, 4);
        assert!(!config.ai_full_visibility);
    }

    #[test]
    fn test_value_round_trip() {
        let config = SimConfig {
            tick_jump: 6,
            ai_full_visibility: false,
            ..SimConfig::default()
        };
        assert_eq!(SimConfig::from_value(&config.to_value()).unwrap(), config);
    }
}
