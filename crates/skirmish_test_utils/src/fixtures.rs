//! Test fixtures and helpers.
//!
//! Sample game data and scenarios shared by the core, server and headless
//! test suites, so every crate fights the same battles.

use serde_json::{json, Value};
use skirmish_core::ai::AiRegistry;
use skirmish_core::config::SimConfig;
use skirmish_core::data::{GameData, Scenario};
use skirmish_core::error::Result;
use skirmish_core::math::{Fixed, Vec3Fixed};
use skirmish_core::simulation::{BattleSim, LoadOptions};

/// Create a fixed-point number from an integer.
#[must_use]
pub fn fixed(n: i32) -> Fixed {
    Fixed::from_num(n)
}

/// Create a fixed-point number from a float (for tests only).
///
/// Simulation code never touches floats; this is only for test setup.
#[must_use]
pub fn fixed_f(n: f64) -> Fixed {
    Fixed::from_num(n)
}

/// A battlefield position from integers.
#[must_use]
pub fn pos(x: i32, y: i32) -> Vec3Fixed {
    Vec3Fixed::from_ints(x, y)
}

/// Game data document used across test suites.
///
/// Two mobile fighters, a builder, a wall and a factory with a build queue.
#[must_use]
pub fn sample_game_data_value() -> Value {
    json!({
        "abilities": {
            "Cannon": {"damage": 25, "range": 90, "reload": 6, "bullet_speed": 15},
            "Autocannon": {"damage": 6, "range": 60, "reload": 2, "bullet_speed": 25}
        },
        "actors": {
            "Tank": {"move_speed": 2, "abilities": ["Cannon"], "max_hp": 120},
            "Scout": {"move_speed": 4, "abilities": ["Autocannon"], "max_hp": 40},
            "Worker": {"move_speed": 2, "build_list": "basic", "build_rate": 10, "max_hp": 50},
            "Wall": {"type": "building", "size": [40, 40], "max_hp": 300},
            "Factory": {
                "type": "building",
                "size": [60, 60],
                "max_hp": 500,
                "uses_build_queue": true,
                "build_list": "factory",
                "build_offset": [0, 60, 0],
                "build_rate": 20
            }
        },
        "build_lists": {"basic": ["Wall", "Factory"], "factory": ["Tank", "Scout"]}
    })
}

/// Parsed [`sample_game_data_value`].
///
/// # Panics
///
/// Panics if the sample document stops parsing, which is a bug in this crate.
#[must_use]
pub fn sample_game_data() -> GameData {
    GameData::from_value(&sample_game_data_value()).expect("sample game data parses")
}

/// One tank per side, facing each other across open ground.
///
/// # Panics
///
/// Panics if the scenario document stops parsing.
#[must_use]
pub fn duel_scenario() -> Scenario {
    Scenario::from_value(&json!({
        "battlefield": {"size": [800, 600]},
        "actors": [
            {"type": "Tank", "team": 1, "pos": [100, 300]},
            {"type": "Tank", "team": 2, "pos": [600, 300]}
        ]
    }))
    .expect("duel scenario parses")
}

/// Two mirrored armies of `per_team` units each, plus a factory and a worker
/// per side.
///
/// # Panics
///
/// Panics if the generated document stops parsing.
#[must_use]
pub fn skirmish_scenario(per_team: u32) -> Scenario {
    let mut actors = vec![
        json!({"type": "Factory", "team": 1, "pos": [100, 100], "build_queue": ["Scout"]}),
        json!({"type": "Worker", "team": 1, "pos": [180, 100]}),
        json!({"type": "Factory", "team": 2, "pos": [1100, 1100], "build_queue": ["Scout"]}),
        json!({"type": "Worker", "team": 2, "pos": [1020, 1100]}),
    ];
    for i in 0..per_team {
        let offset = f64::from(i) * 40.0;
        let kind = if i % 3 == 2 { "Scout" } else { "Tank" };
        actors.push(json!({"type": kind, "team": 1, "pos": [300.0 + offset, 300.0]}));
        actors.push(json!({"type": kind, "team": 2, "pos": [900.0 - offset, 900.0]}));
    }
    Scenario::from_value(&json!({
        "battlefield": {"size": [1200, 1200]},
        "teams": {"1": {"name": "Blue"}, "2": {"name": "Red"}},
        "actors": actors
    }))
    .expect("skirmish scenario parses")
}

/// Load a battle over the sample game data with default settings and no
/// hosted AIs.
pub fn load_battle(scenario: &Scenario) -> Result<BattleSim> {
    load_battle_with(SimConfig::default(), scenario)
}

/// Load a battle over the sample game data with the given settings.
pub fn load_battle_with(config: SimConfig, scenario: &Scenario) -> Result<BattleSim> {
    BattleSim::load(
        config,
        sample_game_data(),
        scenario,
        &AiRegistry::new(),
        LoadOptions { host_ais: false },
    )
}
