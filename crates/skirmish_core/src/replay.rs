//! Replay system for recording and playing back battles.
//!
//! A replay stores the inputs a battle was loaded from and every external
//! order it scheduled, keyed by the absolute tick the order applied on.
//! Orders the simulation generates itself are not stored; playback
//! regenerates them. Hosted AIs are not restarted on playback, their recorded
//! orders stand in for them.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ai::AiRegistry;
use crate::config::SimConfig;
use crate::data::{GameData, Scenario};
use crate::error::{GameError, Result};
use crate::orders::ScheduledOrder;
use crate::simulation::{BattleSim, LoadOptions, SimState};

/// Bumped whenever the file layout changes.
pub const REPLAY_VERSION: u32 = 2;

/// A recorded battle: its inputs, external orders and final hash.
///
/// Inputs are kept as JSON text so the bincode file does not depend on the
/// shape of free-form data fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replay {
    /// File layout version.
    pub version: u32,
    /// Scenario name, for display.
    pub scenario_name: String,
    /// Configuration attribute map as JSON.
    pub config: String,
    /// Game data as JSON.
    pub game_data: String,
    /// Scenario as JSON.
    pub scenario: String,
    /// External orders in scheduling order.
    pub orders: Vec<ScheduledOrder>,
    /// Final tick when the battle ended.
    pub final_tick: u64,
    /// State hash at `final_tick`.
    pub final_hash: u64,
}

impl Replay {
    /// Create a replay of a battle loaded from these inputs.
    pub fn new(
        scenario_name: impl Into<String>,
        config: &SimConfig,
        game_data: &GameData,
        scenario: &Scenario,
    ) -> Result<Self> {
        Ok(Self {
            version: REPLAY_VERSION,
            scenario_name: scenario_name.into(),
            config: config.to_value().to_string(),
            game_data: serde_json::to_string(game_data)?,
            scenario: serde_json::to_string(scenario)?,
            orders: Vec::new(),
            final_tick: 0,
            final_hash: 0,
        })
    }

    /// Take the recorded orders, final tick and hash from a finished battle.
    pub fn finalize(&mut self, sim: &BattleSim) {
        self.orders = sim.recorded_orders().to_vec();
        self.final_tick = sim.tick();
        self.final_hash = sim.state_hash();
    }

    /// Write the replay as bincode.
    ///
    /// # Errors
    /// Returns an error if serialization or file writing fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = bincode::serialize(self)
            .map_err(|e| GameError::InvalidState(format!("Failed to serialize replay: {e}")))?;
        std::fs::write(path.as_ref(), bytes)?;
        Ok(())
    }

    /// Read a replay written by [`Replay::save`].
    ///
    /// # Errors
    /// Returns an error if file reading or deserialization fails, or the
    /// file was written by a different format version.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let replay: Self = bincode::deserialize(&bytes)
            .map_err(|e| GameError::InvalidState(format!("Failed to deserialize replay: {e}")))?;

        if replay.version != REPLAY_VERSION {
            return Err(GameError::InvalidState(format!(
                "Replay version mismatch: expected {}, got {}",
                REPLAY_VERSION, replay.version
            )));
        }

        Ok(replay)
    }

    /// Load the battle this replay starts from, with every order injected.
    ///
    /// # Errors
    /// Returns an error if the stored inputs no longer parse or load.
    pub fn start(&self) -> Result<BattleSim> {
        let config = SimConfig::from_json_str(&self.config)?;
        let game_data: GameData = parse_json(&self.game_data, "replay game data")?;
        let scenario: Scenario = parse_json(&self.scenario, "replay scenario")?;

        let mut sim = BattleSim::load(
            config,
            game_data,
            &scenario,
            &AiRegistry::new(),
            LoadOptions { host_ais: false },
        )?;
        for order in &self.orders {
            sim.inject_order(order.clone())?;
        }
        Ok(sim)
    }

    /// Orders that applied on `tick`.
    #[must_use]
    pub fn orders_at_tick(&self, tick: u64) -> Vec<&ScheduledOrder> {
        self.orders.iter().filter(|o| o.tick == tick).collect()
    }

    /// Length of the recording in ticks.
    #[must_use]
    pub const fn duration(&self) -> u64 {
        self.final_tick
    }

    /// Get the total number of recorded orders.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(text: &str, source_name: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| GameError::DataParse {
        source_name: source_name.to_string(),
        message: e.to_string(),
    })
}

/// Plays a [`Replay`] back into a fresh battle.
#[derive(Debug)]
pub struct ReplayPlayer {
    replay: Replay,
    simulation: BattleSim,
    /// Paused players ignore [`ReplayPlayer::advance`].
    pub paused: bool,
}

impl ReplayPlayer {
    /// Create a player positioned at tick 0.
    ///
    /// # Errors
    /// Returns an error if the replay's battle cannot be loaded.
    pub fn new(replay: Replay) -> Result<Self> {
        let simulation = replay.start()?;
        Ok(Self {
            replay,
            simulation,
            paused: false,
        })
    }

    /// Step the battle once, if playback is not paused or finished.
    ///
    /// Returns whether there are more ticks to play.
    pub fn advance(&mut self) -> Result<bool> {
        if !self.paused && !self.is_finished() && self.simulation.state() == SimState::Running {
            self.simulation.step()?;
        }
        Ok(!self.is_finished())
    }

    /// Seek to a specific tick, replaying from the start if it lies behind.
    ///
    /// # Errors
    /// Returns an error if reloading or stepping the battle fails.
    pub fn seek(&mut self, target_tick: u64) -> Result<()> {
        if target_tick < self.simulation.tick() {
            self.simulation.shutdown();
            self.simulation = self.replay.start()?;
        }
        self.simulation
            .run_until(target_tick.min(self.replay.final_tick))
    }

    /// Get the current tick.
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.simulation.tick()
    }

    /// Get a reference to the battle being played.
    #[must_use]
    pub const fn simulation(&self) -> &BattleSim {
        &self.simulation
    }

    /// The recording under playback.
    #[must_use]
    pub const fn replay(&self) -> &Replay {
        &self.replay
    }

    /// Whether playback reached the recorded final tick.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.simulation.tick() >= self.replay.final_tick
    }

    /// Play to the end and compare against the recorded hash.
    ///
    /// # Errors
    /// Returns [`GameError::DesyncDetected`] if the hashes differ.
    pub fn verify(&mut self) -> Result<()> {
        self.seek(self.replay.final_tick)?;
        let local_hash = self.simulation.state_hash();
        if local_hash != self.replay.final_hash {
            return Err(GameError::DesyncDetected {
                tick: self.simulation.tick(),
                local_hash,
                remote_hash: self.replay.final_hash,
            });
        }
        tracing::info!(
            tick = self.simulation.tick(),
            hash = local_hash,
            "Replay verified"
        );
        Ok(())
    }

    /// Toggle pause state.
    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Playback position as a percentage of the recording.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_percent(&self) -> f64 {
        if self.replay.final_tick == 0 {
            100.0
        } else {
            (self.current_tick() as f64 / self.replay.final_tick as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3Fixed;
    use crate::orders::Command;
    use serde_json::json;

    fn inputs() -> (SimConfig, GameData, Scenario) {
        let data = GameData::from_value(&json!({
            "abilities": {"Gun": {"damage": 10, "range": 60, "reload": 4}},
            "actors": {"Tank": {"move_speed": 3, "abilities": ["Gun"]}}
        }))
        .unwrap();
        let scenario = Scenario::from_value(&json!({
            "battlefield": {"size": [800, 800]},
            "actors": [
                {"type": "Tank", "team": 1, "pos": [100, 100]},
                {"type": "Tank", "team": 2, "pos": [400, 100]}
            ]
        }))
        .unwrap();
        (SimConfig::default(), data, scenario)
    }

    fn recorded_battle() -> Replay {
        let (config, data, scenario) = inputs();
        let mut replay = Replay::new("duel", &config, &data, &scenario).unwrap();
        let mut sim =
            BattleSim::load(config, data, &scenario, &AiRegistry::new(), LoadOptions::default())
                .unwrap();

        sim.add_order(0_u64, Command::Move, Some(Vec3Fixed::from_ints(300, 100)), None);
        sim.run_until(20).unwrap();
        sim.queue_order(1_u64, Command::Move, Some(Vec3Fixed::from_ints(200, 150)), None);
        sim.run_until(80).unwrap();

        replay.finalize(&sim);
        replay
    }

    #[test]
    fn test_finalize_captures_orders() {
        let replay = recorded_battle();
        assert_eq!(replay.version, REPLAY_VERSION);
        assert_eq!(replay.order_count(), 2);
        assert_eq!(replay.orders_at_tick(3).len(), 1);
        assert_eq!(replay.orders_at_tick(23).len(), 1);
        assert!(replay.orders_at_tick(7).is_empty());
        assert_eq!(replay.duration(), 80);
    }

    #[test]
    fn test_playback_reproduces_hash() {
        let replay = recorded_battle();
        let mut player = ReplayPlayer::new(replay).unwrap();
        assert!(player.verify().is_ok());
        assert!(player.is_finished());
    }

    #[test]
    fn test_tampered_replay_desyncs() {
        let mut replay = recorded_battle();
        replay.orders.pop();
        let mut player = ReplayPlayer::new(replay).unwrap();
        assert!(matches!(
            player.verify(),
            Err(GameError::DesyncDetected { tick: 80, .. })
        ));
    }

    #[test]
    fn test_save_load() {
        let replay = recorded_battle();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duel.replay");
        replay.save(&path).unwrap();

        let loaded = Replay::load(&path).unwrap();
        assert_eq!(loaded, replay);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut replay = recorded_battle();
        replay.version = REPLAY_VERSION + 1;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.replay");
        replay.save(&path).unwrap();
        assert!(matches!(
            Replay::load(&path),
            Err(GameError::InvalidState(_))
        ));
    }

    #[test]
    fn test_player_pause_and_seek() {
        let mut player = ReplayPlayer::new(recorded_battle()).unwrap();
        player.paused = true;
        assert!(player.advance().unwrap());
        assert_eq!(player.current_tick(), 0);

        player.toggle_pause();
        player.advance().unwrap();
        assert_eq!(player.current_tick(), 1);

        player.seek(40).unwrap();
        assert!((player.progress_percent() - 50.0).abs() < 0.01);
        player.seek(10).unwrap();
        assert_eq!(player.current_tick(), 10);
    }
}
