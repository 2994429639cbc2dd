//! Batch-style entry points: run a match, check determinism, verify or time
//! a replay.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use skirmish_core::actors::TeamId;
use skirmish_core::ai::AiRegistry;
use skirmish_core::config::SimConfig;
use skirmish_core::data::{GameData, Scenario};
use skirmish_core::replay::{Replay, ReplayPlayer};
use skirmish_core::simulation::{BattleSim, LoadOptions, SimState};
use skirmish_server::TcpRelay;

use crate::error::{HeadlessError, Result};

/// AI class name that runs the built-in agent in a child process.
pub const PROCESS_AGENT_CLASS: &str = "basic-process";

/// Ticks per second when playing over a relay and no rate was given.
pub const DEFAULT_NETWORK_TICK_RATE: u32 = 30;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a battle is loaded from.
#[derive(Debug, Clone)]
pub struct MatchInputs {
    /// Display name, taken from the scenario file name.
    pub name: String,
    /// Simulation settings.
    pub config: SimConfig,
    /// Templates.
    pub game_data: GameData,
    /// Battlefield and starting actors.
    pub scenario: Scenario,
}

impl MatchInputs {
    /// Load game data, a scenario and optional settings from files.
    ///
    /// # Errors
    /// Returns an error if any file cannot be read or parsed.
    pub fn load(game_data: &Path, scenario: &Path, config: Option<&Path>) -> Result<Self> {
        let config = match config {
            Some(path) => SimConfig::load(path)?,
            None => SimConfig::default(),
        };
        let name = scenario
            .file_stem()
            .map_or_else(|| "scenario".to_string(), |s| s.to_string_lossy().into_owned());
        Ok(Self {
            name,
            config,
            game_data: GameData::load(game_data)?,
            scenario: Scenario::load(scenario)?,
        })
    }

    /// Load a battle from these inputs.
    ///
    /// # Errors
    /// Returns an error if the battle fails to load.
    pub fn battle(&self, registry: &AiRegistry, options: LoadOptions) -> Result<BattleSim> {
        Ok(BattleSim::load(
            self.config.clone(),
            self.game_data.clone(),
            &self.scenario,
            registry,
            options,
        )?)
    }
}

/// The AI classes a headless peer offers: the built-in agent on a thread,
/// and the same agent in a child process running this executable.
///
/// # Errors
/// Returns an error if the current executable cannot be located.
pub fn agent_registry() -> Result<AiRegistry> {
    let mut registry = AiRegistry::with_builtin();
    registry.register_process(
        PROCESS_AGENT_CLASS,
        std::env::current_exe()?,
        vec!["agent".to_string(), "--ai".to_string(), "basic".to_string()],
    )?;
    Ok(registry)
}

/// How to run one match.
#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// Stop after this many ticks.
    pub ticks: u64,
    /// Relay hub to join, if any.
    pub connect: Option<SocketAddr>,
    /// Ticks per second; `None` runs unpaced unless connected.
    pub tick_rate: Option<u32>,
    /// Whether this peer runs the scenario's AIs.
    pub host_ais: bool,
    /// Where to save a replay of the match.
    pub replay_out: Option<PathBuf>,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            ticks: 1000,
            connect: None,
            tick_rate: None,
            host_ais: true,
            replay_out: None,
        }
    }
}

/// Per-team survivors at the end of a match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamReport {
    /// Actors still standing.
    pub actors: usize,
    /// Their combined hit points.
    pub total_hp: f64,
}

/// Outcome of a match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchReport {
    /// Scenario name.
    pub scenario: String,
    /// Last tick run.
    pub ticks: u64,
    /// State hash at the end.
    pub final_hash: u64,
    /// Number assigned by the relay hub, when connected.
    pub player_number: Option<u32>,
    /// External orders the match applied or scheduled.
    pub recorded_orders: usize,
    /// Whether the match ended before its tick limit.
    pub ended_early: bool,
    /// Survivors by team.
    pub teams: BTreeMap<TeamId, TeamReport>,
}

impl MatchReport {
    fn of(name: &str, sim: &BattleSim, ticks: u64) -> Self {
        let mut teams: BTreeMap<TeamId, TeamReport> = sim
            .teams()
            .keys()
            .map(|team| {
                (
                    *team,
                    TeamReport {
                        actors: 0,
                        total_hp: 0.0,
                    },
                )
            })
            .collect();
        for actor in sim.actors().iter().filter(|a| !a.is_dead()) {
            let report = teams.entry(actor.team).or_insert(TeamReport {
                actors: 0,
                total_hp: 0.0,
            });
            report.actors += 1;
            report.total_hp += actor.hp.to_num::<f64>();
        }

        Self {
            scenario: name.to_string(),
            ticks: sim.tick(),
            final_hash: sim.state_hash(),
            player_number: sim.player_number(),
            recorded_orders: sim.recorded_orders().len(),
            ended_early: sim.tick() < ticks,
            teams,
        }
    }
}

/// Run one match to its tick limit or until a peer quits.
///
/// The battle is always shut down, so hosted AIs and the relay peer are told
/// to quit even when a step fails.
///
/// # Errors
/// Returns an error if loading, connecting, stepping or saving the replay
/// fails.
pub fn run_match(inputs: &MatchInputs, options: &MatchOptions) -> Result<MatchReport> {
    let registry = agent_registry()?;
    let mut replay = options
        .replay_out
        .as_ref()
        .map(|_| Replay::new(&inputs.name, &inputs.config, &inputs.game_data, &inputs.scenario))
        .transpose()?;

    let mut sim = inputs.battle(
        &registry,
        LoadOptions {
            host_ais: options.host_ais,
        },
    )?;
    if let Some(addr) = options.connect {
        let relay = TcpRelay::connect(addr, CONNECT_TIMEOUT)?;
        sim.attach_relay(Box::new(relay));
    }

    let tick_rate = options
        .tick_rate
        .or(options.connect.map(|_| DEFAULT_NETWORK_TICK_RATE))
        .filter(|rate| *rate > 0);
    tracing::info!(
        scenario = %inputs.name,
        ticks = options.ticks,
        ?tick_rate,
        networked = options.connect.is_some(),
        "Starting match"
    );

    let outcome = drive(&mut sim, options.ticks, tick_rate);
    sim.shutdown();
    outcome?;

    if let (Some(path), Some(replay)) = (&options.replay_out, replay.as_mut()) {
        replay.finalize(&sim);
        replay.save(path)?;
        tracing::info!(path = %path.display(), orders = replay.order_count(), "Saved replay");
    }

    let report = MatchReport::of(&inputs.name, &sim, options.ticks);
    tracing::info!(tick = report.ticks, hash = report.final_hash, "Match finished");
    Ok(report)
}

fn drive(sim: &mut BattleSim, ticks: u64, tick_rate: Option<u32>) -> Result<()> {
    let interval = tick_rate.map(|rate| Duration::from_secs(1) / rate);
    let mut next = Instant::now();

    while sim.state() == SimState::Running && sim.tick() < ticks {
        let events = sim.step()?;
        for id in &events.deaths {
            tracing::debug!(tick = events.tick, actor = *id, "Actor destroyed");
        }
        if let Some(interval) = interval {
            next += interval;
            thread::sleep(next.saturating_duration_since(Instant::now()));
        }
    }
    Ok(())
}

/// Hashes from repeated runs of one battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeterminismReport {
    /// Ticks per run.
    pub ticks: u64,
    /// Final hash of each run.
    pub hashes: Vec<u64>,
}

/// Run the battle `runs` times without hosted AIs and compare final hashes.
///
/// # Errors
/// Returns [`HeadlessError::NonDeterministic`] if any two runs disagree, or
/// the first load or step error.
pub fn check_determinism(inputs: &MatchInputs, runs: u32, ticks: u64) -> Result<DeterminismReport> {
    let registry = AiRegistry::new();
    let mut hashes = Vec::new();
    for run in 0..runs {
        let mut sim = inputs.battle(&registry, LoadOptions { host_ais: false })?;
        sim.run_until(ticks)?;
        tracing::debug!(run, hash = sim.state_hash(), "Run finished");
        hashes.push(sim.state_hash());
    }

    if hashes.windows(2).any(|w| w[0] != w[1]) {
        return Err(HeadlessError::NonDeterministic { hashes });
    }
    Ok(DeterminismReport { ticks, hashes })
}

/// Result of playing back a replay file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Scenario the replay was recorded from.
    pub scenario: String,
    /// Tick playback stopped at.
    pub final_tick: u64,
    /// Hash reached by playback.
    pub hash: u64,
    /// Orders in the replay.
    pub orders: usize,
    /// Whether the hash was checked against the recording.
    pub verified: bool,
}

/// Play a replay file to its end, optionally checking the final hash.
///
/// # Errors
/// Returns an error if the file cannot be loaded, or
/// [`skirmish_core::error::GameError::DesyncDetected`] when `verify` is set
/// and the hashes differ.
pub fn play_replay(path: &Path, verify: bool) -> Result<ReplayReport> {
    let replay = Replay::load(path)?;
    let scenario = replay.scenario_name.clone();
    let orders = replay.order_count();
    let final_tick = replay.final_tick;

    let mut player = ReplayPlayer::new(replay)?;
    if verify {
        player.verify()?;
    } else {
        player.seek(final_tick)?;
    }

    Ok(ReplayReport {
        scenario,
        final_tick: player.current_tick(),
        hash: player.simulation().state_hash(),
        orders,
        verified: verify,
    })
}

/// Tick throughput of one battle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
    /// Ticks run.
    pub ticks: u64,
    /// Wall-clock time in milliseconds.
    pub elapsed_ms: u128,
    /// Ticks per second.
    pub ticks_per_sec: f64,
}

/// Run the battle unpaced without AIs and time it.
///
/// # Errors
/// Returns the first load or step error.
pub fn benchmark(inputs: &MatchInputs, ticks: u64) -> Result<BenchmarkReport> {
    let mut sim = inputs.battle(&AiRegistry::new(), LoadOptions { host_ais: false })?;
    let started = Instant::now();
    sim.run_until(ticks)?;
    let elapsed = started.elapsed();

    #[allow(clippy::cast_precision_loss)]
    let ticks_per_sec = if elapsed.is_zero() {
        0.0
    } else {
        ticks as f64 / elapsed.as_secs_f64()
    };
    Ok(BenchmarkReport {
        ticks,
        elapsed_ms: elapsed.as_millis(),
        ticks_per_sec,
    })
}
