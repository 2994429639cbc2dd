//! Determinism testing utilities.
//!
//! Provides harnesses for verifying that battles produce identical results
//! given identical inputs, and that two peers joined by a relay stay in
//! lockstep.
//!
//! # Testing Strategy
//!
//! Lockstep peers exchange only orders, so the battle itself must be 100%
//! deterministic. Sources of non-determinism include:
//!
//! - **Floating-point math**: the simulation uses
//!   [`skirmish_core::math::Fixed`] throughout; floats appear only on the
//!   wire and are quantized on the way in.
//!
//! - **Map iteration order**: actors are always visited in sorted id order.
//!
//! - **Thread timing**: AI replies arrive whenever they arrive, so only
//!   battles without hosted AIs are reproducible tick for tick. Replays
//!   capture AI orders as inputs.
//!
//! # Test Levels
//!
//! 1. **Repeat runs**: the same setup run N times hashes the same
//! 2. **Property tests**: random order streams still replay exactly
//! 3. **Lockstep pairs**: two relayed peers never diverge
//! 4. **Parallel runs**: N battles on N threads all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;

use skirmish_core::error::Result;
use skirmish_core::relay::LoopbackRelay;
use skirmish_core::replay::{Replay, ReplayPlayer};
use skirmish_core::simulation::BattleSim;

use self::strategies::TestOrder;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of ticks simulated.
    pub ticks: u64,
}

impl DeterminismResult {
    fn from_hashes(hashes: Vec<u64>, ticks: u64) -> Self {
        Self {
            is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
            hashes,
            ticks,
        }
    }

    /// Get all unique hashes (should be 1 for a deterministic battle).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that every run matched, with a detailed message otherwise.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            panic!(
                "Battle is non-deterministic!\n\
                 Runs: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.ticks,
                self.unique_hashes().len(),
                self.hashes
            );
        }
    }
}

/// Run any state machine multiple times and compare final hashes.
///
/// # Example
///
/// ```
/// use skirmish_test_utils::determinism::verify_determinism;
///
/// let result = verify_determinism(3, 100, || 0u64, |n| *n += 1, |n| *n);
/// assert!(result.is_deterministic);
/// ```
pub fn verify_determinism<S, Setup, Step, Hash>(
    runs: usize,
    ticks: u64,
    setup: Setup,
    mut step: Step,
    hash: Hash,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: FnMut(&mut S),
    Hash: Fn(&S) -> u64,
{
    let hashes = (0..runs)
        .map(|_| {
            let mut state = setup();
            for _ in 0..ticks {
                step(&mut state);
            }
            hash(&state)
        })
        .collect();
    DeterminismResult::from_hashes(hashes, ticks)
}

/// Load and run a battle twice, stepping `ticks` ticks each time.
///
/// # Errors
///
/// Returns the first load or step error.
pub fn verify_battle_determinism<F>(setup: F, ticks: u64) -> Result<DeterminismResult>
where
    F: Fn() -> Result<BattleSim>,
{
    let mut hashes = Vec::with_capacity(2);
    for _ in 0..2 {
        let mut sim = setup()?;
        sim.run_until(ticks)?;
        hashes.push(sim.state_hash());
    }
    Ok(DeterminismResult::from_hashes(hashes, ticks))
}

/// Run a battle, issuing each scripted order on its tick.
///
/// Orders are issued through the local input path, so they are recorded and
/// relayed exactly as a player's would be.
///
/// # Errors
///
/// Returns the first step error.
pub fn run_script(sim: &mut BattleSim, script: &[TestOrder], ticks: u64) -> Result<()> {
    while sim.tick() < ticks {
        issue_due(sim, script);
        sim.step()?;
    }
    Ok(())
}

fn issue_due(sim: &mut BattleSim, script: &[TestOrder]) {
    let now = sim.tick();
    for order in script.iter().filter(|o| o.tick == now) {
        let target = order.target.map(Into::into);
        if order.queue {
            sim.queue_order(order.actor, order.command.clone(), order.pos, target);
        } else {
            sim.add_order(order.actor, order.command.clone(), order.pos, target);
        }
    }
}

/// Result of parallel battle runs.
#[derive(Debug, Clone)]
pub struct ParallelSimResult {
    /// Final state hash from each battle.
    pub hashes: Vec<u64>,
    /// Number of ticks each battle ran.
    pub ticks: u64,
    /// Number of battles run.
    pub num_sims: usize,
}

impl ParallelSimResult {
    /// Check if all battles produced identical results.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.hashes.windows(2).all(|w| w[0] == w[1])
    }

    /// Assert all battles matched.
    ///
    /// # Panics
    ///
    /// Panics if battles produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic() {
            let mut unique: Vec<u64> = self.hashes.clone();
            unique.sort_unstable();
            unique.dedup();
            panic!(
                "Parallel battles diverged!\n\
                 Battles: {}\n\
                 Ticks: {}\n\
                 Unique hashes: {}\n\
                 All hashes: {:?}",
                self.num_sims,
                self.ticks,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run N battles on scoped threads and collect their final hashes.
///
/// Each thread loads its own battle from `setup`.
///
/// # Errors
///
/// Returns the first load or step error from any thread.
///
/// # Panics
///
/// Re-raises a panic from any battle thread.
pub fn run_parallel_battles<F>(setup: F, num_sims: usize, ticks: u64) -> Result<ParallelSimResult>
where
    F: Fn() -> Result<BattleSim> + Sync,
{
    let results: Vec<Result<u64>> = thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| -> Result<u64> {
                    let mut sim = setup()?;
                    sim.run_until(ticks)?;
                    Ok(sim.state_hash())
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    });

    Ok(ParallelSimResult {
        hashes: results.into_iter().collect::<Result<_>>()?,
        ticks,
        num_sims,
    })
}

/// Step two copies of a battle side by side and report the first tick their
/// hashes differ, or `None` if they never do.
///
/// # Errors
///
/// Returns the first load or step error.
pub fn find_first_divergence<F>(setup: F, ticks: u64) -> Result<Option<u64>>
where
    F: Fn() -> Result<BattleSim>,
{
    let mut first = setup()?;
    let mut second = setup()?;

    if first.state_hash() != second.state_hash() {
        return Ok(Some(0));
    }

    for tick in 1..=ticks {
        first.step()?;
        second.step()?;
        if first.state_hash() != second.state_hash() {
            return Ok(Some(tick));
        }
    }

    Ok(None)
}

/// Run two peers joined by a [`LoopbackRelay`], each issuing its own half of
/// the script, and report the first tick their hashes differ.
///
/// # Errors
///
/// Returns the first load or step error on either peer.
pub fn find_lockstep_divergence<F>(
    setup: F,
    left_script: &[TestOrder],
    right_script: &[TestOrder],
    ticks: u64,
) -> Result<Option<u64>>
where
    F: Fn() -> Result<BattleSim>,
{
    let (left_end, right_end) = LoopbackRelay::pair();
    let mut left = setup()?;
    let mut right = setup()?;
    left.attach_relay(Box::new(left_end));
    right.attach_relay(Box::new(right_end));

    while left.tick() < ticks {
        issue_due(&mut left, left_script);
        issue_due(&mut right, right_script);
        left.step()?;
        right.step()?;
        if left.state_hash() != right.state_hash() {
            return Ok(Some(left.tick()));
        }
    }

    Ok(None)
}

/// Record a scripted battle into a replay and check that playback reaches the
/// same final hash.
///
/// # Errors
///
/// Returns any load, step or playback error other than a desync, which is
/// reported as `Ok(false)`.
pub fn verify_replay_determinism<F>(
    setup: F,
    script: &[TestOrder],
    ticks: u64,
) -> Result<bool>
where
    F: Fn() -> Result<(BattleSim, Replay)>,
{
    let (mut sim, mut replay) = setup()?;
    run_script(&mut sim, script, ticks)?;
    replay.finalize(&sim);

    let mut player = ReplayPlayer::new(replay)?;
    match player.verify() {
        Ok(()) => Ok(true),
        Err(skirmish_core::error::GameError::DesyncDetected { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for determinism testing.
///
/// These generate random but reproducible order streams against a battle
/// whose actor ids are known in advance.
pub mod strategies {
    use proptest::prelude::*;
    use skirmish_core::actors::ActorId;
    use skirmish_core::math::{Fixed, Vec3Fixed};
    use skirmish_core::orders::Command;

    /// One scripted order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TestOrder {
        /// Tick the order is issued on (it applies `tick_jump` later).
        pub tick: u64,
        /// Actor receiving the order.
        pub actor: ActorId,
        /// What to do.
        pub command: Command,
        /// Destination.
        pub pos: Option<Vec3Fixed>,
        /// Target actor.
        pub target: Option<ActorId>,
        /// Queue behind current orders instead of replacing them.
        pub queue: bool,
    }

    /// Generate a position inside a `width` by `height` battlefield, with a
    /// fractional part so quantization is exercised.
    pub fn arb_position(width: i32, height: i32) -> impl Strategy<Value = Vec3Fixed> {
        (0..width, 0..height, 0u8..8).prop_map(|(x, y, eighths)| {
            let frac = Fixed::from_num(eighths) / Fixed::from_num(8);
            Vec3Fixed::new(Fixed::from_num(x) + frac, Fixed::from_num(y), Fixed::ZERO)
        })
    }

    /// Generate a command with the fields it needs.
    ///
    /// `actors` is the number of actors the battle starts with; targets are
    /// drawn from ids `0..actors`.
    pub fn arb_command(
        width: i32,
        height: i32,
        actors: ActorId,
    ) -> impl Strategy<Value = (Command, Option<Vec3Fixed>, Option<ActorId>)> {
        prop_oneof![
            1 => Just((Command::Stop, None, None)),
            4 => arb_position(width, height).prop_map(|p| (Command::Move, Some(p), None)),
            2 => (0..actors).prop_map(|t| (Command::Attack, None, Some(t))),
        ]
    }

    /// Generate one scripted order issued before `max_tick`.
    pub fn arb_test_order(
        max_tick: u64,
        width: i32,
        height: i32,
        actors: ActorId,
    ) -> impl Strategy<Value = TestOrder> {
        (
            0..max_tick,
            0..actors,
            arb_command(width, height, actors),
            any::<bool>(),
        )
            .prop_map(|(tick, actor, (command, pos, target), queue)| TestOrder {
                tick,
                actor,
                command,
                pos,
                target,
                queue,
            })
    }

    /// Generate a script of up to `max_len` orders, sorted by issue tick.
    pub fn arb_order_stream(
        max_len: usize,
        max_tick: u64,
        width: i32,
        height: i32,
        actors: ActorId,
    ) -> impl Strategy<Value = Vec<TestOrder>> {
        proptest::collection::vec(arb_test_order(max_tick, width, height, actors), 0..max_len)
            .prop_map(|mut orders| {
                orders.sort_by_key(|o| o.tick);
                orders
            })
    }
}
