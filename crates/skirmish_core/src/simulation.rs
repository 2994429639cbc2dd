//! The battle simulation: one tick loop composing every other module.
//!
//! # Determinism
//!
//! Every peer of a match runs its own [`BattleSim`] on the same inputs and
//! must reach the same state:
//! - all simulation quantities are fixed point (see [`Fixed`])
//! - actors are always visited in ascending id order
//! - collision pairs are canonicalized to `(lower id, higher id)`
//! - external orders apply `tick_jump` ticks after they are issued, keyed by
//!   absolute tick, so every peer applies them on the same tick
//! - orders the simulation generates itself (builder `aid`, autotargeter
//!   `attack`) are recomputed on every peer and never relayed; they live in
//!   their own scheduler and apply before external orders for the same tick
//!
//! # Example
//!
//! ```
//! use skirmish_core::ai::AiRegistry;
//! use skirmish_core::config::SimConfig;
//! use skirmish_core::data::{GameData, Scenario};
//! use skirmish_core::math::Vec3Fixed;
//! use skirmish_core::orders::Command;
//! use skirmish_core::simulation::{BattleSim, LoadOptions};
//!
//! let data = GameData::from_value(&serde_json::json!({
//!     "actors": {"Scout": {"move_speed": 2}}
//! }))
//! .unwrap();
//! let scenario = Scenario::from_value(&serde_json::json!({
//!     "battlefield": {"size": [500, 500]},
//!     "actors": [{"type": "Scout", "team": 1, "pos": [100, 100]}]
//! }))
//! .unwrap();
//!
//! let mut sim = BattleSim::load(
//!     SimConfig::default(),
//!     data,
//!     &scenario,
//!     &AiRegistry::new(),
//!     LoadOptions::default(),
//! )
//! .unwrap();
//!
//! let scheduled = sim.add_order(0_u64, Command::Move, Some(Vec3Fixed::from_ints(110, 100)), None);
//! assert_eq!(scheduled.tick, 3);
//! sim.run_until(10).unwrap();
//! assert_eq!(sim.actors().get(0).unwrap().pos, Vec3Fixed::from_ints(110, 100));
//! ```

use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::actors::{
    to_fixed, Actor, ActorAction, ActorHandle, ActorId, ActorTable, TargetView, TeamId,
    FULL_COMPLETION,
};
use crate::ai::{ActorList, ActorSnapshot, AiChannel, AiOrder, AiRegistry, ToAi};
use crate::autotargeter::Autotargeter;
use crate::collision::{collides_with_any, find_placement, CollisionEngine, PLACEMENT_RADII};
use crate::config::SimConfig;
use crate::data::{ActorPlacement, ActorType, GameData, Scenario};
use crate::error::{GameError, Result};
use crate::math::{Fixed, Rect, Vec3Fixed};
use crate::orders::{ActorRef, Command, Order, OrderMode, OrderScheduler, ScheduledOrder};
use crate::projectiles::{hash_all, Bullet, Effect};
use crate::relay::{NetworkRelay, RelayMessage};

/// Lifecycle of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    /// Data is being parsed and AIs started.
    Loading,
    /// Ticks are being processed.
    Running,
    /// Quit is being broadcast.
    ShuttingDown,
    /// The battle is over; `step` is rejected.
    Stopped,
}

/// Who gives orders to a team's actors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Controller {
    /// An AI agent hosted by this peer.
    Ai {
        /// Registered AI class name.
        class: String,
    },
    /// An AI hosted by another peer; its orders arrive over the relay.
    Remote,
    /// The built-in autotargeter.
    Autotargeter,
}

/// A team taking part in the battle.
#[derive(Debug, Clone, PartialEq)]
pub struct Team {
    /// Team id.
    pub id: TeamId,
    /// Team data from the scenario.
    pub data: Map<String, Value>,
    /// Assigned controller.
    pub controller: Controller,
}

/// Options for [`BattleSim::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Whether this peer runs the scenario's AIs. When unset, AI teams are
    /// remote and their orders come over the relay.
    pub host_ais: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { host_ais: true }
    }
}

/// What happened during one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickEvents {
    /// The tick these events belong to.
    pub tick: u64,
    /// Actors placed this tick.
    pub spawned: Vec<ActorId>,
    /// Actors removed this tick.
    pub deaths: Vec<ActorId>,
    /// Actors damaged by explosions this tick.
    pub hits: Vec<ActorId>,
    /// Canonical pairs resolved by the collision pass.
    pub collisions: Vec<(ActorId, ActorId)>,
    /// Orders discarded because their actor was gone or they arrived late.
    pub dropped_orders: usize,
}

/// An actor to be added at the end of the actor phase.
#[derive(Debug)]
struct PendingSpawn {
    actor_type: String,
    team: TeamId,
    pos: Vec3Fixed,
    builder: ActorId,
    /// Builder's rally orders, still addressed to the builder.
    rally: Vec<Order>,
}

/// A running battle.
///
/// # Tick order
///
/// Each [`step`](Self::step) advances the tick counter and then runs, in
/// this order:
/// 0. **AI snapshots** every `ai_update_interval` ticks
/// 1. **AI drain**: hosted AI orders join the external order path
/// 2. **Relay pump**: outbound orders sent, remote orders scheduled
/// 3. **Orders** due this tick applied to their actors
/// 4. **Autotargeters** schedule attacks for idle actors
/// 5. **Actors** in ascending id: production, build queues, orders; deaths
///    and spawns committed at the end
/// 6. **Bullets** advance and explode
/// 7. **Effects** count down and expire
/// 8. **Collisions** every `collision_interval` ticks
pub struct BattleSim {
    state: SimState,
    tick: u64,
    config: SimConfig,
    game_data: GameData,
    bounds: Rect,
    teams: BTreeMap<TeamId, Team>,
    actors: ActorTable,
    bullets: Vec<Bullet>,
    effects: Vec<Effect>,
    scheduler: OrderScheduler,
    internal: OrderScheduler,
    collisions: CollisionEngine,
    autotargeters: BTreeMap<TeamId, Autotargeter>,
    ais: BTreeMap<TeamId, AiChannel>,
    relay: Option<Box<dyn NetworkRelay>>,
    outbox: Vec<RelayMessage>,
    recorded: Vec<ScheduledOrder>,
    player_number: Option<u32>,
    quit_requested: bool,
}

impl std::fmt::Debug for BattleSim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BattleSim")
            .field("state", &self.state)
            .field("tick", &self.tick)
            .field("actors", &self.actors.len())
            .field("bullets", &self.bullets.len())
            .field("ais", &self.ais)
            .field("relay", &self.relay.is_some())
            .finish_non_exhaustive()
    }
}

impl BattleSim {
    /// Load a battle and start its AIs.
    ///
    /// AI teams get an agent from `registry` when `options.host_ais` is set
    /// and are remote otherwise; every other team gets an autotargeter.
    /// Scenario actors default to complete. If anything fails, every AI
    /// started so far is terminated before the error is returned.
    pub fn load(
        config: SimConfig,
        game_data: GameData,
        scenario: &Scenario,
        registry: &AiRegistry,
        options: LoadOptions,
    ) -> Result<Self> {
        let [width, height] = scenario.battlefield.size;
        let bounds = Rect::new(
            Fixed::ZERO,
            Fixed::ZERO,
            to_fixed(width, "battlefield width")?,
            to_fixed(height, "battlefield height")?,
        );

        let mut sim = Self {
            state: SimState::Loading,
            tick: 0,
            scheduler: OrderScheduler::new(config.tick_jump.max(1)),
            internal: OrderScheduler::new(config.tick_jump.max(1)),
            collisions: CollisionEngine::new(config.collision_interval),
            config,
            game_data,
            bounds,
            teams: BTreeMap::new(),
            actors: ActorTable::new(),
            bullets: Vec::new(),
            effects: Vec::new(),
            autotargeters: BTreeMap::new(),
            ais: BTreeMap::new(),
            relay: None,
            outbox: Vec::new(),
            recorded: Vec::new(),
            player_number: None,
            quit_requested: false,
        };

        if let Err(e) = sim.populate(scenario, registry, options) {
            tracing::error!(error = %e, "Battle failed to load, stopping AIs");
            for channel in sim.ais.values_mut() {
                channel.terminate();
            }
            sim.state = SimState::Stopped;
            return Err(e);
        }

        sim.state = SimState::Running;
        tracing::info!(
            actors = sim.actors.len(),
            teams = sim.teams.len(),
            ais = sim.ais.len(),
            "Battle loaded"
        );
        Ok(sim)
    }

    fn populate(
        &mut self,
        scenario: &Scenario,
        registry: &AiRegistry,
        options: LoadOptions,
    ) -> Result<()> {
        let mut team_ids: BTreeSet<TeamId> = scenario.teams.keys().copied().collect();
        team_ids.extend(scenario.ais.keys().copied());
        team_ids.extend(scenario.actors.iter().map(|a| a.team));

        let ttl = Duration::from_secs(self.config.ai_time_to_live_secs);
        for team in team_ids {
            let controller = match scenario.ais.get(&team) {
                Some(assignment) if options.host_ais => {
                    let channel = registry.spawn(&assignment.kind, team, ttl)?;
                    self.ais.insert(team, channel);
                    Controller::Ai {
                        class: assignment.kind.clone(),
                    }
                }
                Some(_) => Controller::Remote,
                None => {
                    self.autotargeters.insert(team, Autotargeter::new(team));
                    Controller::Autotargeter
                }
            };
            self.teams.insert(
                team,
                Team {
                    id: team,
                    data: scenario.teams.get(&team).cloned().unwrap_or_default(),
                    controller,
                },
            );
        }

        for (&team, channel) in &mut self.ais {
            let settings = scenario
                .ais
                .get(&team)
                .map(|a| a.settings.clone())
                .unwrap_or_default();
            channel.send(&ToAi::Init { team, settings });
            channel.send(&ToAi::ActorTypes {
                actor_types: self.game_data.actor_types.clone(),
            });
            channel.send(&ToAi::BuildLists {
                build_lists: self.game_data.build_lists.clone(),
            });
        }

        for placement in &scenario.actors {
            let pos = placement_pos(placement)?;
            self.insert_actor(placement, pos, Fixed::from_num(FULL_COMPLETION), &[])?;
        }
        Ok(())
    }

    /// Attach the relay this peer exchanges orders over.
    ///
    /// Orders issued from here on are stamped with the relay's player
    /// number, when it has one.
    pub fn attach_relay(&mut self, relay: Box<dyn NetworkRelay>) {
        if let Some(number) = relay.player_number() {
            self.set_player_number(number);
        }
        self.relay = Some(relay);
    }

    fn set_player_number(&mut self, number: u32) {
        self.player_number = Some(number);
        self.scheduler.set_origin(Some(number));
    }

    /// Current tick.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SimState {
        self.state
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Loaded templates.
    #[must_use]
    pub const fn game_data(&self) -> &GameData {
        &self.game_data
    }

    /// Battlefield bounds.
    #[must_use]
    pub const fn bounds(&self) -> &Rect {
        &self.bounds
    }

    /// The actor table.
    #[must_use]
    pub const fn actors(&self) -> &ActorTable {
        &self.actors
    }

    /// Resolve a handle returned by placement.
    #[must_use]
    pub fn actor(&self, handle: ActorHandle) -> Option<&Actor> {
        self.actors.get(handle.id())
    }

    /// Bullets in flight.
    #[must_use]
    pub fn bullets(&self) -> &[Bullet] {
        &self.bullets
    }

    /// Live effects.
    #[must_use]
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Teams by id.
    #[must_use]
    pub const fn teams(&self) -> &BTreeMap<TeamId, Team> {
        &self.teams
    }

    /// The channel to a hosted AI.
    #[must_use]
    pub fn ai_channel(&self, team: TeamId) -> Option<&AiChannel> {
        self.ais.get(&team)
    }

    /// Scheduler holding external orders.
    #[must_use]
    pub const fn scheduler(&self) -> &OrderScheduler {
        &self.scheduler
    }

    /// Player number assigned by the relay hub, once known.
    #[must_use]
    pub const fn player_number(&self) -> Option<u32> {
        self.player_number
    }

    /// Every external order this battle has scheduled, in scheduling order.
    #[must_use]
    pub fn recorded_orders(&self) -> &[ScheduledOrder] {
        &self.recorded
    }

    /// Issue a replacement order from local input.
    ///
    /// The order applies `tick_jump` ticks from now and is relayed to the
    /// other peers on the next step.
    pub fn add_order<'a>(
        &mut self,
        actor: impl Into<ActorRef<'a>>,
        command: Command,
        pos: Option<Vec3Fixed>,
        target: Option<ActorRef<'a>>,
    ) -> ScheduledOrder {
        let scheduled = self
            .scheduler
            .add_order(self.tick, actor, command, pos, target);
        self.record_external(scheduled.clone());
        scheduled
    }

    /// Queue an order from local input behind the actor's current orders.
    pub fn queue_order<'a>(
        &mut self,
        actor: impl Into<ActorRef<'a>>,
        command: Command,
        pos: Option<Vec3Fixed>,
        target: Option<ActorRef<'a>>,
    ) -> ScheduledOrder {
        let scheduled = self
            .scheduler
            .queue_order(self.tick, actor, command, pos, target);
        self.record_external(scheduled.clone());
        scheduled
    }

    /// Schedule an external order for the absolute tick it carries.
    ///
    /// Used for replay playback; the order is recorded but not relayed.
    pub fn inject_order(&mut self, scheduled: ScheduledOrder) -> Result<()> {
        self.scheduler.schedule_at(scheduled.clone())?;
        self.recorded.push(scheduled);
        Ok(())
    }

    fn record_external(&mut self, scheduled: ScheduledOrder) {
        if self.relay.is_some() {
            self.outbox.push(RelayMessage::from_scheduled(&scheduled));
        }
        self.recorded.push(scheduled);
    }

    /// Place an actor during the battle.
    ///
    /// The placement's fields override the type template for this actor.
    /// Completion defaults to 0; every builder is given a queued `aid` order
    /// for the new actor.
    pub fn place_actor(
        &mut self,
        data: &ActorPlacement,
        builders: &[ActorId],
    ) -> Result<ActorHandle> {
        let pos = placement_pos(data)?;
        self.insert_actor(data, pos, Fixed::ZERO, builders)
    }

    fn insert_actor(
        &mut self,
        data: &ActorPlacement,
        pos: Vec3Fixed,
        default_completion: Fixed,
        builders: &[ActorId],
    ) -> Result<ActorHandle> {
        let mut actor = {
            let template = self.resolve_template(data)?;
            Actor::from_template(&template, &self.game_data, data.team, pos)?
        };

        let full = Fixed::from_num(FULL_COMPLETION);
        actor.completion = match data.completion {
            Some(value) => to_fixed(value, "completion")?.clamp(Fixed::ZERO, full),
            None => default_completion,
        };
        actor.hp = match data.hp {
            Some(value) => to_fixed(value, "hp")?.min(actor.max_hp),
            None if actor.is_complete() => actor.max_hp,
            None => (actor.max_hp / 100).max(Fixed::DELTA),
        };
        actor.build_queue = data.build_queue.iter().cloned().collect();
        for rally in &data.rally_orders {
            let order = Order::from_wire(
                actor.oid,
                &rally.cmd,
                rally.pos.as_deref(),
                rally.target.as_ref(),
            )?;
            check_in_bounds(&self.bounds, &order)?;
            actor.rally_orders.push(order);
        }

        self.ensure_team(data.team);
        let handle = self.actors.insert(actor);
        if let Some(actor) = self.actors.get_mut(handle.id()) {
            actor.rally_orders = actor.rally_for(handle.id());
        }

        for &builder in builders {
            self.internal.queue_order(
                self.tick,
                builder,
                Command::Aid,
                None,
                Some(ActorRef::Handle(handle)),
            );
        }

        tracing::debug!(
            actor = handle.id(),
            actor_type = %data.actor_type,
            team = data.team,
            "Placed actor"
        );
        Ok(handle)
    }

    /// The placement's type template with its overrides applied.
    fn resolve_template(&self, data: &ActorPlacement) -> Result<Cow<'_, ActorType>> {
        let template = self.game_data.actor_type(&data.actor_type)?;
        if data.overrides.is_empty() {
            return Ok(Cow::Borrowed(template));
        }

        let mut value = serde_json::to_value(template)?;
        if let Value::Object(fields) = &mut value {
            for (key, field) in &data.overrides {
                fields.insert(key.clone(), field.clone());
            }
        }
        let mut merged: ActorType =
            serde_json::from_value(value).map_err(|e| GameError::DataParse {
                source_name: format!("placement of '{}'", data.actor_type),
                message: e.to_string(),
            })?;
        merged.name.clone_from(&data.actor_type);
        Ok(Cow::Owned(merged))
    }

    fn ensure_team(&mut self, team: TeamId) {
        if self.teams.contains_key(&team) {
            return;
        }
        tracing::debug!(team, "Actor placed for a team without a controller");
        self.autotargeters.insert(team, Autotargeter::new(team));
        self.teams.insert(
            team,
            Team {
                id: team,
                data: Map::new(),
                controller: Controller::Autotargeter,
            },
        );
    }

    /// Advance the battle by one tick.
    ///
    /// Errors out of a step are unrecoverable for this battle: a lost relay
    /// connection or a template missing for a spawn. Bad orders and messages
    /// are logged and skipped instead.
    pub fn step(&mut self) -> Result<TickEvents> {
        if self.state != SimState::Running {
            return Err(GameError::InvalidState(format!(
                "cannot step a battle in state {:?}",
                self.state
            )));
        }

        self.tick += 1;
        let mut events = TickEvents {
            tick: self.tick,
            ..TickEvents::default()
        };

        // 0. AI snapshots
        self.push_snapshots();

        // 1. AI drain
        self.drain_ais();

        // 2. Relay pump
        events.dropped_orders += self.pump_relay()?;

        // 3. Orders due this tick
        events.dropped_orders += self.apply_due_orders();

        // 4. Autotargeters
        self.run_autotargeters();

        // 5. Actors
        self.run_actors(&mut events)?;

        // 6. Bullets
        self.run_bullets(&mut events);

        // 7. Effects
        for effect in &mut self.effects {
            effect.update();
        }
        self.effects.retain(|e| !e.is_expired());

        // 8. Collisions
        if self.collisions.is_due(self.tick) {
            events.collisions = self.collisions.run(&mut self.actors);
            if !events.collisions.is_empty() {
                tracing::debug!(
                    tick = self.tick,
                    pairs = events.collisions.len(),
                    "Resolved collisions"
                );
            }
        }

        #[cfg(debug_assertions)]
        {
            let hash = self.state_hash();
            tracing::debug!(tick = self.tick, state_hash = hash, "Simulation state hash");
        }

        if self.quit_requested {
            self.shutdown();
        }
        Ok(events)
    }

    /// Step until the tick counter reaches `tick` or the battle stops.
    pub fn run_until(&mut self, tick: u64) -> Result<()> {
        while self.tick < tick && self.state == SimState::Running {
            self.step()?;
        }
        Ok(())
    }

    fn push_snapshots(&mut self) {
        if self.ais.is_empty() || self.tick % self.config.ai_update_interval.max(1) != 0 {
            return;
        }

        let everything: Option<Vec<ActorSnapshot>> = self
            .config
            .ai_full_visibility
            .then(|| self.actors.iter().map(ActorSnapshot::from).collect());

        for (&team, channel) in &mut self.ais {
            let Some(prefs) = channel.prefs() else {
                tracing::debug!(team, "Skipping snapshot for AI without prefs");
                continue;
            };
            let snapshots = match &everything {
                Some(all) => all.clone(),
                None => visible_snapshots(&self.actors, team, self.config.ai_vision_range),
            };
            channel.send(&ToAi::Actors {
                actor_list: ActorList::build(prefs.actor_format, snapshots),
            });
        }
    }

    fn drain_ais(&mut self) {
        let mut accepted = Vec::new();
        for (&team, channel) in &mut self.ais {
            for ai_order in channel.drain() {
                match validate_ai_order(&self.actors, &self.bounds, team, &ai_order) {
                    Ok(order) => accepted.push(order),
                    Err(e) => channel.record_violation(&e.to_string()),
                }
            }
        }

        for order in accepted {
            let scheduled = self
                .scheduler
                .schedule_delayed(self.tick, OrderMode::Issue, order);
            self.record_external(scheduled);
        }
    }

    /// Send queued orders and take in everything the relay has received.
    ///
    /// Returns the number of remote orders that could not be scheduled.
    fn pump_relay(&mut self) -> Result<usize> {
        let Some(relay) = self.relay.as_mut() else {
            return Ok(0);
        };

        for message in self.outbox.drain(..) {
            relay.send(&message)?;
        }

        let mut dropped = 0;
        while let Some(received) = relay.try_recv() {
            let message = match received {
                Ok(message) => message,
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(error = %e, "Discarding relay message");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(order) = message.to_scheduled() {
                match order.and_then(|o| {
                    self.scheduler.schedule_at(o.clone())?;
                    Ok(o)
                }) {
                    Ok(scheduled) => self.recorded.push(scheduled),
                    Err(e) => {
                        tracing::warn!(error = %e, "Discarding remote order");
                        dropped += 1;
                    }
                }
                continue;
            }

            match message {
                RelayMessage::Quit => {
                    tracing::info!(tick = self.tick, "Peer quit, shutting down");
                    self.quit_requested = true;
                }
                RelayMessage::PlayerNumber { number } => {
                    tracing::info!(number, "Assigned player number");
                    // Disjoint field borrows (same as `set_player_number`),
                    // since `relay` still borrows `self.relay` mutably.
                    self.player_number = Some(number);
                    self.scheduler.set_origin(Some(number));
                }
                RelayMessage::Error { error, source } => {
                    tracing::warn!(%error, %source, "Relay reported an error");
                }
                RelayMessage::IssueOrder(_) | RelayMessage::QueueOrder(_) => {}
            }
        }
        Ok(dropped)
    }

    /// Apply this tick's buckets, internal first; returns how many orders
    /// had no actor.
    fn apply_due_orders(&mut self) -> usize {
        let internal = self.internal.take_due(self.tick);
        let external = self.scheduler.take_due(self.tick);
        let mut dropped = 0;

        for due in [internal, external] {
            for (mode, order) in due
                .issue
                .into_iter()
                .map(|o| (OrderMode::Issue, o))
                .chain(due.queue.into_iter().map(|o| (OrderMode::Queue, o)))
            {
                if let Err(e) = check_in_bounds(&self.bounds, &order) {
                    tracing::warn!(error = %e, tick = self.tick, "Discarding order");
                    dropped += 1;
                    continue;
                }
                let Some(actor) = self.actors.get_mut(order.actor) else {
                    tracing::warn!(actor = order.actor, tick = self.tick, "Order for missing actor");
                    dropped += 1;
                    continue;
                };
                match mode {
                    OrderMode::Issue => actor.issue_command(order),
                    OrderMode::Queue => actor.append_command(order),
                }
            }
        }
        dropped
    }

    fn run_autotargeters(&mut self) {
        for autotargeter in self.autotargeters.values() {
            for order in autotargeter.update(self.tick, &self.actors) {
                self.internal
                    .schedule_delayed(self.tick, OrderMode::Issue, order);
            }
        }
    }

    fn run_actors(&mut self, events: &mut TickEvents) -> Result<()> {
        let mut pending_rects = Vec::new();
        let mut spawns = Vec::new();
        let mut aids = Vec::new();

        for id in self.actors.sorted_ids() {
            if self.actors.get(id).map_or(true, Actor::is_dead) {
                continue;
            }
            self.run_production(id, &mut pending_rects, &mut spawns)?;
            self.run_build_queue(id, &mut pending_rects, &mut spawns)?;

            let target = self
                .actors
                .get(id)
                .and_then(|a| a.current_order.as_ref())
                .and_then(|o| o.target)
                .and_then(|t| self.actors.get(t))
                .map(TargetView::of);

            let Some(actor) = self.actors.get_mut(id) else {
                continue;
            };
            for action in actor.update(target.as_ref()) {
                match action {
                    ActorAction::Fire(bullet) => self.bullets.push(bullet),
                    ActorAction::Aid { target, percent } => aids.push((target, percent)),
                }
            }
        }

        for (target, percent) in aids {
            if let Some(actor) = self.actors.get_mut(target) {
                actor.apply_aid(percent);
            }
        }

        let dead: Vec<ActorId> = self
            .actors
            .iter()
            .filter(|a| a.is_dead())
            .map(|a| a.oid)
            .collect();
        for id in dead {
            self.actors.remove(id);
            tracing::debug!(actor = id, tick = self.tick, "Actor destroyed");
            events.deaths.push(id);
        }

        for spawn in spawns {
            let placement = ActorPlacement {
                actor_type: spawn.actor_type,
                team: spawn.team,
                pos: None,
                completion: None,
                hp: None,
                build_queue: Vec::new(),
                rally_orders: Vec::new(),
                overrides: Map::new(),
            };
            let handle = self.insert_actor(&placement, spawn.pos, Fixed::ZERO, &[spawn.builder])?;
            if let Some(actor) = self.actors.get_mut(handle.id()) {
                for order in spawn.rally {
                    actor.append_command(Order {
                        actor: handle.id(),
                        ..order
                    });
                }
            }
            events.spawned.push(handle.id());
        }
        Ok(())
    }

    /// Carry out a pending `build` order of a complete actor.
    fn run_production(
        &mut self,
        id: ActorId,
        pending_rects: &mut Vec<Rect>,
        spawns: &mut Vec<PendingSpawn>,
    ) -> Result<()> {
        let Some(actor) = self.actors.get(id) else {
            return Ok(());
        };
        let Some(Order {
            command: Command::Build(type_name),
            pos,
            ..
        }) = &actor.current_order
        else {
            return Ok(());
        };
        if !actor.is_complete() {
            return Ok(());
        }

        let type_name = type_name.clone();
        let build_pos = pos.unwrap_or(actor.pos);
        let team = actor.team;
        let rally = actor.rally_orders.clone();

        if !self.game_data.can_build(&actor.actor_type, &type_name) {
            tracing::warn!(
                actor = id,
                builder_type = %actor.actor_type,
                target_type = %type_name,
                "Dropping build order for a type the builder cannot produce"
            );
            self.advance_order(id);
            return Ok(());
        }

        if actor.uses_build_queue {
            if let Some(actor) = self.actors.get_mut(id) {
                actor.build_queue.push_back(type_name);
                actor.next_order();
            }
            return Ok(());
        }

        let rect = Rect::centered(build_pos, self.footprint(&type_name)?);
        match find_placement(&self.actors, rect, &PLACEMENT_RADII, &self.bounds, pending_rects) {
            Some(free) => {
                pending_rects.push(free);
                spawns.push(PendingSpawn {
                    actor_type: type_name,
                    team,
                    pos: free.center(),
                    builder: id,
                    rally,
                });
                self.advance_order(id);
            }
            None => {
                tracing::debug!(actor = id, target_type = %type_name, "No room to build, retrying");
            }
        }
        Ok(())
    }

    /// Spawn the head of a complete actor's build queue if its spot is free.
    fn run_build_queue(
        &mut self,
        id: ActorId,
        pending_rects: &mut Vec<Rect>,
        spawns: &mut Vec<PendingSpawn>,
    ) -> Result<()> {
        let Some(actor) = self.actors.get(id) else {
            return Ok(());
        };
        if !actor.is_complete() {
            return Ok(());
        }
        let Some(head) = actor.build_queue.front() else {
            return Ok(());
        };

        let pos = actor.pos + actor.build_offset;
        let team = actor.team;
        let head = head.clone();
        let rally = actor.rally_orders.clone();
        let rect = Rect::centered(pos, self.footprint(&head)?);
        if collides_with_any(&self.actors, &rect, pending_rects) {
            return Ok(());
        }

        pending_rects.push(rect);
        if let Some(actor) = self.actors.get_mut(id) {
            actor.build_queue.pop_front();
        }
        spawns.push(PendingSpawn {
            actor_type: head,
            team,
            pos,
            builder: id,
            rally,
        });
        Ok(())
    }

    fn advance_order(&mut self, id: ActorId) {
        if let Some(actor) = self.actors.get_mut(id) {
            actor.next_order();
        }
    }

    fn footprint(&self, type_name: &str) -> Result<[Fixed; 2]> {
        let template = self.game_data.actor_type(type_name)?;
        Ok([
            to_fixed(template.size[0], "size")?,
            to_fixed(template.size[1], "size")?,
        ])
    }

    fn run_bullets(&mut self, events: &mut TickEvents) {
        for bullet in &mut self.bullets {
            bullet.update();
        }

        let (spent, flying): (Vec<Bullet>, Vec<Bullet>) =
            self.bullets.drain(..).partition(Bullet::is_spent);
        self.bullets = flying;

        for bullet in spent {
            let (effect, hit) = bullet.explode(&mut self.actors);
            events.hits.extend(hit);
            self.effects.push(effect);
        }
    }

    /// Stop the battle: tell every AI and the relay peer to quit.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        if matches!(self.state, SimState::ShuttingDown | SimState::Stopped) {
            return;
        }
        self.state = SimState::ShuttingDown;
        tracing::info!(tick = self.tick, "Shutting down battle");

        for channel in self.ais.values_mut() {
            channel.quit();
        }
        if let Some(relay) = self.relay.as_mut() {
            if let Err(e) = relay.send(&RelayMessage::Quit) {
                tracing::debug!(error = %e, "Relay peer already gone");
            }
        }
        self.state = SimState::Stopped;
    }

    /// Compute a hash of the simulation state.
    ///
    /// Two battles that processed the same inputs have the same hash. Covers
    /// the tick, every actor in id order, bullets and effects.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.tick.hash(&mut hasher);
        self.actors.len().hash(&mut hasher);
        for actor in self.actors.iter() {
            actor.hash_into(&mut hasher);
        }
        hash_all(&self.bullets, &mut hasher);
        hash_all(&self.effects, &mut hasher);
        hasher.finish()
    }
}

fn placement_pos(data: &ActorPlacement) -> Result<Vec3Fixed> {
    match &data.pos {
        Some(values) => Vec3Fixed::from_wire(values)
            .map(Vec3Fixed::quantized)
            .ok_or_else(|| {
                GameError::Config(format!(
                    "invalid position {values:?} for '{}'",
                    data.actor_type
                ))
            }),
        None => Ok(Vec3Fixed::ZERO),
    }
}

/// Turn an AI's order into a scheduler order, checking it may give it.
fn validate_ai_order(
    actors: &ActorTable,
    bounds: &Rect,
    team: TeamId,
    ai_order: &AiOrder,
) -> Result<Order> {
    let actor = actors
        .get(ai_order.actor)
        .ok_or(GameError::ActorNotFound(ai_order.actor))?;
    if actor.team != team {
        return Err(GameError::protocol(
            format!("AI team {team}"),
            format!("order for actor {} of team {}", actor.oid, actor.team),
        ));
    }
    let order = Order::from_wire(
        ai_order.actor,
        &ai_order.cmd,
        ai_order.pos.as_deref(),
        ai_order.target.as_ref(),
    )?;
    check_in_bounds(bounds, &order)?;
    Ok(order)
}

/// Reject orders whose position lies off the battlefield.
fn check_in_bounds(bounds: &Rect, order: &Order) -> Result<()> {
    match order.pos {
        Some(pos) if !bounds.contains_point(pos) => Err(GameError::OutOfBounds {
            actor: order.actor,
            x: pos.x.to_num(),
            y: pos.y.to_num(),
        }),
        _ => Ok(()),
    }
}

/// The team's own actors plus enemies within `range` of any of them.
fn visible_snapshots(actors: &ActorTable, team: TeamId, range: Fixed) -> Vec<ActorSnapshot> {
    let range_sq = range.saturating_mul(range);
    let own: Vec<&Actor> = actors.iter().filter(|a| a.team == team).collect();
    actors
        .iter()
        .filter(|a| {
            a.team == team
                || own
                    .iter()
                    .any(|o| o.pos.distance_squared(a.pos) <= range_sq)
        })
        .map(ActorSnapshot::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AgentView, AiAgent, ChannelStatus};
    use crate::relay::LoopbackRelay;
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Instant;

    fn game_data() -> GameData {
        GameData::from_value(&json!({
            "abilities": {
                "Cannon": {"damage": 30, "range": 80, "reload": 5, "bullet_speed": 20}
            },
            "actors": {
                "Tank": {"move_speed": 2, "abilities": ["Cannon"], "max_hp": 100},
                "Worker": {"move_speed": 2, "build_list": "basic", "build_rate": 10},
                "Wall": {"type": "building", "size": [40, 40], "max_hp": 200},
                "Factory": {
                    "type": "building",
                    "size": [40, 40],
                    "uses_build_queue": true,
                    "build_list": "factory",
                    "build_offset": [0, 50, 0],
                    "build_rate": 50
                }
            },
            "build_lists": {"basic": ["Wall"], "factory": ["Tank"]}
        }))
        .unwrap()
    }

    fn scenario(actors: Value) -> Scenario {
        Scenario::from_value(&json!({
            "battlefield": {"size": [1000, 1000]},
            "actors": actors
        }))
        .unwrap()
    }

    fn load(actors: Value) -> BattleSim {
        BattleSim::load(
            SimConfig::default(),
            game_data(),
            &scenario(actors),
            &AiRegistry::new(),
            LoadOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_scenario_actors_default_complete() {
        let sim = load(json!([
            {"type": "Tank", "team": 1, "pos": [100, 100]},
            {"type": "Tank", "team": 2, "pos": [900, 900], "hp": 40}
        ]));
        let first = sim.actors().get(0).unwrap();
        assert!(first.is_complete());
        assert_eq!(first.hp, Fixed::from_num(100));
        assert_eq!(sim.actors().get(1).unwrap().hp, Fixed::from_num(40));
        assert_eq!(sim.state(), SimState::Running);
        assert_eq!(sim.teams()[&1].controller, Controller::Autotargeter);
    }

    #[test]
    fn test_place_actor_starts_under_construction() {
        let mut sim = load(json!([{"type": "Worker", "team": 1, "pos": [100, 100]}]));
        let handle = sim
            .place_actor(&ActorPlacement::new("Wall", 1, [200.0, 100.0]), &[0])
            .unwrap();
        let wall = sim.actor(handle).unwrap();
        assert_eq!(wall.completion, Fixed::ZERO);
        assert_eq!(wall.hp, Fixed::from_num(2));
        assert_eq!(sim.scheduler().pending_count(), 0);

        sim.run_until(3).unwrap();
        assert_eq!(
            sim.actors().get(0).unwrap().current_order,
            Some(Order::new(0, Command::Aid, None, Some(handle.id())))
        );
        assert!(sim.recorded_orders().is_empty());
    }

    #[test]
    fn test_place_actor_applies_overrides() {
        let mut sim = load(json!([]));
        let handle = sim
            .place_actor(
                &ActorPlacement::new("Tank", 3, [50.0, 50.0])
                    .with_completion(100.0)
                    .with_override("max_hp", json!(250)),
                &[],
            )
            .unwrap();
        let tank = sim.actor(handle).unwrap();
        assert_eq!(tank.max_hp, Fixed::from_num(250));
        assert_eq!(tank.hp, Fixed::from_num(250));
        assert_eq!(tank.abilities.len(), 1);
        assert_eq!(sim.teams()[&3].controller, Controller::Autotargeter);
    }

    #[test]
    fn test_unknown_type_is_error() {
        let mut sim = load(json!([]));
        assert!(matches!(
            sim.place_actor(&ActorPlacement::new("Dragon", 1, [0.0, 0.0]), &[]),
            Err(GameError::UnknownActorType(name)) if name == "Dragon"
        ));
    }

    #[test]
    fn test_order_applies_after_tick_jump() {
        let mut sim = load(json!([{"type": "Tank", "team": 1, "pos": [100, 100]}]));
        sim.step().unwrap();
        sim.step().unwrap();
        let scheduled = sim.add_order(0_u64, Command::Move, Some(Vec3Fixed::from_ints(200, 100)), None);
        assert_eq!(scheduled.tick, 5);

        sim.run_until(4).unwrap();
        assert!(sim.actors().get(0).unwrap().is_idle());
        sim.step().unwrap();
        assert_eq!(sim.actors().get(0).unwrap().current_order, Some(scheduled.order));
    }

    #[test]
    fn test_worker_builds_wall_and_aids_it() {
        let mut sim = load(json!([{"type": "Worker", "team": 1, "pos": [100, 100]}]));
        sim.add_order(
            0_u64,
            Command::Build("Wall".to_string()),
            Some(Vec3Fixed::from_ints(300, 100)),
            None,
        );

        let mut spawned = Vec::new();
        for _ in 0..3 {
            spawned.extend(sim.step().unwrap().spawned);
        }
        assert_eq!(spawned, vec![1]);
        let wall = sim.actors().get(1).unwrap();
        assert_eq!(wall.pos, Vec3Fixed::from_ints(300, 100));
        assert_eq!(wall.completion, Fixed::ZERO);

        sim.run_until(200).unwrap();
        let wall = sim.actors().get(1).unwrap();
        assert!(wall.is_complete());
        assert_eq!(wall.hp, wall.max_hp);
        assert!(sim.actors().get(0).unwrap().is_idle());
    }

    #[test]
    fn test_build_order_outside_build_list_dropped() {
        let mut sim = load(json!([{"type": "Worker", "team": 1, "pos": [100, 100]}]));
        sim.add_order(0_u64, Command::Build("Tank".to_string()), None, None);
        sim.run_until(5).unwrap();
        assert!(sim.actors().get(0).unwrap().is_idle());
        assert_eq!(sim.actors().len(), 1);
    }

    #[test]
    fn test_build_queue_spawns_at_offset() {
        let mut sim = load(json!([
            {"type": "Factory", "team": 1, "pos": [500, 500], "build_queue": ["Tank"]}
        ]));
        let events = sim.step().unwrap();
        assert_eq!(events.spawned, vec![1]);
        let tank = sim.actors().get(1).unwrap();
        assert_eq!(tank.pos, Vec3Fixed::from_ints(500, 550));
        assert!(sim.actors().get(0).unwrap().build_queue.is_empty());
    }

    #[test]
    fn test_produced_actor_follows_rally_orders() {
        let mut sim = load(json!([{
            "type": "Factory",
            "team": 1,
            "pos": [500, 500],
            "build_queue": ["Tank"],
            "build_offset": [0, 40, 0],
            "rally_orders": [
                {"cmd": "move", "pos": [500, 800]},
                {"cmd": "move", "pos": [900, 800]}
            ]
        }]));
        assert_eq!(sim.step().unwrap().spawned, vec![1]);
        let tank = sim.actors().get(1).unwrap();
        assert_eq!(
            tank.current_order,
            Some(Order::new(1, Command::Move, Some(Vec3Fixed::from_ints(500, 800)), None))
        );
        assert_eq!(tank.order_queue.len(), 1);
        assert_eq!(tank.order_queue[0].actor, 1);

        sim.run_until(20).unwrap();
        let tank = sim.actors().get(1).unwrap();
        assert!(tank.is_complete());
        assert!(tank.pos.y > Fixed::from_num(540));
        assert_eq!(sim.actors().get(0).unwrap().rally_orders[0].actor, 0);
    }

    #[test]
    fn test_rally_point_off_the_battlefield_fails_load() {
        let result = BattleSim::load(
            SimConfig::default(),
            game_data(),
            &scenario(json!([{
                "type": "Factory",
                "team": 1,
                "pos": [500, 500],
                "rally_orders": [{"cmd": "move", "pos": [5000, 800]}]
            }])),
            &AiRegistry::new(),
            LoadOptions::default(),
        );
        assert!(matches!(result, Err(GameError::OutOfBounds { actor: 0, .. })));
    }

    #[test]
    fn test_build_queue_waits_for_free_spot() {
        let mut sim = load(json!([
            {"type": "Factory", "team": 1, "pos": [500, 500], "build_queue": ["Tank"]},
            {"type": "Wall", "team": 1, "pos": [500, 555]}
        ]));
        for _ in 0..5 {
            assert!(sim.step().unwrap().spawned.is_empty());
        }
        assert_eq!(sim.actors().get(0).unwrap().build_queue.len(), 1);
        assert_eq!(sim.actors().len(), 2);
    }

    #[test]
    fn test_tanks_fight_until_one_dies() {
        let mut sim = load(json!([
            {"type": "Tank", "team": 1, "pos": [100, 100]},
            {"type": "Tank", "team": 2, "pos": [150, 100], "hp": 30}
        ]));
        let mut deaths = Vec::new();
        for _ in 0..60 {
            deaths.extend(sim.step().unwrap().deaths);
        }
        assert_eq!(deaths, vec![1]);
        assert!(sim.actors().get(0).is_some());
    }

    #[test]
    fn test_identical_battles_hash_identically() {
        let actors = json!([
            {"type": "Tank", "team": 1, "pos": [100, 100]},
            {"type": "Tank", "team": 1, "pos": [110, 100]},
            {"type": "Tank", "team": 2, "pos": [200, 120]}
        ]);
        let mut a = load(actors.clone());
        let mut b = load(actors);
        for _ in 0..100 {
            a.step().unwrap();
            b.step().unwrap();
            assert_eq!(a.state_hash(), b.state_hash());
        }
    }

    #[test]
    fn test_local_order_arrives_on_peer_for_same_tick() {
        let actors = json!([{"type": "Tank", "team": 1, "pos": [100, 100]}]);
        let mut local = load(actors.clone());
        let mut peer = load(actors);
        let (a, b) = LoopbackRelay::pair();
        local.attach_relay(Box::new(a));
        peer.attach_relay(Box::new(b));

        local.step().unwrap();
        peer.step().unwrap();
        local.step().unwrap();
        peer.step().unwrap();
        let scheduled = local.add_order(0_u64, Command::Move, Some(Vec3Fixed::from_ints(150, 100)), None);
        assert_eq!(scheduled.tick, 5);

        local.step().unwrap();
        peer.step().unwrap();
        assert_eq!(peer.scheduler().pending(5).0, vec![&scheduled.order]);
        assert_eq!(peer.recorded_orders(), &[scheduled]);

        local.run_until(20).unwrap();
        peer.run_until(20).unwrap();
        assert_eq!(local.state_hash(), peer.state_hash());
    }

    #[test]
    fn test_peer_quit_stops_battle() {
        let mut sim = load(json!([]));
        let (relay, mut peer) = LoopbackRelay::pair();
        sim.attach_relay(Box::new(relay));
        peer.send(&RelayMessage::PlayerNumber { number: 1 }).unwrap();
        peer.send(&RelayMessage::Quit).unwrap();

        sim.step().unwrap();
        assert_eq!(sim.player_number(), Some(1));
        assert_eq!(sim.state(), SimState::Stopped);
        assert!(matches!(sim.step(), Err(GameError::InvalidState(_))));
        assert_eq!(peer.try_recv().unwrap().unwrap(), RelayMessage::Quit);
    }

    #[test]
    fn test_garbage_from_relay_is_skipped() {
        let mut sim = load(json!([]));
        let (relay, peer) = LoopbackRelay::pair();
        sim.attach_relay(Box::new(relay));
        peer.raw_sender().send("not json".to_string()).unwrap();
        assert!(sim.step().is_ok());

        drop(peer);
        assert!(matches!(sim.step(), Err(GameError::Relay(_))));
    }

    #[test]
    fn test_remote_order_off_the_battlefield_is_dropped() {
        let mut sim = load(json!([
            {"type": "Tank", "team": 1, "pos": [100, 100]},
            {"type": "Tank", "team": 2, "pos": [900, 900]}
        ]));
        let (relay, peer) = LoopbackRelay::pair();
        sim.attach_relay(Box::new(relay));
        let raw = peer.raw_sender();
        for (actor, pos) in [(0, "[60000, 60000]"), (1, "[-5, 500]"), (1, "[500, 500]")] {
            raw.send(format!(
                r#"{{"action": "issue_order", "actor": {actor}, "cmd": "move", "pos": {pos}, "tick": 3}}"#
            ))
            .unwrap();
        }

        let mut dropped = 0;
        for _ in 0..10 {
            dropped += sim.step().unwrap().dropped_orders;
        }
        assert_eq!(dropped, 2);
        assert!(sim.actors().get(0).unwrap().is_idle());
        assert_eq!(
            sim.actors().get(1).unwrap().current_order.as_ref().and_then(|o| o.pos),
            Some(Vec3Fixed::from_ints(500, 500))
        );
        assert_eq!(sim.state(), SimState::Running);
    }

    #[test]
    fn test_autotargeter_on_huge_battlefield() {
        let scenario = Scenario::from_value(&json!({
            "battlefield": {"size": [120000, 120000]},
            "actors": [
                {"type": "Tank", "team": 1, "pos": [1000, 1000]},
                {"type": "Tank", "team": 2, "pos": [119000, 119000]},
                {"type": "Tank", "team": 2, "pos": [1050, 1000]}
            ]
        }))
        .unwrap();
        let mut sim = BattleSim::load(
            SimConfig::default(),
            game_data(),
            &scenario,
            &AiRegistry::new(),
            LoadOptions::default(),
        )
        .unwrap();

        sim.run_until(20).unwrap();
        let targets: Vec<_> = (0..3)
            .map(|id| {
                sim.actors()
                    .get(id)
                    .and_then(|a| a.current_order.as_ref())
                    .and_then(|o| o.target)
            })
            .collect();
        assert_eq!(targets, vec![Some(2), None, Some(0)]);
    }

    /// Agent that replays a fixed script of raw messages once.
    struct ScriptedAgent {
        script: Vec<Value>,
        exited: mpsc::Sender<()>,
    }

    impl AiAgent for ScriptedAgent {
        fn cycle_interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        fn cycle(&mut self, view: &mut AgentView) -> Vec<AiOrder> {
            if view.team.is_none() {
                return Vec::new();
            }
            self.script
                .drain(..)
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect()
        }
    }

    impl Drop for ScriptedAgent {
        fn drop(&mut self) {
            let _ = self.exited.send(());
        }
    }

    fn scripted_registry(script: Vec<Value>) -> (AiRegistry, mpsc::Receiver<()>) {
        let (exited, exit_rx) = mpsc::channel();
        let mut registry = AiRegistry::new();
        registry
            .register_in_process("scripted", move || {
                Box::new(ScriptedAgent {
                    script: script.clone(),
                    exited: exited.clone(),
                }) as Box<dyn AiAgent>
            })
            .unwrap();
        (registry, exit_rx)
    }

    #[test]
    fn test_load_failure_stops_spawned_ai() {
        let (registry, exited) = scripted_registry(Vec::new());
        let scenario = Scenario::from_value(&json!({
            "battlefield": {"size": [1000, 1000]},
            "ais": {"2": {"type": "scripted"}},
            "actors": [{"type": "Dragon", "team": 2, "pos": [0, 0]}]
        }))
        .unwrap();

        let result = BattleSim::load(
            SimConfig::default(),
            game_data(),
            &scenario,
            &registry,
            LoadOptions::default(),
        );
        assert!(matches!(result, Err(GameError::UnknownActorType(_))));
        assert!(exited.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_ai_orders_validated_and_scheduled() {
        let (registry, _exited) = scripted_registry(vec![
            json!({"cmd": "move", "actor": 1, "pos": [600, 600]}),
            json!({"cmd": "move", "actor": 0, "pos": [10, 10]}),
            json!({"cmd": "dance", "actor": 1}),
            json!({"cmd": "move", "actor": 99, "pos": [0, 0]}),
            json!({"cmd": "move", "actor": 1, "pos": [60000, 60000]}),
        ]);
        let scenario = Scenario::from_value(&json!({
            "battlefield": {"size": [1000, 1000]},
            "ais": {"2": {"type": "scripted"}},
            "actors": [
                {"type": "Wall", "team": 1, "pos": [100, 100]},
                {"type": "Tank", "team": 2, "pos": [500, 500]}
            ]
        }))
        .unwrap();
        let mut sim = BattleSim::load(
            SimConfig::default(),
            game_data(),
            &scenario,
            &registry,
            LoadOptions::default(),
        )
        .unwrap();
        assert_eq!(
            sim.teams()[&2].controller,
            Controller::Ai {
                class: "scripted".to_string()
            }
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while sim.ai_channel(2).map_or(0, AiChannel::violations) < 4 && Instant::now() < deadline {
            sim.step().unwrap();
            std::thread::sleep(Duration::from_millis(2));
        }

        assert_eq!(sim.recorded_orders().len(), 1);
        assert_eq!(sim.recorded_orders()[0].order.actor, 1);
        let channel = sim.ai_channel(2).unwrap();
        assert_eq!(channel.violations(), 4);
        assert_eq!(channel.status(), ChannelStatus::Active);

        sim.shutdown();
        assert_eq!(sim.state(), SimState::Stopped);
    }

    #[test]
    fn test_zero_intervals_in_hand_built_config_do_not_panic() {
        let (registry, _exited) = scripted_registry(Vec::new());
        let scenario = Scenario::from_value(&json!({
            "battlefield": {"size": [1000, 1000]},
            "ais": {"2": {"type": "scripted"}},
            "actors": [{"type": "Tank", "team": 2, "pos": [500, 500]}]
        }))
        .unwrap();
        let config = SimConfig {
            ai_update_interval: 0,
            tick_jump: 0,
            collision_interval: 0,
            ..SimConfig::default()
        };
        let mut sim =
            BattleSim::load(config, game_data(), &scenario, &registry, LoadOptions::default())
                .unwrap();

        sim.run_until(3).unwrap();
        let scheduled = sim.add_order(0_u64, Command::Stop, None, None);
        assert_eq!(scheduled.tick, 4);
        sim.run_until(5).unwrap();
        assert_eq!(sim.tick(), 5);
        sim.shutdown();
    }

    #[test]
    fn test_remote_ai_team_gets_no_agent() {
        let (registry, _exited) = scripted_registry(Vec::new());
        let scenario = Scenario::from_value(&json!({
            "battlefield": {"size": [1000, 1000]},
            "ais": {"2": {"type": "scripted"}}
        }))
        .unwrap();
        let sim = BattleSim::load(
            SimConfig::default(),
            game_data(),
            &scenario,
            &registry,
            LoadOptions { host_ais: false },
        )
        .unwrap();
        assert_eq!(sim.teams()[&2].controller, Controller::Remote);
        assert!(sim.ai_channel(2).is_none());
    }

    #[test]
    fn test_filtered_visibility() {
        let actors = {
            let mut sim = load(json!([
                {"type": "Tank", "team": 1, "pos": [100, 100]},
                {"type": "Tank", "team": 2, "pos": [300, 100]},
                {"type": "Tank", "team": 2, "pos": [900, 900]}
            ]));
            sim.step().unwrap();
            sim.actors
        };
        let seen: Vec<ActorId> = visible_snapshots(&actors, 1, Fixed::from_num(300))
            .iter()
            .map(|s| s.oid)
            .collect();
        assert_eq!(seen, vec![0, 1]);
    }
}
