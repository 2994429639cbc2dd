//! Actors and the actor table.
//!
//! An actor is any unit or structure on the battlefield. Actors are owned by
//! the [`ActorTable`]; everything outside the simulation refers to them by
//! [`ActorId`] or [`ActorHandle`] and re-resolves through the table.
//!
//! # Update rules
//!
//! Each tick an actor runs its current order:
//! - actors under construction (completion below 100) do nothing
//! - `move` steers toward the order position and completes on arrival
//! - `attack` chases the target until inside the longest weapon range, then
//!   fires every ready weapon
//! - `aid` closes to aid range and adds `build_rate` percent completion per tick
//! - `build` waits for the production pass in the simulation

use std::collections::{BTreeMap, VecDeque};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::data::{AbilityKind, AbilityType, ActorClass, ActorType, GameData};
use crate::error::{GameError, Result};
use crate::math::{Fixed, Rect, Vec3Fixed};
use crate::orders::{Command, Order};
use crate::projectiles::Bullet;

/// Unique actor identifier, assigned in ascending order and never reused.
pub type ActorId = u64;

/// Team identifier.
pub type TeamId = u32;

/// Completion percentage of a finished actor.
pub const FULL_COMPLETION: i32 = 100;

/// Slack added to the combined half-extents when checking aid range.
pub const AID_MARGIN: i32 = 16;

/// Non-owning reference to an actor, returned by placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorHandle(ActorId);

impl ActorHandle {
    /// Wrap an actor id.
    #[must_use]
    pub const fn new(id: ActorId) -> Self {
        Self(id)
    }

    /// The referenced actor's id.
    #[must_use]
    pub const fn id(self) -> ActorId {
        self.0
    }
}

/// Convert a template value to fixed point.
pub(crate) fn to_fixed(value: f64, what: &str) -> Result<Fixed> {
    Fixed::checked_from_num(value)
        .ok_or_else(|| GameError::Config(format!("{what} value {value} is out of range")))
}

/// An ability instance attached to an actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ability {
    /// Ability type name.
    pub name: String,
    /// Ability category.
    pub kind: AbilityKind,
    /// Current aim as `[xy, z]` degrees.
    pub facing: [Fixed; 2],
    /// Ticks until the ability can fire again.
    pub cooldown: u32,
    /// Damage per bullet.
    pub damage: Fixed,
    /// Maximum firing distance.
    pub range: Fixed,
    /// Ticks between shots.
    pub reload: u32,
    /// Bullet distance per tick.
    pub bullet_speed: Fixed,
    /// Damage radius around the impact point.
    pub blast_radius: Fixed,
    /// Ticks the explosion effect lives.
    pub effect_lifetime: u32,
}

impl Ability {
    /// Instantiate an ability type with the owner's facing.
    pub fn from_type(template: &AbilityType, facing: [Fixed; 2]) -> Result<Self> {
        let what = |field: &str| format!("ability '{}' {field}", template.name);
        Ok(Self {
            name: template.name.clone(),
            kind: template.kind,
            facing,
            cooldown: 0,
            damage: to_fixed(template.damage, &what("damage"))?,
            range: to_fixed(template.range, &what("range"))?,
            reload: template.reload,
            bullet_speed: to_fixed(template.bullet_speed, &what("bullet_speed"))?,
            blast_radius: to_fixed(template.blast_radius, &what("blast_radius"))?,
            effect_lifetime: template.effect_lifetime,
        })
    }

    /// Whether this ability fires bullets.
    #[must_use]
    pub fn is_weapon(&self) -> bool {
        self.kind == AbilityKind::Weapon
    }
}

/// A unit or structure on the battlefield.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    /// Unique id, assigned by the actor table.
    pub oid: ActorId,
    /// Template name.
    pub actor_type: String,
    /// Behavioural class.
    pub class: ActorClass,
    /// Owning team.
    pub team: TeamId,
    /// Centre position.
    pub pos: Vec3Fixed,
    /// Movement applied this tick.
    pub velocity: Vec3Fixed,
    /// Heading as `[xy, z]` degrees.
    pub facing: [Fixed; 2],
    /// Current hit points.
    pub hp: Fixed,
    /// Maximum hit points.
    pub max_hp: Fixed,
    /// Construction progress, 0 to 100.
    pub completion: Fixed,
    /// Footprint `[width, height]`.
    pub size: [Fixed; 2],
    /// Bounding rectangle centred on `pos`.
    pub rect: Rect,
    /// Distance moved per tick.
    pub move_speed: Fixed,
    /// Completion percentage added per tick of aid.
    pub build_rate: Fixed,
    /// Spawn offset for queued production.
    pub build_offset: Vec3Fixed,
    /// Whether build orders go through the build queue.
    pub uses_build_queue: bool,
    /// Attached abilities.
    pub abilities: Vec<Ability>,
    /// Pending production, head first.
    pub build_queue: VecDeque<String>,
    /// Order being executed.
    pub current_order: Option<Order>,
    /// Orders waiting behind the current one.
    pub order_queue: VecDeque<Order>,
    /// Starting orders for actors this one produces, addressed to itself
    /// until handed over.
    pub rally_orders: Vec<Order>,
    /// UI selection flag; not part of simulation state.
    pub selected: bool,
}

impl Actor {
    /// Build an actor from a resolved template.
    ///
    /// The id is a placeholder until the actor is inserted into a table.
    /// Hit points start at the maximum and completion at 100; placement
    /// adjusts both.
    pub fn from_template(
        template: &ActorType,
        data: &GameData,
        team: TeamId,
        pos: Vec3Fixed,
    ) -> Result<Self> {
        let what = |field: &str| format!("actor '{}' {field}", template.name);
        let size = [
            to_fixed(template.size[0], &what("size"))?,
            to_fixed(template.size[1], &what("size"))?,
        ];
        let max_hp = to_fixed(template.max_hp, &what("max_hp"))?;
        let facing = [Fixed::ZERO; 2];

        let abilities = template
            .abilities
            .iter()
            .map(|name| Ability::from_type(data.ability_type(name)?, facing))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            oid: 0,
            actor_type: template.name.clone(),
            class: template.class,
            team,
            pos,
            velocity: Vec3Fixed::ZERO,
            facing,
            hp: max_hp,
            max_hp,
            completion: Fixed::from_num(FULL_COMPLETION),
            size,
            rect: Rect::centered(pos, size),
            move_speed: to_fixed(template.move_speed, &what("move_speed"))?,
            build_rate: to_fixed(template.build_rate, &what("build_rate"))?,
            build_offset: Vec3Fixed::from_wire(&template.build_offset).ok_or_else(|| {
                GameError::Config(format!("{} is out of range", what("build_offset")))
            })?,
            uses_build_queue: template.uses_build_queue,
            abilities,
            build_queue: VecDeque::new(),
            current_order: None,
            order_queue: VecDeque::new(),
            rally_orders: Vec::new(),
            selected: false,
        })
    }

    /// Whether construction has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completion >= Fixed::from_num(FULL_COMPLETION)
    }

    /// Whether the actor should be removed.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.hp <= Fixed::ZERO
    }

    /// Whether the actor has no current order.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.current_order.is_none()
    }

    /// Whether the actor carries at least one weapon.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.abilities.iter().any(Ability::is_weapon)
    }

    /// Longest range among the actor's weapons.
    #[must_use]
    pub fn weapon_range(&self) -> Option<Fixed> {
        self.abilities
            .iter()
            .filter(|a| a.is_weapon())
            .map(|a| a.range)
            .max()
    }

    /// Half of the larger footprint dimension.
    #[must_use]
    pub fn half_extent(&self) -> Fixed {
        self.size[0].max(self.size[1]) / 2
    }

    /// Recompute the bounding rectangle from the position.
    pub fn refresh_rect(&mut self) {
        self.rect = Rect::centered(self.pos, self.size);
    }

    /// Move to `pos` and refresh the rectangle.
    pub fn set_position(&mut self, pos: Vec3Fixed) {
        self.pos = pos;
        self.refresh_rect();
    }

    /// Replace the current order and drop everything queued.
    pub fn issue_command(&mut self, order: Order) {
        self.current_order = Some(order);
        self.order_queue.clear();
    }

    /// Queue an order; it becomes current at once if the actor is idle.
    pub fn append_command(&mut self, order: Order) {
        if self.current_order.is_none() {
            self.current_order = Some(order);
        } else {
            self.order_queue.push_back(order);
        }
    }

    /// Finish the current order and start the next queued one.
    pub fn next_order(&mut self) {
        self.current_order = self.order_queue.pop_front();
    }

    /// Add construction progress and the matching share of hit points.
    pub fn apply_aid(&mut self, percent: Fixed) {
        let full = Fixed::from_num(FULL_COMPLETION);
        if self.completion < full {
            self.completion = (self.completion + percent).min(full);
        }
        let heal = self.max_hp.saturating_mul(percent) / full;
        self.hp = (self.hp + heal).min(self.max_hp);
    }

    /// Subtract hit points.
    pub fn take_damage(&mut self, amount: Fixed) {
        self.hp = self.hp.saturating_sub(amount);
    }

    /// Run one tick of the current order.
    ///
    /// `target` describes the order's target actor as it was at the start of
    /// this actor's update, or `None` if there is no target or it is gone.
    pub fn update(&mut self, target: Option<&TargetView>) -> Vec<ActorAction> {
        let mut actions = Vec::new();
        self.velocity = Vec3Fixed::ZERO;

        for ability in &mut self.abilities {
            ability.cooldown = ability.cooldown.saturating_sub(1);
        }

        if !self.is_complete() {
            return actions;
        }

        let Some(order) = self.current_order.clone() else {
            return actions;
        };

        match order.command {
            Command::Stop => self.next_order(),
            Command::Move => match order.pos {
                Some(dest) => {
                    if self.steer_towards(dest) {
                        self.next_order();
                    }
                }
                None => self.next_order(),
            },
            Command::Attack => self.run_attack(target, &mut actions),
            Command::Aid => self.run_aid(target, &mut actions),
            Command::Build(_) => {}
        }

        if self.velocity != Vec3Fixed::ZERO {
            self.pos += self.velocity;
            self.refresh_rect();
        }
        actions
    }

    /// Set velocity toward `dest`; returns whether this step arrives.
    fn steer_towards(&mut self, dest: Vec3Fixed) -> bool {
        if !self.class.is_mobile() || self.move_speed <= Fixed::ZERO {
            return self.pos == dest;
        }
        let distance = self.pos.distance(dest);
        if distance <= self.move_speed {
            self.velocity = dest - self.pos;
            if self.velocity != Vec3Fixed::ZERO {
                self.facing = self.velocity.angle();
            }
            return true;
        }
        self.velocity = self.pos.move_towards(dest, self.move_speed) - self.pos;
        self.facing = self.velocity.angle();
        false
    }

    fn run_attack(&mut self, target: Option<&TargetView>, actions: &mut Vec<ActorAction>) {
        let (Some(target), Some(range)) = (target, self.weapon_range()) else {
            self.next_order();
            return;
        };
        if target.team == self.team {
            self.next_order();
            return;
        }

        let distance = self.pos.distance(target.pos);
        if distance > range {
            self.steer_towards(target.pos);
            return;
        }

        self.facing = self.pos.angle_to(target.pos);
        for ability in &mut self.abilities {
            ability.facing = self.facing;
            if ability.is_weapon() && ability.cooldown == 0 && distance <= ability.range {
                actions.push(ActorAction::Fire(Bullet::fire(
                    self.oid,
                    self.team,
                    self.pos,
                    target.pos,
                    ability,
                )));
                ability.cooldown = ability.reload;
            }
        }
    }

    fn run_aid(&mut self, target: Option<&TargetView>, actions: &mut Vec<ActorAction>) {
        let Some(target) = target else {
            self.next_order();
            return;
        };
        if target.id == self.oid || (target.complete && target.hp_full) {
            self.next_order();
            return;
        }

        let reach = self.half_extent() + target.half_extent + Fixed::from_num(AID_MARGIN);
        if self.pos.distance(target.pos) <= reach {
            actions.push(ActorAction::Aid {
                target: target.id,
                percent: self.build_rate,
            });
        } else if self.class.is_mobile() {
            self.steer_towards(target.pos);
        } else {
            tracing::debug!(
                actor = self.oid,
                target = target.id,
                "Aid target out of reach of immobile actor"
            );
            self.next_order();
        }
    }

    /// Feed every simulation-relevant field into `state`.
    pub fn hash_into<H: Hasher>(&self, state: &mut H) {
        self.oid.hash(state);
        self.actor_type.hash(state);
        self.team.hash(state);
        self.pos.hash(state);
        self.velocity.hash(state);
        self.facing.hash(state);
        self.hp.hash(state);
        self.completion.hash(state);
        for ability in &self.abilities {
            ability.cooldown.hash(state);
            ability.facing.hash(state);
        }
        self.build_queue.hash(state);
        self.current_order.hash(state);
        self.order_queue.hash(state);
        self.rally_orders.hash(state);
    }

    /// This actor's rally orders readdressed to `produced`.
    #[must_use]
    pub fn rally_for(&self, produced: ActorId) -> Vec<Order> {
        self.rally_orders
            .iter()
            .map(|order| Order {
                actor: produced,
                ..order.clone()
            })
            .collect()
    }
}

/// What an actor's order target looked like when the actor updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetView {
    /// Target id.
    pub id: ActorId,
    /// Target team.
    pub team: TeamId,
    /// Target position.
    pub pos: Vec3Fixed,
    /// Half of the target's larger footprint dimension.
    pub half_extent: Fixed,
    /// Whether the target has finished construction.
    pub complete: bool,
    /// Whether the target is at full hit points.
    pub hp_full: bool,
}

impl TargetView {
    /// Capture the parts of `actor` that other actors react to.
    #[must_use]
    pub fn of(actor: &Actor) -> Self {
        Self {
            id: actor.oid,
            team: actor.team,
            pos: actor.pos,
            half_extent: actor.half_extent(),
            complete: actor.is_complete(),
            hp_full: actor.hp >= actor.max_hp,
        }
    }
}

/// Side effects of an actor update, applied by the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorAction {
    /// A weapon fired.
    Fire(Bullet),
    /// Construction or repair progress for another actor.
    Aid {
        /// Actor receiving the aid.
        target: ActorId,
        /// Completion percentage added.
        percent: Fixed,
    },
}

/// The single id-to-actor map of a simulation.
///
/// Backed by a `BTreeMap`, so iteration is always in ascending id order.
#[derive(Debug, Clone, Default)]
pub struct ActorTable {
    actors: BTreeMap<ActorId, Actor>,
    next_id: ActorId,
}

impl ActorTable {
    /// Create an empty table; the first actor gets id 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an actor under a fresh id.
    pub fn insert(&mut self, mut actor: Actor) -> ActorHandle {
        let id = self.next_id;
        self.next_id += 1;
        actor.oid = id;
        self.actors.insert(id, actor);
        ActorHandle::new(id)
    }

    /// Remove an actor by id.
    pub fn remove(&mut self, id: ActorId) -> Option<Actor> {
        self.actors.remove(&id)
    }

    /// Get an actor by id.
    #[must_use]
    pub fn get(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    /// Get a mutable actor by id.
    pub fn get_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.actors.get_mut(&id)
    }

    /// Whether an actor with this id exists.
    #[must_use]
    pub fn contains(&self, id: ActorId) -> bool {
        self.actors.contains_key(&id)
    }

    /// Number of actors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actors.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Id the next inserted actor will receive.
    #[must_use]
    pub const fn next_id(&self) -> ActorId {
        self.next_id
    }

    /// All ids in ascending order.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<ActorId> {
        self.actors.keys().copied().collect()
    }

    /// Iterate over actors in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    /// Iterate mutably over actors in ascending id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Actor> {
        self.actors.values_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tank() -> Actor {
        let data = GameData::from_value(&serde_json::json!({
            "abilities": {"Gun": {"damage": 10, "range": 50, "reload": 5, "bullet_speed": 25}},
            "actors": {"Tank": {"max_hp": 100, "move_speed": 4, "abilities": ["Gun"]}}
        }))
        .unwrap();
        Actor::from_template(data.actor_type("Tank").unwrap(), &data, 1, Vec3Fixed::ZERO).unwrap()
    }

    fn f(n: i32) -> Fixed {
        Fixed::from_num(n)
    }

    #[test]
    fn test_ids_start_at_zero_and_are_never_reused() {
        let mut table = ActorTable::new();
        let a = table.insert(tank());
        let b = table.insert(tank());
        assert_eq!((a.id(), b.id()), (0, 1));
        table.remove(b.id());
        let c = table.insert(tank());
        assert_eq!(c.id(), 2);
        assert_eq!(table.sorted_ids(), vec![0, 2]);
    }

    #[test]
    fn test_issue_replaces_and_append_queues() {
        let mut actor = tank();
        actor.append_command(Order::new(0, Command::Move, Some(Vec3Fixed::from_ints(9, 9)), None));
        actor.append_command(Order::new(0, Command::Stop, None, None));
        assert_eq!(actor.order_queue.len(), 1);

        actor.issue_command(Order::new(0, Command::Stop, None, None));
        assert_eq!(actor.current_order.as_ref().map(|o| &o.command), Some(&Command::Stop));
        assert!(actor.order_queue.is_empty());
    }

    #[test]
    fn test_move_arrives_and_completes() {
        let mut actor = tank();
        let dest = Vec3Fixed::from_ints(10, 0);
        actor.issue_command(Order::new(0, Command::Move, Some(dest), None));

        for _ in 0..3 {
            actor.update(None);
        }
        assert_eq!(actor.pos, dest);
        assert!(actor.is_idle());
        assert_eq!(actor.rect.center(), dest);
    }

    #[test]
    fn test_incomplete_actor_does_nothing() {
        let mut actor = tank();
        actor.completion = f(50);
        actor.issue_command(Order::new(0, Command::Move, Some(Vec3Fixed::from_ints(10, 0)), None));
        actor.update(None);
        assert_eq!(actor.pos, Vec3Fixed::ZERO);
    }

    #[test]
    fn test_attack_fires_on_reload_cadence() {
        let mut actor = tank();
        let enemy = TargetView {
            id: 5,
            team: 2,
            pos: Vec3Fixed::from_ints(0, -30),
            half_extent: f(10),
            complete: true,
            hp_full: true,
        };
        actor.issue_command(Order::new(0, Command::Attack, None, Some(5)));

        let shots: usize = (0..10)
            .map(|_| {
                actor
                    .update(Some(&enemy))
                    .iter()
                    .filter(|a| matches!(a, ActorAction::Fire(_)))
                    .count()
            })
            .sum();
        assert_eq!(shots, 2);
        assert_eq!(actor.facing[0], f(0));
    }

    #[test]
    fn test_attack_on_vanished_target_completes() {
        let mut actor = tank();
        actor.issue_command(Order::new(0, Command::Attack, None, Some(5)));
        actor.update(None);
        assert!(actor.is_idle());
    }

    #[test]
    fn test_aid_raises_completion_and_hp() {
        let mut actor = tank();
        actor.completion = f(10);
        actor.hp = f(10);
        actor.apply_aid(f(5));
        assert_eq!(actor.completion, f(15));
        assert_eq!(actor.hp, f(15));

        actor.apply_aid(f(200));
        assert_eq!(actor.completion, f(100));
        assert_eq!(actor.hp, f(100));
    }
}
