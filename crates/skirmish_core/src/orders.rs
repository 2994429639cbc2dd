//! Orders and the tick-keyed order scheduler.
//!
//! Every order is delayed by `tick_jump` ticks before it applies. The delay
//! gives remote peers and AI agents time to receive the order, so all peers
//! apply it on the same tick. Orders live in two buckets per tick: the
//! *issue* bucket replaces an actor's current order and clears its queue, the
//! *queue* bucket appends to it.
//!
//! Each scheduled order remembers the player it came from. When a bucket is
//! taken its orders are grouped by actor, then by origin, keeping arrival
//! order within each group. Orders from one sender always arrive in the
//! order they were sent, so every peer applies a bucket in the same order
//! however the network interleaved the senders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::actors::{Actor, ActorHandle, ActorId};
use crate::error::{GameError, Result};
use crate::math::Vec3Fixed;

/// Default order delay in ticks.
pub const DEFAULT_TICK_JUMP: u64 = 3;

/// Something that identifies an actor.
///
/// Callers may hold an id, a handle or a borrowed actor; the scheduler
/// reduces all of them to an id once, at the point an order is created.
#[derive(Debug, Clone, Copy)]
pub enum ActorRef<'a> {
    /// A bare actor id.
    Id(ActorId),
    /// A borrowed actor.
    Actor(&'a Actor),
    /// A handle returned by placement.
    Handle(ActorHandle),
}

impl ActorRef<'_> {
    /// The referenced actor's id.
    #[must_use]
    pub fn id(&self) -> ActorId {
        match self {
            Self::Id(id) => *id,
            Self::Actor(actor) => actor.oid,
            Self::Handle(handle) => handle.id(),
        }
    }
}

impl From<ActorId> for ActorRef<'_> {
    fn from(id: ActorId) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a Actor> for ActorRef<'a> {
    fn from(actor: &'a Actor) -> Self {
        Self::Actor(actor)
    }
}

impl From<ActorHandle> for ActorRef<'_> {
    fn from(handle: ActorHandle) -> Self {
        Self::Handle(handle)
    }
}

/// What an actor is told to do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Stop moving and drop the current order.
    Stop,
    /// Move to the order position.
    Move,
    /// Attack the target actor.
    Attack,
    /// Help construct or repair the target actor.
    Aid,
    /// Produce an actor of the named type.
    Build(String),
}

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Move => "move",
            Self::Attack => "attack",
            Self::Aid => "aid",
            Self::Build(_) => "build",
        }
    }
}

/// The `target` field of a wire order.
///
/// Build orders carry the produced type name in `target`; every other
/// command carries an actor id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderTarget {
    /// Target actor id.
    Actor(ActorId),
    /// Type name for build orders.
    TypeName(String),
}

/// A command addressed to one actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Order {
    /// Actor receiving the order.
    pub actor: ActorId,
    /// What to do.
    pub command: Command,
    /// Optional destination, quantized to the wire representation.
    pub pos: Option<Vec3Fixed>,
    /// Optional target actor.
    pub target: Option<ActorId>,
}

impl Order {
    /// Create an order, quantizing the position.
    #[must_use]
    pub fn new(
        actor: ActorId,
        command: Command,
        pos: Option<Vec3Fixed>,
        target: Option<ActorId>,
    ) -> Self {
        Self {
            actor,
            command,
            pos: pos.map(Vec3Fixed::quantized),
            target,
        }
    }

    /// Build an order from its wire fields.
    ///
    /// Fails with [`GameError::UnknownCommand`] for command strings no actor
    /// understands and with a protocol error for malformed fields.
    pub fn from_wire(
        actor: ActorId,
        cmd: &str,
        pos: Option<&[f64]>,
        target: Option<&OrderTarget>,
    ) -> Result<Self> {
        let pos = match pos {
            Some(values) => Some(Vec3Fixed::from_wire(values).ok_or_else(|| {
                GameError::protocol("order", format!("invalid position {values:?}"))
            })?),
            None => None,
        };

        let (command, target) = match (cmd, target) {
            ("build", Some(OrderTarget::TypeName(name))) => (Command::Build(name.clone()), None),
            ("build", _) => {
                return Err(GameError::protocol(
                    "order",
                    "build order without a type name target",
                ))
            }
            (_, Some(OrderTarget::TypeName(name))) => {
                return Err(GameError::protocol(
                    "order",
                    format!("'{cmd}' order with non-actor target '{name}'"),
                ))
            }
            ("stop", t) => (Command::Stop, actor_target(t)),
            ("move", t) => (Command::Move, actor_target(t)),
            ("attack", t) => (Command::Attack, actor_target(t)),
            ("aid", t) => (Command::Aid, actor_target(t)),
            (other, _) => return Err(GameError::UnknownCommand(other.to_string())),
        };

        Ok(Self::new(actor, command, pos, target))
    }

    /// The wire `target` field for this order.
    #[must_use]
    pub fn wire_target(&self) -> Option<OrderTarget> {
        match &self.command {
            Command::Build(name) => Some(OrderTarget::TypeName(name.clone())),
            _ => self.target.map(OrderTarget::Actor),
        }
    }
}

fn actor_target(target: Option<&OrderTarget>) -> Option<ActorId> {
    match target {
        Some(OrderTarget::Actor(id)) => Some(*id),
        _ => None,
    }
}

/// Which bucket an order goes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderMode {
    /// Replace the current order and clear the queue.
    Issue,
    /// Append to the order queue.
    Queue,
}

/// An order together with the tick and bucket it was scheduled into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduledOrder {
    /// Absolute tick the order applies on.
    pub tick: u64,
    /// Bucket.
    pub mode: OrderMode,
    /// The order itself.
    pub order: Order,
    /// Player number of the peer that issued the order, if it had one.
    #[serde(default)]
    pub origin: Option<u32>,
}

/// Orders that apply on one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueOrders {
    /// Replacement orders, in application order.
    pub issue: Vec<Order>,
    /// Queued orders, in application order.
    pub queue: Vec<Order>,
}

impl DueOrders {
    /// Whether nothing applies this tick.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issue.is_empty() && self.queue.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Slot {
    origin: Option<u32>,
    order: Order,
}

/// Tick-keyed delayed-order buffers.
#[derive(Debug, Clone)]
pub struct OrderScheduler {
    tick_jump: u64,
    /// Origin stamped on orders scheduled with a delay.
    origin: Option<u32>,
    issue: BTreeMap<u64, Vec<Slot>>,
    queue: BTreeMap<u64, Vec<Slot>>,
    /// Highest tick whose buckets have been taken.
    consumed_through: u64,
}

impl Default for OrderScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_JUMP)
    }
}

impl OrderScheduler {
    /// Create a scheduler delaying orders by `tick_jump` ticks.
    #[must_use]
    pub fn new(tick_jump: u64) -> Self {
        Self {
            tick_jump,
            origin: None,
            issue: BTreeMap::new(),
            queue: BTreeMap::new(),
            consumed_through: 0,
        }
    }

    /// Order delay in ticks.
    #[must_use]
    pub const fn tick_jump(&self) -> u64 {
        self.tick_jump
    }

    /// Stamp later delayed orders as coming from player `origin`.
    pub fn set_origin(&mut self, origin: Option<u32>) {
        self.origin = origin;
    }

    /// Origin stamped on delayed orders.
    #[must_use]
    pub const fn origin(&self) -> Option<u32> {
        self.origin
    }

    /// Schedule a replacement order during `current_tick`.
    ///
    /// The returned record carries the tick the order applies on.
    pub fn add_order<'a>(
        &mut self,
        current_tick: u64,
        actor: impl Into<ActorRef<'a>>,
        command: Command,
        pos: Option<Vec3Fixed>,
        target: Option<ActorRef<'a>>,
    ) -> ScheduledOrder {
        let order = Order::new(actor.into().id(), command, pos, target.map(|t| t.id()));
        self.schedule_delayed(current_tick, OrderMode::Issue, order)
    }

    /// Schedule a queued order during `current_tick`.
    ///
    /// The returned record carries the tick the order applies on.
    pub fn queue_order<'a>(
        &mut self,
        current_tick: u64,
        actor: impl Into<ActorRef<'a>>,
        command: Command,
        pos: Option<Vec3Fixed>,
        target: Option<ActorRef<'a>>,
    ) -> ScheduledOrder {
        let order = Order::new(actor.into().id(), command, pos, target.map(|t| t.id()));
        self.schedule_delayed(current_tick, OrderMode::Queue, order)
    }

    /// Schedule an already built order `tick_jump` ticks after `current_tick`.
    pub fn schedule_delayed(
        &mut self,
        current_tick: u64,
        mode: OrderMode,
        order: Order,
    ) -> ScheduledOrder {
        let scheduled = ScheduledOrder {
            tick: current_tick + self.tick_jump,
            mode,
            order,
            origin: self.origin,
        };
        self.push(scheduled.clone());
        scheduled
    }

    /// Schedule a replacement order for an absolute tick.
    pub fn schedule_issue_at(&mut self, tick: u64, order: Order) -> Result<()> {
        self.schedule_at(ScheduledOrder {
            tick,
            mode: OrderMode::Issue,
            order,
            origin: self.origin,
        })
    }

    /// Schedule a queued order for an absolute tick.
    pub fn schedule_queue_at(&mut self, tick: u64, order: Order) -> Result<()> {
        self.schedule_at(ScheduledOrder {
            tick,
            mode: OrderMode::Queue,
            order,
            origin: self.origin,
        })
    }

    /// Schedule an order for the absolute tick it carries.
    ///
    /// Orders for ticks that have already been taken are rejected with
    /// [`GameError::LateOrder`].
    pub fn schedule_at(&mut self, scheduled: ScheduledOrder) -> Result<()> {
        if scheduled.tick <= self.consumed_through {
            tracing::error!(
                order_tick = scheduled.tick,
                current_tick = self.consumed_through,
                actor = scheduled.order.actor,
                "Lockstep violation: order arrived after its tick"
            );
            return Err(GameError::LateOrder {
                order_tick: scheduled.tick,
                current_tick: self.consumed_through,
            });
        }
        self.push(scheduled);
        Ok(())
    }

    /// Remove and return both buckets for `tick`.
    ///
    /// Missing buckets yield empty lists. Each bucket comes back grouped by
    /// actor id, then by origin, with arrival order kept inside a group.
    pub fn take_due(&mut self, tick: u64) -> DueOrders {
        self.consumed_through = self.consumed_through.max(tick);
        DueOrders {
            issue: canonical(self.issue.remove(&tick).unwrap_or_default()),
            queue: canonical(self.queue.remove(&tick).unwrap_or_default()),
        }
    }

    /// Orders waiting for `tick` in arrival order, as `(issue, queue)`.
    #[must_use]
    pub fn pending(&self, tick: u64) -> (Vec<&Order>, Vec<&Order>) {
        (waiting(&self.issue, tick), waiting(&self.queue, tick))
    }

    /// Total number of orders waiting in any bucket.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.issue.values().chain(self.queue.values()).map(Vec::len).sum()
    }

    fn push(&mut self, scheduled: ScheduledOrder) {
        let bucket = match scheduled.mode {
            OrderMode::Issue => &mut self.issue,
            OrderMode::Queue => &mut self.queue,
        };
        bucket.entry(scheduled.tick).or_default().push(Slot {
            origin: scheduled.origin,
            order: scheduled.order,
        });
    }
}

fn waiting(bucket: &BTreeMap<u64, Vec<Slot>>, tick: u64) -> Vec<&Order> {
    bucket
        .get(&tick)
        .map(|slots| slots.iter().map(|s| &s.order).collect())
        .unwrap_or_default()
}

fn canonical(mut slots: Vec<Slot>) -> Vec<Order> {
    slots.sort_by_key(|slot| (slot.order.actor, slot.origin));
    slots.into_iter().map(|slot| slot.order).collect()
}
