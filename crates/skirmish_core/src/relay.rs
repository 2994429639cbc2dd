//! Order exchange between lockstep peers.
//!
//! A relay delivers application messages reliably and in order between the
//! peers of a match. Each message is one JSON object tagged by `action`.
//! Orders carry the absolute tick they apply on, so every peer schedules them
//! into the same bucket regardless of network delay (as long as the delay is
//! shorter than `tick_jump` ticks).

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use serde::{Deserialize, Serialize};

use crate::actors::ActorId;
use crate::error::{GameError, Result};
use crate::orders::{Order, OrderMode, OrderTarget, ScheduledOrder};

/// Order fields as they travel between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireOrder {
    /// Actor the order is for.
    pub actor: ActorId,
    /// Command name.
    pub cmd: String,
    /// Destination `[x, y, z]`.
    #[serde(default)]
    pub pos: Option<Vec<f64>>,
    /// Target actor id, or type name for `build`.
    #[serde(default)]
    pub target: Option<OrderTarget>,
    /// Absolute tick the order applies on.
    pub tick: u64,
    /// Player number of the issuing peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<u32>,
}

impl WireOrder {
    /// Decode into a scheduler order.
    pub fn to_order(&self) -> Result<Order> {
        Order::from_wire(self.actor, &self.cmd, self.pos.as_deref(), self.target.as_ref())
    }
}

/// One relay message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Replace the actor's current order at `tick`.
    IssueOrder(WireOrder),
    /// Queue an order for the actor at `tick`.
    QueueOrder(WireOrder),
    /// The sending peer is leaving; the match ends.
    Quit,
    /// The hub's assignment of this peer's player number.
    PlayerNumber {
        /// Zero-based player number.
        number: u32,
    },
    /// The hub could not handle a message.
    Error {
        /// What went wrong.
        error: String,
        /// Which message or component caused it.
        source: String,
    },
}

impl RelayMessage {
    /// Wire form of a scheduled order.
    #[must_use]
    pub fn from_scheduled(scheduled: &ScheduledOrder) -> Self {
        let order = &scheduled.order;
        let wire = WireOrder {
            actor: order.actor,
            cmd: order.command.name().to_string(),
            pos: order.pos.map(|p| p.to_wire()),
            target: order.wire_target(),
            tick: scheduled.tick,
            origin: scheduled.origin,
        };
        match scheduled.mode {
            OrderMode::Issue => Self::IssueOrder(wire),
            OrderMode::Queue => Self::QueueOrder(wire),
        }
    }

    /// The scheduled order this message carries, if it is an order.
    pub fn to_scheduled(&self) -> Option<Result<ScheduledOrder>> {
        let (mode, wire) = match self {
            Self::IssueOrder(wire) => (OrderMode::Issue, wire),
            Self::QueueOrder(wire) => (OrderMode::Queue, wire),
            _ => return None,
        };
        Some(wire.to_order().map(|order| ScheduledOrder {
            tick: wire.tick,
            mode,
            order,
            origin: wire.origin,
        }))
    }

    /// Encode as a single line of JSON.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one line of JSON.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| GameError::protocol("relay", e.to_string()))
    }
}

/// Reliable, ordered message delivery to the other peers of a match.
pub trait NetworkRelay: Send {
    /// Queue a message for delivery.
    fn send(&mut self, message: &RelayMessage) -> Result<()>;

    /// Take one received message if one is waiting.
    ///
    /// `Some(Err(_))` is either an undecodable message, which is recoverable,
    /// or a lost connection, which is not.
    fn try_recv(&mut self) -> Option<Result<RelayMessage>>;

    /// This peer's player number, when the relay already knows it.
    fn player_number(&self) -> Option<u32> {
        None
    }
}

/// In-process relay joining two peers directly.
#[derive(Debug)]
pub struct LoopbackRelay {
    player: u32,
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl LoopbackRelay {
    /// Two connected ends, playing as players 0 and 1.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        (
            Self {
                player: 0,
                tx: tx_a,
                rx: rx_b,
            },
            Self {
                player: 1,
                tx: tx_b,
                rx: rx_a,
            },
        )
    }

    /// A sender for raw text delivered to the other end, bypassing encoding.
    #[must_use]
    pub fn raw_sender(&self) -> Sender<String> {
        self.tx.clone()
    }
}

impl NetworkRelay for LoopbackRelay {
    fn send(&mut self, message: &RelayMessage) -> Result<()> {
        let text = message.encode()?;
        self.tx
            .send(text)
            .map_err(|_| GameError::Relay("loopback peer disconnected".to_string()))
    }

    fn try_recv(&mut self) -> Option<Result<RelayMessage>> {
        match self.rx.try_recv() {
            Ok(text) => Some(RelayMessage::decode(&text)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(GameError::Relay(
                "loopback peer disconnected".to_string(),
            ))),
        }
    }

    fn player_number(&self) -> Option<u32> {
        Some(self.player)
    }
}
