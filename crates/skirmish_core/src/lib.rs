//! # Skirmish Core
//!
//! Deterministic lockstep battle simulation.
//!
//! This crate contains the whole battle model and nothing that draws or
//! talks to a network socket:
//! - No rendering
//! - No transport beyond the [`relay::NetworkRelay`] boundary trait
//! - No system randomness
//! - No floating-point math in the simulation (uses fixed-point)
//!
//! Peers that load the same data and exchange orders through a relay stay in
//! lockstep: every order applies `tick_jump` ticks after it was issued, on
//! every peer.
//!
//! ## Crate Structure
//!
//! - [`simulation`] - The battle and its tick loop
//! - [`orders`] - Commands and the delayed order scheduler
//! - [`actors`] - Units, structures and the actor table
//! - [`collision`] - Rectangle collisions and placement search
//! - [`projectiles`] - Bullets and explosion effects
//! - [`autotargeter`] - Default controller for teams without an AI
//! - [`ai`] - Isolated AI agents and their message protocol
//! - [`relay`] - Order exchange between peers
//! - [`replay`] - Recording and verified playback
//! - [`data`] - Game data and scenario loading
//! - [`config`] - Typed simulation settings
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod actors;
pub mod ai;
pub mod autotargeter;
pub mod collision;
pub mod config;
pub mod data;
pub mod error;
pub mod math;
pub mod orders;
pub mod projectiles;
pub mod relay;
pub mod replay;
pub mod simulation;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::actors::{Actor, ActorHandle, ActorId, ActorTable, TeamId};
    pub use crate::ai::{AiChannel, AiRegistry, ChannelStatus};
    pub use crate::config::SimConfig;
    pub use crate::data::{ActorPlacement, GameData, Scenario};
    pub use crate::error::{GameError, Result};
    pub use crate::math::{Fixed, Rect, Vec3Fixed};
    pub use crate::orders::{ActorRef, Command, Order, OrderMode, OrderScheduler, ScheduledOrder};
    pub use crate::relay::{LoopbackRelay, NetworkRelay, RelayMessage};
    pub use crate::replay::{Replay, ReplayPlayer};
    pub use crate::simulation::{BattleSim, LoadOptions, SimState, TickEvents};
}
