//! Data structures for templates and scenarios.
//!
//! Game data (actor and ability templates, build lists, tech trees) and
//! scenarios are JSON documents. Templates are resolved once at load time and
//! are immutable for the rest of the battle.

mod game_data;
mod scenario;

pub use game_data::{
    resolve_inheritance, AbilityKind, AbilityType, ActorClass, ActorType, GameData, INHERITS_FROM,
};
pub use scenario::{ActorPlacement, AiAssignment, Battlefield, RallyOrder, Scenario};
