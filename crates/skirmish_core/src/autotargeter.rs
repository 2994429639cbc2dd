//! Default controller for teams without an AI.
//!
//! Periodically points every idle, armed actor of its team at the nearest
//! enemy it can see. The orders it produces are internal: every peer runs the
//! same autotargeters on the same state, so they are never relayed.

use crate::actors::{ActorTable, TeamId};
use crate::math::Fixed;
use crate::orders::{Command, Order};

/// Ticks between autotargeter sweeps.
pub const AUTOTARGET_INTERVAL: u64 = 10;

/// Distance beyond weapon range within which enemies are acquired.
pub const ACQUISITION_MARGIN: i32 = 100;

/// Idle-actor targeting for one team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Autotargeter {
    team: TeamId,
    interval: u64,
}

impl Autotargeter {
    /// Autotargeter for `team`.
    #[must_use]
    pub const fn new(team: TeamId) -> Self {
        Self {
            team,
            interval: AUTOTARGET_INTERVAL,
        }
    }

    /// Team this autotargeter controls.
    #[must_use]
    pub const fn team(&self) -> TeamId {
        self.team
    }

    /// Attack orders for idle actors, or nothing if this is not a sweep tick.
    ///
    /// Each idle, complete, armed actor of the team targets the nearest enemy
    /// within its weapon range plus [`ACQUISITION_MARGIN`]. Ties go to the
    /// lower id.
    #[must_use]
    pub fn update(&self, tick: u64, actors: &ActorTable) -> Vec<Order> {
        if tick % self.interval != 0 {
            return Vec::new();
        }

        let mut orders = Vec::new();
        for actor in actors.iter() {
            if actor.team != self.team
                || !actor.is_idle()
                || !actor.order_queue.is_empty()
                || !actor.is_complete()
            {
                continue;
            }
            let Some(range) = actor.weapon_range() else {
                continue;
            };
            let reach = range + Fixed::from_num(ACQUISITION_MARGIN);
            let reach_sq = reach.saturating_mul(reach);

            let mut best = None;
            for enemy in actors.iter().filter(|e| e.team != self.team) {
                let distance = actor.pos.distance_squared(enemy.pos);
                if distance > reach_sq {
                    continue;
                }
                match best {
                    Some((_, best_distance)) if best_distance <= distance => {}
                    _ => best = Some((enemy.oid, distance)),
                }
            }

            if let Some((target, _)) = best {
                orders.push(Order::new(actor.oid, Command::Attack, None, Some(target)));
            }
        }
        orders
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::Actor;
    use crate::data::GameData;
    use crate::math::Vec3Fixed;

    fn table(placements: &[(&str, TeamId, i32)]) -> ActorTable {
        let data = GameData::from_value(&serde_json::json!({
            "abilities": {"Gun": {"range": 100}},
            "actors": {
                "Tank": {"abilities": ["Gun"]},
                "Crate": {"type": "building"}
            }
        }))
        .unwrap();
        let mut table = ActorTable::new();
        for &(kind, team, x) in placements {
            table.insert(
                Actor::from_template(
                    data.actor_type(kind).unwrap(),
                    &data,
                    team,
                    Vec3Fixed::from_ints(x, 0),
                )
                .unwrap(),
            );
        }
        table
    }

    #[test]
    fn test_targets_nearest_enemy_with_lower_id_tiebreak() {
        let actors = table(&[("Tank", 1, 0), ("Tank", 2, 150), ("Crate", 2, -150), ("Tank", 2, 400)]);
        let orders = Autotargeter::new(1).update(10, &actors);
        assert_eq!(orders, vec![Order::new(0, Command::Attack, None, Some(1))]);
    }

    #[test]
    fn test_only_runs_on_sweep_ticks() {
        let actors = table(&[("Tank", 1, 0), ("Tank", 2, 50)]);
        assert!(Autotargeter::new(1).update(7, &actors).is_empty());
    }

    #[test]
    fn test_unarmed_and_busy_actors_skipped() {
        let mut actors = table(&[("Crate", 1, 0), ("Tank", 1, 10), ("Tank", 2, 50)]);
        actors
            .get_mut(1)
            .unwrap()
            .issue_command(Order::new(1, Command::Stop, None, None));
        assert!(Autotargeter::new(1).update(20, &actors).is_empty());
    }

    #[test]
    fn test_enemies_out_of_reach_ignored() {
        let actors = table(&[("Tank", 1, 0), ("Tank", 2, 201)]);
        assert!(Autotargeter::new(1).update(10, &actors).is_empty());
    }
}
