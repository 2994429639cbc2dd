//! Rectangle collision detection, pathing resolution and placement search.
//!
//! Detection runs over actor pairs in ascending id order and every pair is
//! reported lower id first. Resolution canonicalizes again on its own, so the
//! outcome never depends on which way round a pair was discovered.

use crate::actors::{ActorId, ActorTable};
use crate::math::{Fixed, Rect, Vec3Fixed};

/// Default number of ticks between collision passes.
pub const DEFAULT_COLLISION_INTERVAL: u64 = 5;

/// Radii tried, in order, when searching for a free placement.
pub const PLACEMENT_RADII: [i32; 3] = [50, 100, 200];

/// Unit compass offsets tried at each placement radius.
const COMPASS: [(i32, i32); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

/// Periodic collision pass over the actor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionEngine {
    interval: u64,
}

impl Default for CollisionEngine {
    fn default() -> Self {
        Self::new(DEFAULT_COLLISION_INTERVAL)
    }
}

impl CollisionEngine {
    /// Run a pass every `interval` ticks. An interval of zero is treated as one.
    #[must_use]
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
        }
    }

    /// Ticks between passes.
    #[must_use]
    pub const fn interval(&self) -> u64 {
        self.interval
    }

    /// Whether a pass runs on `tick`.
    #[must_use]
    pub const fn is_due(&self, tick: u64) -> bool {
        tick % self.interval == 0
    }

    /// Detect every colliding pair and resolve each one.
    ///
    /// Returns the detected pairs, canonicalized and in ascending order.
    pub fn run(&self, actors: &mut ActorTable) -> Vec<(ActorId, ActorId)> {
        let pairs = detect_collisions(actors);
        for &(a, b) in &pairs {
            resolve_pair(actors, a, b);
        }
        if !pairs.is_empty() {
            tracing::debug!(collisions = pairs.len(), "Resolved collisions");
        }
        pairs
    }
}

/// All overlapping actor pairs as `(lower id, higher id)`, ascending.
#[must_use]
pub fn detect_collisions(actors: &ActorTable) -> Vec<(ActorId, ActorId)> {
    let all: Vec<_> = actors.iter().map(|a| (a.oid, a.rect)).collect();
    let mut pairs = Vec::new();
    for (i, (a, rect_a)) in all.iter().enumerate() {
        for (b, rect_b) in &all[i + 1..] {
            if rect_a.overlaps(rect_b) {
                pairs.push(canonical(*a, *b));
            }
        }
    }
    pairs
}

/// Order a pair lower id first.
#[must_use]
pub fn canonical(a: ActorId, b: ActorId) -> (ActorId, ActorId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Push two overlapping actors apart.
///
/// Mobile actors move along the centre-to-centre axis by the overlap depth,
/// split evenly when both can move; buildings never move. Coincident centres
/// separate along positive x for the higher id. Returns whether any actor
/// moved.
pub fn resolve_pair(actors: &mut ActorTable, a: ActorId, b: ActorId) -> bool {
    let (low, high) = canonical(a, b);
    if low == high {
        return false;
    }
    let (Some(first), Some(second)) = (actors.get(low), actors.get(high)) else {
        return false;
    };
    if !first.rect.overlaps(&second.rect) {
        return false;
    }

    let low_mobile = first.class.is_mobile();
    let high_mobile = second.class.is_mobile();
    if !low_mobile && !high_mobile {
        return false;
    }

    let depth = overlap_depth(&first.rect, &second.rect);
    let delta = Vec3Fixed::new(second.pos.x - first.pos.x, second.pos.y - first.pos.y, Fixed::ZERO);
    let axis = if delta == Vec3Fixed::ZERO {
        Vec3Fixed::new(Fixed::ONE, Fixed::ZERO, Fixed::ZERO)
    } else {
        delta.normalize()
    };

    let (low_push, high_push) = match (low_mobile, high_mobile) {
        (true, true) => {
            let half = depth / 2;
            (half, depth - half)
        }
        (true, false) => (depth, Fixed::ZERO),
        _ => (Fixed::ZERO, depth),
    };

    if let Some(actor) = actors.get_mut(low) {
        if low_push > Fixed::ZERO {
            let pos = actor.pos - axis.scale(low_push);
            actor.set_position(pos);
        }
    }
    if let Some(actor) = actors.get_mut(high) {
        if high_push > Fixed::ZERO {
            let pos = actor.pos + axis.scale(high_push);
            actor.set_position(pos);
        }
    }
    true
}

/// Smaller of the horizontal and vertical overlap of two rectangles.
fn overlap_depth(a: &Rect, b: &Rect) -> Fixed {
    let x = a.right().min(b.right()) - a.left.max(b.left);
    let y = a.bottom().min(b.bottom()) - a.top.max(b.top);
    x.min(y).max(Fixed::ZERO)
}

/// Whether `rect` overlaps any actor in the table or any of `pending`.
///
/// `pending` holds rectangles of actors that will be added later in the
/// same tick.
#[must_use]
pub fn collides_with_any(actors: &ActorTable, rect: &Rect, pending: &[Rect]) -> bool {
    actors.iter().any(|a| a.rect.overlaps(rect)) || pending.iter().any(|r| r.overlaps(rect))
}

/// Find a free, in-bounds position for `rect`.
///
/// Tries the rectangle where it is, then each compass offset at every radius
/// in `radii`, in a fixed order. Returns the first free rectangle, or `None`
/// if every candidate is blocked.
#[must_use]
pub fn find_placement(
    actors: &ActorTable,
    rect: Rect,
    radii: &[i32],
    bounds: &Rect,
    pending: &[Rect],
) -> Option<Rect> {
    let free = |candidate: &Rect| {
        bounds.contains_rect(candidate) && !collides_with_any(actors, candidate, pending)
    };
    if free(&rect) {
        return Some(rect);
    }

    radii
        .iter()
        .flat_map(|&radius| {
            COMPASS.iter().map(move |&(dx, dy)| {
                Vec3Fixed::new(
                    Fixed::from_num(dx * radius),
                    Fixed::from_num(dy * radius),
                    Fixed::ZERO,
                )
            })
        })
        .map(|offset| rect.translated(offset))
        .find(|candidate| free(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::Actor;
    use crate::data::GameData;

    fn table_with(positions: &[(&str, i32, i32)]) -> ActorTable {
        let data = GameData::from_value(&serde_json::json!({
            "actors": {
                "Unit": {"type": "mobile", "size": [20, 20]},
                "Wall": {"type": "building", "size": [20, 20]}
            }
        }))
        .unwrap();
        let mut table = ActorTable::new();
        for &(kind, x, y) in positions {
            let actor = Actor::from_template(
                data.actor_type(kind).unwrap(),
                &data,
                1,
                Vec3Fixed::from_ints(x, y),
            )
            .unwrap();
            table.insert(actor);
        }
        table
    }

    fn f(n: i32) -> Fixed {
        Fixed::from_num(n)
    }

    #[test]
    fn test_overlapping_pair_is_canonical() {
        let table = table_with(&[("Unit", 0, 0), ("Unit", 10, 0), ("Unit", 200, 200)]);
        assert_eq!(detect_collisions(&table), vec![(0, 1)]);
    }

    #[test]
    fn test_touching_edges_do_not_collide() {
        let table = table_with(&[("Unit", 0, 0), ("Unit", 20, 0)]);
        assert!(detect_collisions(&table).is_empty());
    }

    #[test]
    fn test_resolution_ignores_argument_order() {
        let mut forward = table_with(&[("Unit", 0, 0), ("Unit", 10, 0)]);
        let mut backward = forward.clone();

        assert!(resolve_pair(&mut forward, 0, 1));
        assert!(resolve_pair(&mut backward, 1, 0));

        for id in [0, 1] {
            assert_eq!(forward.get(id).unwrap().pos, backward.get(id).unwrap().pos);
        }
        assert_eq!(forward.get(0).unwrap().pos, Vec3Fixed::from_ints(-5, 0));
        assert_eq!(forward.get(1).unwrap().pos, Vec3Fixed::from_ints(15, 0));
        assert!(detect_collisions(&forward).is_empty());
    }

    #[test]
    fn test_building_does_not_move() {
        let mut table = table_with(&[("Wall", 0, 0), ("Unit", 0, 0)]);
        resolve_pair(&mut table, 0, 1);
        assert_eq!(table.get(0).unwrap().pos, Vec3Fixed::ZERO);
        assert_eq!(table.get(1).unwrap().pos, Vec3Fixed::from_ints(20, 0));
    }

    #[test]
    fn test_engine_runs_on_interval() {
        let engine = CollisionEngine::new(5);
        assert!(!engine.is_due(4));
        assert!(engine.is_due(5));
        assert!(engine.is_due(10));
    }

    #[test]
    fn test_find_placement_moves_off_blocked_spot() {
        let table = table_with(&[("Wall", 100, 100)]);
        let bounds = Rect::new(f(0), f(0), f(1000), f(1000));
        let wanted = Rect::centered(Vec3Fixed::from_ints(100, 100), [f(20), f(20)]);

        let placed = find_placement(&table, wanted, &PLACEMENT_RADII, &bounds, &[]).unwrap();
        assert_eq!(placed.center(), Vec3Fixed::from_ints(100, 50));

        let pending = [placed];
        let second = find_placement(&table, wanted, &PLACEMENT_RADII, &bounds, &pending).unwrap();
        assert_eq!(second.center(), Vec3Fixed::from_ints(150, 50));
    }

    #[test]
    fn test_find_placement_respects_bounds() {
        let table = ActorTable::new();
        let bounds = Rect::new(f(0), f(0), f(30), f(30));
        let wanted = Rect::centered(Vec3Fixed::from_ints(100, 100), [f(20), f(20)]);
        assert_eq!(find_placement(&table, wanted, &PLACEMENT_RADII, &bounds, &[]), None);
    }
}
