//! Bullets and explosion effects.

use std::hash::{Hash, Hasher};

use crate::actors::{Ability, ActorId, ActorTable, TeamId};
use crate::math::{Fixed, Rect, Vec3Fixed};

/// A projectile in flight toward a fixed impact point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bullet {
    /// Actor that fired.
    pub source: ActorId,
    /// Team of the firing actor; its own actors are never damaged.
    pub team: TeamId,
    /// Ability that fired the bullet.
    pub ability: String,
    /// Current position.
    pub pos: Vec3Fixed,
    /// Movement per tick.
    pub velocity: Vec3Fixed,
    /// Where the bullet explodes.
    pub impact: Vec3Fixed,
    /// Ticks of flight remaining.
    pub ticks_left: u32,
    /// Damage dealt on impact.
    pub damage: Fixed,
    /// Damage radius.
    pub blast_radius: Fixed,
    /// Lifetime of the explosion effect.
    pub effect_lifetime: u32,
}

impl Bullet {
    /// Fire `ability` from `origin` at `impact`.
    ///
    /// Flight time is the distance divided by the bullet speed, rounded up,
    /// and never less than one tick.
    #[must_use]
    pub fn fire(
        source: ActorId,
        team: TeamId,
        origin: Vec3Fixed,
        impact: Vec3Fixed,
        ability: &Ability,
    ) -> Self {
        let distance = origin.distance(impact);
        let ticks = if ability.bullet_speed > Fixed::ZERO {
            distance
                .saturating_div(ability.bullet_speed)
                .saturating_ceil()
                .saturating_to_num::<u32>()
                .max(1)
        } else {
            1
        };
        let velocity = (impact - origin).scale(Fixed::ONE / Fixed::saturating_from_num(ticks));

        Self {
            source,
            team,
            ability: ability.name.clone(),
            pos: origin,
            velocity,
            impact,
            ticks_left: ticks,
            damage: ability.damage,
            blast_radius: ability.blast_radius,
            effect_lifetime: ability.effect_lifetime,
        }
    }

    /// Advance one tick. The final step lands exactly on the impact point.
    pub fn update(&mut self) {
        if self.ticks_left == 0 {
            return;
        }
        self.ticks_left -= 1;
        if self.ticks_left == 0 {
            self.pos = self.impact;
        } else {
            self.pos += self.velocity;
        }
    }

    /// Whether the bullet has reached its impact point.
    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.ticks_left == 0
    }

    /// Damage every enemy actor caught by the blast and spawn the explosion.
    ///
    /// An actor is hit when its centre lies within the blast radius or its
    /// rectangle contains the impact point. Returns the effect and the ids of
    /// the actors hit, ascending.
    pub fn explode(&self, actors: &mut ActorTable) -> (Effect, Vec<ActorId>) {
        let radius_sq = self.blast_radius.saturating_mul(self.blast_radius);
        let mut hit = Vec::new();

        for actor in actors.iter_mut() {
            if actor.team == self.team {
                continue;
            }
            let in_blast = self.blast_radius > Fixed::ZERO
                && actor.pos.distance_squared(self.impact) <= radius_sq;
            if in_blast || actor.rect.contains_point(self.impact) {
                actor.take_damage(self.damage);
                hit.push(actor.oid);
            }
        }

        (Effect::explosion(self), hit)
    }
}

/// A short-lived visual effect with no influence on the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Effect {
    /// Name of the ability that produced it.
    pub kind: String,
    /// Centre of the effect.
    pub pos: Vec3Fixed,
    /// Area covered, for renderers.
    pub area: Rect,
    /// Ticks until removal.
    pub lifetime: u32,
}

impl Effect {
    /// Explosion left by `bullet`.
    #[must_use]
    pub fn explosion(bullet: &Bullet) -> Self {
        let diameter = bullet.blast_radius * 2;
        Self {
            kind: bullet.ability.clone(),
            pos: bullet.impact,
            area: Rect::centered(bullet.impact, [diameter, diameter]),
            lifetime: bullet.effect_lifetime,
        }
    }

    /// Count down one tick.
    pub fn update(&mut self) {
        self.lifetime = self.lifetime.saturating_sub(1);
    }

    /// Whether the effect has run out.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.lifetime == 0
    }
}

/// Hash a slice of transient entities in order.
pub(crate) fn hash_all<T: Hash, H: Hasher>(items: &[T], state: &mut H) {
    items.len().hash(state);
    for item in items {
        item.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::Actor;
    use crate::data::{AbilityKind, GameData};

    fn gun(speed: i32, blast: i32) -> Ability {
        Ability {
            name: "Gun".to_string(),
            kind: AbilityKind::Weapon,
            facing: [Fixed::ZERO; 2],
            cooldown: 0,
            damage: Fixed::from_num(15),
            range: Fixed::from_num(100),
            reload: 10,
            bullet_speed: Fixed::from_num(speed),
            blast_radius: Fixed::from_num(blast),
            effect_lifetime: 3,
        }
    }

    #[test]
    fn test_bullet_lands_on_impact_point() {
        let impact = Vec3Fixed::from_ints(25, 0);
        let mut bullet = Bullet::fire(0, 1, Vec3Fixed::ZERO, impact, &gun(10, 0));
        assert_eq!(bullet.ticks_left, 3);

        bullet.update();
        bullet.update();
        assert!(!bullet.is_spent());
        bullet.update();
        assert!(bullet.is_spent());
        assert_eq!(bullet.pos, impact);
    }

    #[test]
    fn test_shot_across_the_whole_battlefield_has_a_flight_time() {
        let origin = Vec3Fixed::from_ints(-60_000, -60_000);
        let impact = Vec3Fixed::from_ints(60_000, 60_000);
        let bullet = Bullet::fire(0, 1, origin, impact, &gun(10, 0));
        assert_eq!(bullet.ticks_left, 16_971);

        let mut slow = gun(1, 0);
        slow.bullet_speed = Fixed::from_bits(1);
        assert_eq!(
            Bullet::fire(0, 1, origin, impact, &slow).ticks_left,
            i32::MAX.unsigned_abs()
        );
    }

    #[test]
    fn test_explosion_damages_enemies_only() {
        let data = GameData::from_value(&serde_json::json!({
            "actors": {"Post": {"type": "building", "max_hp": 100, "size": [10, 10]}}
        }))
        .unwrap();
        let template = data.actor_type("Post").unwrap();
        let mut table = ActorTable::new();
        let friend = table.insert(
            Actor::from_template(template, &data, 1, Vec3Fixed::from_ints(0, 0)).unwrap(),
        );
        let near = table.insert(
            Actor::from_template(template, &data, 2, Vec3Fixed::from_ints(3, 0)).unwrap(),
        );
        let far = table.insert(
            Actor::from_template(template, &data, 2, Vec3Fixed::from_ints(90, 0)).unwrap(),
        );

        let mut bullet = Bullet::fire(9, 1, Vec3Fixed::from_ints(0, 50), Vec3Fixed::ZERO, &gun(100, 5));
        bullet.update();
        let (effect, hit) = bullet.explode(&mut table);

        assert_eq!(hit, vec![near.id()]);
        assert_eq!(table.get(near.id()).unwrap().hp, Fixed::from_num(85));
        assert_eq!(table.get(friend.id()).unwrap().hp, Fixed::from_num(100));
        assert_eq!(table.get(far.id()).unwrap().hp, Fixed::from_num(100));
        assert_eq!(effect.lifetime, 3);
    }

    #[test]
    fn test_effect_expires() {
        let bullet = Bullet::fire(0, 1, Vec3Fixed::ZERO, Vec3Fixed::ZERO, &gun(10, 0));
        let mut effect = Effect::explosion(&bullet);
        for _ in 0..3 {
            assert!(!effect.is_expired());
            effect.update();
        }
        assert!(effect.is_expired());
    }
}
