use magic_engine::ai::CountdownTimer;
use magic_engine::{CharacterDef, Vec2};
use tracing::{debug, info};

use super::events::{ActorId, CombatEvent, CombatEventBus};

pub(crate) const MIN_DAMAGE: f32 = 1.0;

/// `max(1, max(1, raw - defense) * (1 - reduction))`.
pub(crate) fn final_damage(raw: f32, defense: f32, damage_reduction: f32) -> f32 {
    let reduction = damage_reduction.clamp(0.0, 1.0);
    ((raw - defense).max(MIN_DAMAGE) * (1.0 - reduction)).max(MIN_DAMAGE)
}

#[derive(Debug, Clone)]
pub(crate) struct Health {
    actor: ActorId,
    max: f32,
    current: f32,
    defense: f32,
    damage_reduction: f32,
    invincible: CountdownTimer,
}

impl Health {
    pub(crate) fn from_def(actor: ActorId, def: &CharacterDef) -> Self {
        Self {
            actor,
            max: def.max_health,
            current: def.max_health,
            defense: def.defense,
            damage_reduction: def.damage_reduction,
            invincible: CountdownTimer::ready(),
        }
    }

    pub(crate) fn max(&self) -> f32 {
        self.max
    }

    pub(crate) fn current(&self) -> f32 {
        self.current
    }

    pub(crate) fn ratio(&self) -> f32 {
        if self.max <= 0.0 {
            0.0
        } else {
            self.current / self.max
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.current > 0.0
    }

    pub(crate) fn is_invincible(&self) -> bool {
        !self.invincible.is_ready()
    }

    /// Keeps the longer of the running and the requested invincibility.
    pub(crate) fn grant_invincibility(&mut self, seconds: f32) {
        self.invincible.extend_to(seconds);
        debug!(
            actor = self.actor.as_token(),
            remaining = self.invincible.remaining(),
            "invincibility_granted"
        );
    }

    pub(crate) fn tick(&mut self, dt: f32) {
        self.invincible.tick(dt);
    }

    /// Applies one hit. Returns `false` without raising events while
    /// invincible or already dead.
    pub(crate) fn take_damage(
        &mut self,
        raw: f32,
        knockback: Vec2,
        events: &mut CombatEventBus,
    ) -> bool {
        if self.is_invincible() || !self.is_alive() {
            return false;
        }
        let damage = final_damage(raw, self.defense, self.damage_reduction);
        let before = self.current;
        self.current = (self.current - damage).max(0.0);
        events.emit(CombatEvent::HealthChanged {
            actor: self.actor,
            max: self.max,
            before,
            current: self.current,
        });
        events.emit(CombatEvent::Hit {
            actor: self.actor,
            knockback,
        });
        debug!(
            actor = self.actor.as_token(),
            raw,
            damage,
            current = self.current,
            "damage_applied"
        );
        if self.current <= 0.0 {
            info!(actor = self.actor.as_token(), "actor_died");
            events.emit(CombatEvent::Death { actor: self.actor });
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(max: f32, defense: f32, reduction: f32) -> Health {
        Health {
            actor: ActorId::Player,
            max,
            current: max,
            defense,
            damage_reduction: reduction,
            invincible: CountdownTimer::ready(),
        }
    }

    #[test]
    fn damage_formula_applies_defense_then_reduction() {
        assert!((final_damage(10.0, 3.0, 0.2) - 5.6).abs() < 1e-5);
        assert!((final_damage(2.0, 5.0, 0.0) - 1.0).abs() < 1e-5);
        assert!((final_damage(2.0, 5.0, 0.9) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn take_damage_emits_changed_hit_and_single_death() {
        let mut hp = health(10.0, 0.0, 0.0);
        let mut bus = CombatEventBus::default();
        assert!(hp.take_damage(6.0, Vec2::new(1.0, 1.0), &mut bus));
        assert!(hp.take_damage(6.0, Vec2::new(1.0, 1.0), &mut bus));
        assert_eq!(hp.current(), 0.0);
        assert!(!hp.take_damage(6.0, Vec2::new(1.0, 1.0), &mut bus));

        let events = bus.take_pending();
        let deaths = events
            .iter()
            .filter(|event| matches!(event, CombatEvent::Death { .. }))
            .count();
        assert_eq!(deaths, 1);
        assert_eq!(events.len(), 5);
        assert!(matches!(
            events[2],
            CombatEvent::HealthChanged { before, current, .. } if before == 4.0 && current == 0.0
        ));
    }

    #[test]
    fn invincibility_blocks_damage_until_elapsed() {
        let mut hp = health(100.0, 0.0, 0.0);
        let mut bus = CombatEventBus::default();
        hp.grant_invincibility(2.0);
        hp.grant_invincibility(0.5);
        assert!(!hp.take_damage(10.0, Vec2::ZERO, &mut bus));
        assert!(bus.is_empty());
        hp.tick(1.0);
        assert!(hp.is_invincible());
        hp.tick(1.0);
        assert!(hp.take_damage(10.0, Vec2::ZERO, &mut bus));
        assert!((hp.ratio() - 0.9).abs() < 1e-6);
    }
}
