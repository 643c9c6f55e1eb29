use magic_engine::ai::CountdownTimer;
use magic_engine::{AttackDef, AttackKind, Vec2};
use tracing::{debug, error};

use super::events::{AttackOrigin, CombatEvent, CombatEventBus, CombatIntent, CombatIntentQueue};
use super::physics::SpatialQuery;

/// Radius of the melee hit circle placed `range` ahead of the attacker.
pub(crate) const MELEE_HIT_RADIUS: f32 = 0.6;
pub(crate) const MELEE_HEIGHT_OFFSET: f32 = 0.0;

/// `(sign(to.x - from.x) * force.x, force.y)`; a target straight above is
/// pushed toward positive x.
pub(crate) fn knockback_vector(from: Vec2, to: Vec2, force: Vec2) -> Vec2 {
    let direction = if to.x - from.x < 0.0 { -1.0 } else { 1.0 };
    Vec2::new(direction * force.x, force.y)
}

#[derive(Debug, Clone)]
pub(crate) struct AttackSlot {
    pub(crate) def: AttackDef,
    cooldown: CountdownTimer,
}

impl AttackSlot {
    fn new(def: AttackDef) -> Self {
        Self {
            def,
            cooldown: CountdownTimer::ready(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_ready(&self) -> bool {
        self.cooldown.is_ready()
    }
}

/// Attack slots of one character. Slot 0 is the basic attack.
#[derive(Debug, Clone, Default)]
pub(crate) struct Arsenal {
    slots: Vec<AttackSlot>,
}

impl Arsenal {
    pub(crate) fn from_defs(defs: &[AttackDef]) -> Self {
        Self {
            slots: defs.iter().cloned().map(AttackSlot::new).collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, index: usize) -> Option<&AttackSlot> {
        self.slots.get(index)
    }

    pub(crate) fn tick(&mut self, dt: f32) {
        for slot in &mut self.slots {
            slot.cooldown.tick(dt);
        }
    }
}

/// Fires slot `index` from `origin`. Fails on an unknown slot or while the
/// slot is cooling down. Melee hits are found right away; other kinds become
/// a skill spawn resolved with the rest of the tick's intents.
pub(crate) fn execute_attack(
    arsenal: &mut Arsenal,
    index: usize,
    origin: AttackOrigin,
    world: &dyn SpatialQuery,
    intents: &mut CombatIntentQueue,
    events: &mut CombatEventBus,
) -> bool {
    let Some(slot) = arsenal.slots.get_mut(index) else {
        error!(
            attacker = origin.attacker.as_token(),
            index,
            slots = arsenal.slots.len(),
            "attack_index_invalid"
        );
        return false;
    };
    if !slot.cooldown.is_ready() {
        return false;
    }

    match slot.def.kind {
        AttackKind::Melee => {
            let center = origin.position
                + Vec2::new(origin.facing * slot.def.range, MELEE_HEIGHT_OFFSET);
            if world.overlap_circle(center, MELEE_HIT_RADIUS, origin.target) {
                let target_position = world.position(origin.target).unwrap_or(center);
                intents.push(CombatIntent::ApplyHit {
                    target: origin.target,
                    damage: slot.def.damage,
                    knockback: knockback_vector(
                        origin.position,
                        target_position,
                        slot.def.knockback,
                    ),
                });
            }
        }
        AttackKind::Projectile | AttackKind::Aoe | AttackKind::Orbit => {
            intents.push(CombatIntent::SpawnSkill {
                origin,
                slot: index,
                attack: slot.def.clone(),
            });
        }
    }

    slot.cooldown.start(slot.def.cooldown);
    events.emit(CombatEvent::AttackFired {
        actor: origin.attacker,
        slot: index,
    });
    debug!(
        attacker = origin.attacker.as_token(),
        index,
        kind = ?slot.def.kind,
        "attack_executed"
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::ArenaConfig;
    use crate::app::gameplay::events::ActorId;
    use crate::app::gameplay::physics::{ArenaPhysics, Body};

    fn melee(range: f32) -> AttackDef {
        AttackDef {
            kind: AttackKind::Melee,
            damage: 10.0,
            cooldown: 1.0,
            range,
            knockback: Vec2::new(2.0, 1.0),
            projectile_speed: 0.0,
            lifetime: 2.0,
            hit_window: (0.0, 1.0),
        }
    }

    fn world(boss_x: f32) -> ArenaPhysics {
        let mut physics = ArenaPhysics::new(ArenaConfig::default());
        physics.insert(
            ActorId::Boss,
            Body::dynamic(Vec2::new(boss_x, 1.0), Vec2::new(0.5, 1.0)),
        );
        physics
    }

    fn origin(facing: f32) -> AttackOrigin {
        AttackOrigin {
            attacker: ActorId::Player,
            position: Vec2::new(0.0, 1.0),
            facing,
            target: ActorId::Boss,
        }
    }

    #[test]
    fn knockback_follows_horizontal_side() {
        let force = Vec2::new(3.0, 2.0);
        let left = knockback_vector(Vec2::new(0.0, 0.0), Vec2::new(-1.0, 5.0), force);
        assert_eq!(left, Vec2::new(-3.0, 2.0));
        let same = knockback_vector(Vec2::new(0.0, 0.0), Vec2::new(0.0, 5.0), force);
        assert_eq!(same, Vec2::new(3.0, 2.0));
    }

    #[test]
    fn melee_in_range_queues_hit_and_refills_cooldown() {
        let mut arsenal = Arsenal::from_defs(&[melee(1.0)]);
        let mut intents = CombatIntentQueue::default();
        let mut events = CombatEventBus::default();
        let physics = world(1.5);

        assert!(execute_attack(
            &mut arsenal,
            0,
            origin(1.0),
            &physics,
            &mut intents,
            &mut events
        ));
        let drained = intents.drain_current_tick();
        assert_eq!(drained.len(), 1);
        assert!(matches!(
            drained[0],
            CombatIntent::ApplyHit { target: ActorId::Boss, knockback, .. } if knockback.x > 0.0
        ));
        assert!(!arsenal.slot(0).expect("slot").is_ready());

        assert!(!execute_attack(
            &mut arsenal,
            0,
            origin(1.0),
            &physics,
            &mut intents,
            &mut events
        ));
        let fired = events
            .take_pending()
            .into_iter()
            .filter(|event| matches!(event, CombatEvent::AttackFired { .. }))
            .count();
        assert_eq!(fired, 1);

        arsenal.tick(1.0);
        assert!(arsenal.slot(0).expect("slot").is_ready());
    }

    #[test]
    fn melee_facing_away_still_fires_but_misses() {
        let mut arsenal = Arsenal::from_defs(&[melee(1.0)]);
        let mut intents = CombatIntentQueue::default();
        let mut events = CombatEventBus::default();
        assert!(execute_attack(
            &mut arsenal,
            0,
            origin(-1.0),
            &world(1.5),
            &mut intents,
            &mut events
        ));
        assert_eq!(intents.len(), 0);
    }

    #[test]
    fn invalid_index_fails_without_events() {
        let mut arsenal = Arsenal::from_defs(&[melee(1.0)]);
        let mut intents = CombatIntentQueue::default();
        let mut events = CombatEventBus::default();
        assert!(!execute_attack(
            &mut arsenal,
            3,
            origin(1.0),
            &world(1.5),
            &mut intents,
            &mut events
        ));
        assert!(events.is_empty());
    }

    #[test]
    fn ranged_kinds_become_spawn_intents() {
        let mut projectile = melee(6.0);
        projectile.kind = AttackKind::Projectile;
        let mut arsenal = Arsenal::from_defs(&[melee(1.0), projectile]);
        let mut intents = CombatIntentQueue::default();
        let mut events = CombatEventBus::default();
        assert!(execute_attack(
            &mut arsenal,
            1,
            origin(1.0),
            &world(9.0),
            &mut intents,
            &mut events
        ));
        assert!(matches!(
            intents.drain_current_tick().as_slice(),
            [CombatIntent::SpawnSkill { slot: 1, .. }]
        ));
    }
}
