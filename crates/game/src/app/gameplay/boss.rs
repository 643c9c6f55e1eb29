use magic_engine::ai::{ActionNode, CountdownTimer, Evaluation, NodeStatus, Selector, Sequence};
use magic_engine::{CharacterDef, Vec2};
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, trace};

use super::attack::{execute_attack, Arsenal};
use super::events::{ActorId, AttackOrigin, CombatEvent, CombatEventBus, CombatIntent, CombatIntentQueue};
use super::health::Health;
use super::physics::{ArenaPhysics, Body, SpatialQuery};
use crate::app::config::BossConfig;

/// Everything the boss's tree reads and writes during one evaluation. The
/// world is a snapshot taken at the start of the tick; the boss body inside
/// it is written back afterwards.
#[derive(Debug)]
pub(crate) struct BossCore {
    tuning: BossConfig,
    move_speed: f32,
    hit_recovery_secs: f32,
    attack_recovery_secs: f32,
    start_x: f32,
    facing: f32,
    alive: bool,
    is_hit: bool,
    pending_knockback: Vec2,
    target: Option<ActorId>,
    hit_recovery: CountdownTimer,
    attack_recovery: CountdownTimer,
    flip_timer: CountdownTimer,
    arsenal: Arsenal,
    health: Health,
    world: ArenaPhysics,
    orbit_busy: bool,
    intents: CombatIntentQueue,
    events: CombatEventBus,
    rng: StdRng,
}

impl BossCore {
    fn body(&self) -> Option<&Body> {
        self.world.body(ActorId::Boss)
    }

    fn body_mut(&mut self) -> Option<&mut Body> {
        self.world.body_mut(ActorId::Boss)
    }

    fn position(&self) -> Vec2 {
        self.body().map_or(Vec2::ZERO, |body| body.position)
    }

    fn flip(&mut self) {
        self.facing = -self.facing;
        self.flip_timer.start(self.tuning.flip_cooldown);
        trace!(facing = self.facing, "boss_flipped");
    }

    fn walk(&mut self) {
        let vx = self.facing * self.move_speed;
        if let Some(body) = self.body_mut() {
            body.velocity.x = vx;
        }
    }

    fn melee_reach(&self) -> f32 {
        self.arsenal.slot(0).map_or(0.0, |slot| slot.def.range)
    }

    /// Patrol turnaround: left the patrol range, a wall ahead, or no floor
    /// ahead. Gated by the flip cooldown.
    fn should_turn(&self) -> bool {
        let Some(body) = self.body() else {
            return false;
        };
        if (body.position.x - self.start_x).abs() > self.tuning.patrol_range {
            return true;
        }
        let wall = self.tuning.wall_probe;
        let wall_center = body.position
            + Vec2::new(self.facing * wall.distance, self.tuning.probe_height);
        if self.world.overlaps_wall(wall_center, wall.size) {
            return true;
        }
        let ledge = self.tuning.ledge_probe;
        let feet = Vec2::new(
            body.position.x + self.facing * ledge.distance,
            body.position.y - body.half_extents.y,
        );
        !self.world.overlaps_ground(feet, ledge.size)
    }
}

struct DeathCheck {
    played: bool,
}

impl ActionNode<BossCore> for DeathCheck {
    fn label(&self) -> &str {
        "Death"
    }

    fn evaluate(&mut self, ctx: &mut BossCore) -> NodeStatus {
        if ctx.alive {
            return NodeStatus::Failure;
        }
        if !self.played {
            self.played = true;
            info!("boss_death_played");
        }
        NodeStatus::Success
    }
}

struct TakeHit;

impl ActionNode<BossCore> for TakeHit {
    fn label(&self) -> &str {
        "Damaged"
    }

    fn evaluate(&mut self, ctx: &mut BossCore) -> NodeStatus {
        if !ctx.alive || !ctx.is_hit {
            return NodeStatus::Failure;
        }
        let knockback = ctx.pending_knockback;
        if let Some(body) = ctx.body_mut() {
            body.velocity = Vec2::ZERO;
            body.add_impulse(knockback);
        }
        ctx.hit_recovery.start(ctx.hit_recovery_secs);
        ctx.is_hit = false;
        debug!(knockback_x = knockback.x, knockback_y = knockback.y, "boss_staggered");
        NodeStatus::Success
    }
}

/// Acquires a target by sweeping ahead. Never succeeds so lower branches
/// still run this tick.
struct Detect;

impl ActionNode<BossCore> for Detect {
    fn label(&self) -> &str {
        "Detection"
    }

    fn evaluate(&mut self, ctx: &mut BossCore) -> NodeStatus {
        if ctx.target.is_none() {
            let origin = ctx.position() + Vec2::new(0.0, ctx.tuning.probe_height);
            if ctx.world.box_cast(
                origin,
                ctx.tuning.wall_probe.size,
                ctx.facing,
                ctx.tuning.patrol_range,
                ActorId::Player,
            ) {
                ctx.target = Some(ActorId::Player);
                info!("boss_target_acquired");
            }
        }
        NodeStatus::Failure
    }
}

struct Chase;

impl ActionNode<BossCore> for Chase {
    fn label(&self) -> &str {
        "Chase"
    }

    fn evaluate(&mut self, ctx: &mut BossCore) -> NodeStatus {
        let Some(target) = ctx.target else {
            return NodeStatus::Failure;
        };
        if ctx.orbit_busy {
            return NodeStatus::Running;
        }
        let Some(target_position) = ctx.world.position(target) else {
            return NodeStatus::Failure;
        };
        let dx = target_position.x - ctx.position().x;
        if dx != 0.0 && dx.signum() != ctx.facing {
            ctx.flip();
        }
        if dx.abs() <= ctx.melee_reach() + ctx.tuning.detection_margin {
            return NodeStatus::Failure;
        }
        if ctx.hit_recovery.is_ready() {
            ctx.walk();
        }
        NodeStatus::Running
    }
}

/// Casts a random skill slot. Keeps running while the cast is refused or the
/// previous one is still recovering.
struct Attack;

impl ActionNode<BossCore> for Attack {
    fn label(&self) -> &str {
        "Attack"
    }

    fn evaluate(&mut self, ctx: &mut BossCore) -> NodeStatus {
        let Some(target) = ctx.target else {
            return NodeStatus::Failure;
        };
        let slot = if ctx.arsenal.len() > 1 {
            ctx.rng.gen_range(1..ctx.arsenal.len())
        } else {
            0
        };
        let origin = AttackOrigin {
            attacker: ActorId::Boss,
            position: ctx.position(),
            facing: ctx.facing,
            target,
        };
        let fired = execute_attack(
            &mut ctx.arsenal,
            slot,
            origin,
            &ctx.world,
            &mut ctx.intents,
            &mut ctx.events,
        );
        if !fired || !ctx.attack_recovery.is_ready() {
            return NodeStatus::Running;
        }
        ctx.attack_recovery.start(ctx.attack_recovery_secs);
        NodeStatus::Success
    }
}

struct Patrol;

impl ActionNode<BossCore> for Patrol {
    fn label(&self) -> &str {
        "Patrol"
    }

    fn evaluate(&mut self, ctx: &mut BossCore) -> NodeStatus {
        let grounded = ctx.body().is_some_and(|body| body.grounded);
        if !grounded || !ctx.hit_recovery.is_ready() {
            return NodeStatus::Failure;
        }
        if ctx.flip_timer.is_ready() && ctx.should_turn() {
            ctx.flip();
        }
        ctx.walk();
        NodeStatus::Success
    }
}

struct Idle;

impl ActionNode<BossCore> for Idle {
    fn label(&self) -> &str {
        "Idle"
    }

    fn evaluate(&mut self, _ctx: &mut BossCore) -> NodeStatus {
        NodeStatus::Success
    }
}

fn build_tree() -> Selector<BossCore> {
    Selector::new("Root")
        .with(Sequence::new("DEATH").with(DeathCheck { played: false }))
        .with(Sequence::new("DAMAGED").with(TakeHit))
        .with(Sequence::new("DETECTION").with(Detect))
        .with(Sequence::new("CHASE").with(Chase))
        .with(Sequence::new("ATTACK").with(Attack))
        .with(Sequence::new("PATROL").with(Patrol))
        .with(Sequence::new("IDLE").with(Idle))
}

/// Output of one boss tick for the scene to merge.
#[derive(Debug, Default)]
pub(crate) struct BossOutput {
    pub(crate) intents: Vec<CombatIntent>,
    pub(crate) events: Vec<CombatEvent>,
}

#[derive(Debug)]
pub(crate) struct Boss {
    core: BossCore,
    tree: Selector<BossCore>,
    last_path: String,
}

impl Boss {
    pub(crate) fn new(def: &CharacterDef, tuning: BossConfig, world: ArenaPhysics, rng: StdRng) -> Self {
        let start_x = tuning.spawn.x;
        Self {
            core: BossCore {
                tuning,
                move_speed: def.move_speed,
                hit_recovery_secs: def.hit_recovery,
                attack_recovery_secs: def.attack_recovery,
                start_x,
                facing: -1.0,
                alive: true,
                is_hit: false,
                pending_knockback: Vec2::ZERO,
                target: None,
                hit_recovery: CountdownTimer::ready(),
                attack_recovery: CountdownTimer::ready(),
                flip_timer: CountdownTimer::ready(),
                arsenal: Arsenal::from_defs(&def.attacks),
                health: Health::from_def(ActorId::Boss, def),
                world,
                orbit_busy: false,
                intents: CombatIntentQueue::default(),
                events: CombatEventBus::default(),
                rng,
            },
            tree: build_tree(),
            last_path: String::new(),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.core.alive
    }

    pub(crate) fn facing(&self) -> f32 {
        self.core.facing
    }

    pub(crate) fn target(&self) -> Option<ActorId> {
        self.core.target
    }

    pub(crate) fn health(&self) -> &Health {
        &self.core.health
    }

    pub(crate) fn health_mut(&mut self) -> &mut Health {
        &mut self.core.health
    }

    pub(crate) fn last_path(&self) -> &str {
        &self.last_path
    }

    pub(crate) fn on_hit(&mut self, knockback: Vec2) {
        if !self.core.hit_recovery.is_ready() {
            return;
        }
        self.core.pending_knockback = knockback;
        self.core.is_hit = true;
    }

    /// Marks the boss dead and its body as a corpse.
    pub(crate) fn on_death(&mut self, world: &mut ArenaPhysics) {
        if !self.core.alive {
            return;
        }
        self.core.alive = false;
        self.core.is_hit = false;
        if let Some(body) = world.body_mut(ActorId::Boss) {
            body.hittable = false;
        }
    }

    /// Evaluates the tree once against a snapshot of `world`, then writes the
    /// boss body back.
    pub(crate) fn fixed_update(&mut self, world: &mut ArenaPhysics, orbit_busy: bool) -> BossOutput {
        self.core.world.clone_from(world);
        self.core.orbit_busy = orbit_busy;
        let Evaluation { status, path } = self.tree.evaluate(&mut self.core);
        if path != self.last_path {
            debug!(status = ?status, path = %path, "boss_behavior_changed");
            self.last_path = path;
        }
        if let (Some(src), Some(dst)) = (self.core.body(), world.body_mut(ActorId::Boss)) {
            *dst = *src;
        }
        BossOutput {
            intents: self.core.intents.drain_current_tick(),
            events: self.core.events.take_pending(),
        }
    }

    pub(crate) fn update(&mut self, dt: f32) {
        self.core.flip_timer.tick(dt);
        self.core.hit_recovery.tick(dt);
        self.core.attack_recovery.tick(dt);
        self.core.arsenal.tick(dt);
        self.core.health.tick(dt);
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::app::config::{ArenaConfig, OrbitConfig, ProbeConfig};
    use magic_engine::{AttackDef, AttackKind};

    fn attack(kind: AttackKind, range: f32) -> AttackDef {
        AttackDef {
            kind,
            damage: 10.0,
            cooldown: 2.0,
            range,
            knockback: Vec2::new(1.0, 1.0),
            projectile_speed: 1.0,
            lifetime: 2.0,
            hit_window: (0.0, 1.0),
        }
    }

    fn def() -> CharacterDef {
        CharacterDef {
            def_name: "boss".to_string(),
            max_health: 100.0,
            move_speed: 2.0,
            jump_force: 0.0,
            defense: 0.0,
            damage_reduction: 0.0,
            hit_recovery: 0.5,
            attack_recovery: 1.0,
            attacks: vec![
                attack(AttackKind::Melee, 1.5),
                attack(AttackKind::Aoe, 5.0),
            ],
        }
    }

    fn tuning(spawn_x: f32) -> BossConfig {
        BossConfig {
            def_name: "boss".to_string(),
            spawn: Vec2::new(spawn_x, 1.0),
            patrol_range: 4.0,
            flip_cooldown: 0.5,
            detection_margin: 0.2,
            probe_height: 0.0,
            wall_probe: ProbeConfig {
                distance: 1.0,
                size: Vec2::new(0.5, 1.0),
            },
            ledge_probe: ProbeConfig {
                distance: 1.0,
                size: Vec2::new(0.2, 0.2),
            },
            orbit: OrbitConfig {
                instances: 4,
                spawn_points: vec![Vec2::new(1.0, 0.0)],
                spawn_cooldown: 0.5,
                rotation_speed: 0.0,
                curve_offset: 0.0,
            },
        }
    }

    fn world(boss_x: f32, player_x: f32) -> ArenaPhysics {
        let mut physics = ArenaPhysics::new(ArenaConfig::default());
        let mut boss = Body::dynamic(Vec2::new(boss_x, 1.0), Vec2::new(0.5, 1.0));
        boss.grounded = true;
        physics.insert(ActorId::Boss, boss);
        physics.insert(
            ActorId::Player,
            Body::dynamic(Vec2::new(player_x, 0.5), Vec2::new(0.3, 0.5)),
        );
        physics
    }

    fn boss(boss_x: f32, player_x: f32) -> (Boss, ArenaPhysics) {
        let physics = world(boss_x, player_x);
        let boss = Boss::new(
            &def(),
            tuning(boss_x),
            physics.clone(),
            StdRng::seed_from_u64(3),
        );
        (boss, physics)
    }

    #[test]
    fn patrols_when_no_target_in_sight() {
        let (mut boss, mut physics) = boss(0.0, 10.0);
        let out = boss.fixed_update(&mut physics, false);
        assert!(boss.last_path().starts_with("Root/PATROL"));
        assert!(out.intents.is_empty());
        let body = physics.body(ActorId::Boss).expect("boss");
        assert_eq!(body.velocity.x, -2.0);
        assert_eq!(boss.target(), None);
    }

    #[test]
    fn patrol_turns_at_range_edge_with_cooldown() {
        let (mut boss, mut physics) = boss(0.0, 10.0);
        physics.body_mut(ActorId::Boss).expect("boss").position.x = -4.5;
        boss.fixed_update(&mut physics, false);
        assert_eq!(boss.facing(), 1.0);
        // Still outside the range, but the flip timer holds the new heading.
        boss.fixed_update(&mut physics, false);
        assert_eq!(boss.facing(), 1.0);
        assert_eq!(physics.body(ActorId::Boss).expect("boss").velocity.x, 2.0);
    }

    #[test]
    fn chases_detected_target_then_attacks_when_adjacent() {
        let (mut boss, mut physics) = boss(0.0, -3.0);
        boss.fixed_update(&mut physics, false);
        assert_eq!(boss.target(), Some(ActorId::Player));
        assert!(boss.last_path().starts_with("Root/CHASE"));
        assert_eq!(physics.body(ActorId::Boss).expect("boss").velocity.x, -2.0);

        physics.body_mut(ActorId::Boss).expect("boss").position.x = -1.8;
        let out = boss.fixed_update(&mut physics, false);
        assert_eq!(boss.last_path(), "Root/ATTACK/END");
        assert!(matches!(
            out.intents.as_slice(),
            [CombatIntent::SpawnSkill { slot: 1, .. }]
        ));
        assert!(out
            .events
            .iter()
            .any(|event| matches!(event, CombatEvent::AttackFired { actor: ActorId::Boss, .. })));

        // Skill cooling down: the attack branch keeps running.
        boss.fixed_update(&mut physics, false);
        assert_eq!(boss.last_path(), "Root/ATTACK/Attack");
    }

    #[test]
    fn chase_turns_toward_target_behind() {
        let (mut boss, mut physics) = boss(0.0, -3.0);
        boss.fixed_update(&mut physics, false);
        physics.body_mut(ActorId::Player).expect("player").position.x = 4.0;
        boss.fixed_update(&mut physics, false);
        assert_eq!(boss.facing(), 1.0);
    }

    #[test]
    fn chase_holds_while_orbit_spawner_runs() {
        let (mut boss, mut physics) = boss(0.0, -3.0);
        boss.fixed_update(&mut physics, false);
        physics.body_mut(ActorId::Boss).expect("boss").velocity.x = 0.0;
        boss.fixed_update(&mut physics, true);
        assert_eq!(boss.last_path(), "Root/CHASE/Chase");
        assert_eq!(physics.body(ActorId::Boss).expect("boss").velocity.x, 0.0);
    }

    #[test]
    fn hit_staggers_once_and_respects_recovery() {
        let (mut boss, mut physics) = boss(0.0, 10.0);
        boss.on_hit(Vec2::new(3.0, 2.0));
        boss.fixed_update(&mut physics, false);
        assert_eq!(boss.last_path(), "Root/DAMAGED/END");
        assert_eq!(
            physics.body(ActorId::Boss).expect("boss").velocity,
            Vec2::new(3.0, 2.0)
        );

        boss.on_hit(Vec2::new(3.0, 2.0));
        boss.fixed_update(&mut physics, false);
        assert_ne!(boss.last_path(), "Root/DAMAGED/END");
    }

    #[test]
    fn death_wins_over_everything() {
        let (mut boss, mut physics) = boss(0.0, -1.0);
        boss.on_hit(Vec2::new(1.0, 1.0));
        boss.on_death(&mut physics);
        assert!(!physics.body(ActorId::Boss).expect("boss").hittable);
        let out = boss.fixed_update(&mut physics, false);
        assert_eq!(boss.last_path(), "Root/DEATH/END");
        assert!(out.intents.is_empty());
        assert!(!boss.is_alive());
    }
}
