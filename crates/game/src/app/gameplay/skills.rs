use std::collections::VecDeque;

use magic_engine::ai::{CountdownTimer, ObjectPool};
use magic_engine::{AttackDef, AttackKind, Vec2};
use tracing::{debug, info, warn};

use super::attack::knockback_vector;
use super::events::{ActorId, AttackOrigin, CombatIntent, CombatIntentQueue};
use super::physics::SpatialQuery;
use crate::app::config::OrbitConfig;

const PROJECTILE_SPAWN_OFFSET: f32 = 0.5;
const PROJECTILE_RADIUS: f32 = 0.25;
const AOE_PROBE_RADIUS: f32 = 0.2;
const AOE_HIT_RADIUS: f32 = 1.0;
const ORBIT_RADIUS: f32 = 0.3;
const WALL_PROBE_SIZE: Vec2 = Vec2 { x: 0.1, y: 0.1 };
const POOL_PREWARM: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Motion {
    Idle,
    Projectile {
        spawn: Vec2,
        direction: f32,
    },
    Aoe {
        struck: bool,
    },
    Orbit {
        start: Vec2,
        control: Vec2,
        end: Vec2,
        progress: f32,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SkillStep {
    pub(crate) hit: bool,
    pub(crate) finished: bool,
}

/// One pooled projectile, area effect or orbiting shard.
#[derive(Debug, Clone)]
pub(crate) struct SkillInstance {
    owner: ActorId,
    target: ActorId,
    attack: Option<AttackDef>,
    position: Vec2,
    life: CountdownTimer,
    elapsed: f32,
    motion: Motion,
}

impl Default for SkillInstance {
    fn default() -> Self {
        Self {
            owner: ActorId::Player,
            target: ActorId::Boss,
            attack: None,
            position: Vec2::ZERO,
            life: CountdownTimer::ready(),
            elapsed: 0.0,
            motion: Motion::Idle,
        }
    }
}

impl SkillInstance {
    fn reset(&mut self, origin: &AttackOrigin, attack: &AttackDef, position: Vec2, motion: Motion) {
        self.owner = origin.attacker;
        self.target = origin.target;
        self.attack = Some(attack.clone());
        self.position = position;
        self.life = CountdownTimer::started(attack.lifetime);
        self.elapsed = 0.0;
        self.motion = motion;
    }

    pub(crate) fn init_projectile(&mut self, origin: &AttackOrigin, attack: &AttackDef) {
        let direction = origin.facing.signum();
        let spawn = origin.position + Vec2::new(direction * PROJECTILE_SPAWN_OFFSET, 0.0);
        self.reset(origin, attack, spawn, Motion::Projectile { spawn, direction });
    }

    /// Lands on the first target found ahead within range, else at max range.
    pub(crate) fn init_aoe(
        &mut self,
        origin: &AttackOrigin,
        attack: &AttackDef,
        world: &dyn SpatialQuery,
    ) {
        let direction = origin.facing.signum();
        let mut position = origin.position;
        match world.circle_cast(
            origin.position,
            AOE_PROBE_RADIUS,
            direction,
            attack.range,
            origin.target,
        ) {
            Some(found) => position.x = found.x,
            None => position.x += direction * attack.range,
        }
        self.reset(origin, attack, position, Motion::Aoe { struck: false });
    }

    /// Quadratic Bezier from `spawn` to `range` along `up`, bowed against
    /// its right-hand side by `curve_offset`.
    pub(crate) fn init_orbit(
        &mut self,
        origin: &AttackOrigin,
        attack: &AttackDef,
        spawn: Vec2,
        up: Vec2,
        curve_offset: f32,
    ) {
        let end = spawn + up * attack.range;
        let mid = (spawn + end) * 0.5;
        let right = Vec2::new(up.y, -up.x);
        let control = mid - right * curve_offset;
        self.reset(
            origin,
            attack,
            spawn,
            Motion::Orbit {
                start: spawn,
                control,
                end,
                progress: 0.0,
            },
        );
    }

    #[cfg(test)]
    pub(crate) fn position(&self) -> Vec2 {
        self.position
    }

    /// Moves the instance one fixed step and checks its hitbox.
    pub(crate) fn advance(&mut self, dt: f32, world: &dyn SpatialQuery) -> SkillStep {
        let Some(attack) = self.attack.as_ref() else {
            return SkillStep {
                hit: false,
                finished: true,
            };
        };
        self.life.tick(dt);
        self.elapsed += dt;
        if self.life.is_ready() {
            return SkillStep {
                hit: false,
                finished: true,
            };
        }

        match &mut self.motion {
            Motion::Idle => SkillStep {
                hit: false,
                finished: true,
            },
            Motion::Projectile { spawn, direction } => {
                if (self.position.x - spawn.x).abs() > attack.range {
                    return SkillStep {
                        hit: false,
                        finished: true,
                    };
                }
                self.position.x += *direction * attack.projectile_speed * dt;
                if world.overlap_circle(self.position, PROJECTILE_RADIUS, self.target) {
                    return SkillStep {
                        hit: true,
                        finished: true,
                    };
                }
                SkillStep {
                    hit: false,
                    finished: world.overlaps_wall(self.position, WALL_PROBE_SIZE),
                }
            }
            Motion::Aoe { struck } => {
                let normalized = self.elapsed / attack.lifetime.max(f32::EPSILON);
                let (window_start, window_end) = attack.hit_window;
                if normalized >= window_end {
                    return SkillStep {
                        hit: false,
                        finished: true,
                    };
                }
                let hit = normalized >= window_start
                    && !*struck
                    && world.overlap_circle(self.position, AOE_HIT_RADIUS, self.target);
                if hit {
                    *struck = true;
                }
                SkillStep {
                    hit,
                    finished: false,
                }
            }
            Motion::Orbit {
                start,
                control,
                end,
                progress,
            } => {
                *progress += dt * attack.projectile_speed;
                if *progress >= 1.0 {
                    return SkillStep {
                        hit: false,
                        finished: true,
                    };
                }
                self.position = Vec2::quadratic_bezier(*start, *control, *end, *progress);
                let hit = world.overlap_circle(self.position, ORBIT_RADIUS, self.target);
                SkillStep {
                    hit,
                    finished: hit,
                }
            }
        }
    }

    fn hit_intent(&self, world: &dyn SpatialQuery) -> Option<CombatIntent> {
        let attack = self.attack.as_ref()?;
        let from = world.position(self.owner).unwrap_or(self.position);
        let to = world.position(self.target).unwrap_or(self.position);
        Some(CombatIntent::ApplyHit {
            target: self.target,
            damage: attack.damage,
            knockback: knockback_vector(from, to, attack.knockback),
        })
    }
}

/// Staggered multi-point spawner. Each round initializes one queued instance
/// per spawn point, then waits `spawn_cooldown` before the next round while
/// the spawn ring keeps rotating around its owner.
#[derive(Debug)]
pub(crate) struct OrbitSpawner {
    config: OrbitConfig,
    queues: Vec<VecDeque<SkillInstance>>,
    origin: Option<AttackOrigin>,
    attack: Option<AttackDef>,
    countdown: CountdownTimer,
    /// Rounds already spawned; the next round resumes from here.
    round: usize,
    spawned: usize,
    total: usize,
    angle_degrees: f32,
}

impl OrbitSpawner {
    pub(crate) fn new(config: OrbitConfig) -> Self {
        Self {
            config,
            queues: Vec::new(),
            origin: None,
            attack: None,
            countdown: CountdownTimer::ready(),
            round: 0,
            spawned: 0,
            total: 0,
            angle_degrees: 0.0,
        }
    }

    pub(crate) fn instance_count(&self) -> usize {
        self.config.instances
    }

    pub(crate) fn is_spawning(&self) -> bool {
        self.origin.is_some()
    }

    #[cfg(test)]
    pub(crate) fn spawned(&self) -> usize {
        self.spawned
    }

    /// Distributes `instances` round-robin over the spawn points and spawns
    /// the first round immediately.
    pub(crate) fn start(
        &mut self,
        instances: Vec<SkillInstance>,
        origin: AttackOrigin,
        attack: AttackDef,
    ) -> Vec<SkillInstance> {
        let points = self.config.spawn_points.len().max(1);
        self.queues = (0..points).map(|_| VecDeque::new()).collect();
        self.total = instances.len();
        for (idx, instance) in instances.into_iter().enumerate() {
            self.queues[idx % points].push_back(instance);
        }
        self.origin = Some(origin);
        self.attack = Some(attack);
        self.countdown.clear();
        self.round = 0;
        self.spawned = 0;
        self.angle_degrees = 0.0;
        info!(instances = self.total, points, "orbit_spawn_started");
        self.tick(0.0, origin.position)
    }

    /// Advances the ring and the round countdown; returns instances spawned
    /// this step. `owner_position` is where the ring is centred now.
    pub(crate) fn tick(&mut self, dt: f32, owner_position: Vec2) -> Vec<SkillInstance> {
        let (Some(origin), Some(attack)) = (self.origin, self.attack.clone()) else {
            return Vec::new();
        };
        self.angle_degrees += self.config.rotation_speed * dt;
        if !self.countdown.is_ready() {
            self.countdown.tick(dt);
            return Vec::new();
        }

        let radians = self.angle_degrees.to_radians();
        let mut spawned = Vec::new();
        for (point, queue) in self.config.spawn_points.iter().zip(self.queues.iter_mut()) {
            let Some(mut instance) = queue.pop_front() else {
                continue;
            };
            let offset = point.rotated(radians);
            let up = match offset.normalized_or_zero() {
                up if up == Vec2::ZERO => Vec2::new(0.0, 1.0),
                up => up,
            };
            let mut ring_origin = origin;
            ring_origin.position = owner_position;
            instance.init_orbit(
                &ring_origin,
                &attack,
                owner_position + offset,
                up,
                self.config.curve_offset,
            );
            spawned.push(instance);
        }
        self.spawned += spawned.len();
        self.round += 1;
        self.countdown.start(self.config.spawn_cooldown);
        debug!(
            round = self.round,
            spawned = self.spawned,
            total = self.total,
            "orbit_round_spawned"
        );
        if self.queues.iter().all(VecDeque::is_empty) {
            self.finish();
        }
        spawned
    }

    /// Cancels the remaining rounds and hands back the unspawned instances.
    pub(crate) fn stop(&mut self) -> Vec<SkillInstance> {
        let leftover: Vec<SkillInstance> = self.queues.iter_mut().flat_map(|q| q.drain(..)).collect();
        if self.is_spawning() {
            info!(leftover = leftover.len(), "orbit_spawn_stopped");
        }
        self.finish();
        leftover
    }

    fn finish(&mut self) {
        self.origin = None;
        self.attack = None;
        self.queues.clear();
    }
}

/// Owns the instance pool, the live instances and the boss's orbit spawner.
#[derive(Debug)]
pub(crate) struct SkillSystem {
    pool: ObjectPool<SkillInstance>,
    active: Vec<SkillInstance>,
    orbit: OrbitSpawner,
}

impl SkillSystem {
    pub(crate) fn new(orbit: OrbitConfig) -> Self {
        Self {
            pool: ObjectPool::new(POOL_PREWARM, SkillInstance::default),
            active: Vec::new(),
            orbit: OrbitSpawner::new(orbit),
        }
    }

    pub(crate) fn active(&self) -> &[SkillInstance] {
        &self.active
    }

    pub(crate) fn pooled(&self) -> usize {
        self.pool.available()
    }

    pub(crate) fn is_orbit_spawning(&self) -> bool {
        self.orbit.is_spawning()
    }

    pub(crate) fn spawn(
        &mut self,
        origin: AttackOrigin,
        attack: AttackDef,
        world: &dyn SpatialQuery,
    ) {
        match attack.kind {
            AttackKind::Projectile => {
                let mut instance = self.pool.acquire();
                instance.init_projectile(&origin, &attack);
                self.active.push(instance);
            }
            AttackKind::Aoe => {
                let mut instance = self.pool.acquire();
                instance.init_aoe(&origin, &attack, world);
                self.active.push(instance);
            }
            AttackKind::Orbit => {
                if self.orbit.is_spawning() {
                    warn!(
                        attacker = origin.attacker.as_token(),
                        "orbit_spawn_already_running"
                    );
                    return;
                }
                let instances = self.pool.acquire_many(self.orbit.instance_count());
                let first = self.orbit.start(instances, origin, attack);
                self.active.extend(first);
            }
            AttackKind::Melee => {
                warn!(attacker = origin.attacker.as_token(), "melee_has_no_skill_instance");
            }
        }
    }

    /// Cancels the orbit spawner of `owner` and returns its queued instances.
    pub(crate) fn cancel_owner(&mut self, owner: ActorId) {
        if self
            .orbit
            .origin
            .is_some_and(|origin| origin.attacker == owner)
        {
            for instance in self.orbit.stop() {
                self.pool.release(instance);
            }
        }
    }

    pub(crate) fn fixed_update(
        &mut self,
        dt: f32,
        world: &dyn SpatialQuery,
        intents: &mut CombatIntentQueue,
    ) {
        if let Some(owner) = self.orbit.origin.map(|origin| origin.attacker) {
            let center = world.position(owner).unwrap_or(Vec2::ZERO);
            let spawned = self.orbit.tick(dt, center);
            self.active.extend(spawned);
        }

        let mut idx = 0;
        while idx < self.active.len() {
            let step = self.active[idx].advance(dt, world);
            if step.hit {
                if let Some(intent) = self.active[idx].hit_intent(world) {
                    intents.push(intent);
                }
            }
            if step.finished {
                let mut instance = self.active.swap_remove(idx);
                instance.attack = None;
                instance.motion = Motion::Idle;
                self.pool.release(instance);
            } else {
                idx += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::ArenaConfig;
    use crate::app::gameplay::physics::{ArenaPhysics, Body};

    fn attack(kind: AttackKind) -> AttackDef {
        AttackDef {
            kind,
            damage: 5.0,
            cooldown: 1.0,
            range: 4.0,
            knockback: Vec2::new(1.0, 1.0),
            projectile_speed: 10.0,
            lifetime: 2.0,
            hit_window: (0.25, 0.75),
        }
    }

    fn origin(attacker: ActorId, target: ActorId, x: f32, facing: f32) -> AttackOrigin {
        AttackOrigin {
            attacker,
            position: Vec2::new(x, 1.0),
            facing,
            target,
        }
    }

    fn world(boss_x: f32) -> ArenaPhysics {
        let mut physics = ArenaPhysics::new(ArenaConfig::default());
        physics.insert(
            ActorId::Player,
            Body::dynamic(Vec2::new(0.0, 1.0), Vec2::new(0.3, 0.5)),
        );
        physics.insert(
            ActorId::Boss,
            Body::dynamic(Vec2::new(boss_x, 1.0), Vec2::new(0.5, 1.0)),
        );
        physics
    }

    fn orbit_config(points: usize) -> OrbitConfig {
        OrbitConfig {
            instances: 5,
            spawn_points: (0..points).map(|i| Vec2::new(1.0, i as f32)).collect(),
            spawn_cooldown: 0.5,
            rotation_speed: 90.0,
            curve_offset: 1.0,
        }
    }

    #[test]
    fn projectile_hits_target_and_returns_to_pool() {
        let physics = world(2.0);
        let mut system = SkillSystem::new(orbit_config(1));
        let before = system.pooled();
        system.spawn(
            origin(ActorId::Player, ActorId::Boss, 0.0, 1.0),
            attack(AttackKind::Projectile),
            &physics,
        );
        assert_eq!(system.active().len(), 1);

        let mut intents = CombatIntentQueue::default();
        for _ in 0..30 {
            system.fixed_update(1.0 / 60.0, &physics, &mut intents);
        }
        assert!(system.active().is_empty());
        assert_eq!(system.pooled(), before);
        assert!(matches!(
            intents.drain_current_tick().as_slice(),
            [CombatIntent::ApplyHit { target: ActorId::Boss, knockback, .. }] if knockback.x > 0.0
        ));
    }

    #[test]
    fn projectile_expires_past_range() {
        let physics = world(11.0);
        let mut instance = SkillInstance::default();
        instance.init_projectile(
            &origin(ActorId::Player, ActorId::Boss, 0.0, 1.0),
            &attack(AttackKind::Projectile),
        );
        let mut finished = false;
        for _ in 0..60 {
            let step = instance.advance(1.0 / 60.0, &physics);
            assert!(!step.hit);
            if step.finished {
                finished = true;
                break;
            }
        }
        assert!(finished);
        assert!(instance.position().x <= 4.5 + 0.2);
    }

    #[test]
    fn aoe_lands_on_target_and_hits_once_inside_window() {
        let physics = world(3.0);
        let mut instance = SkillInstance::default();
        instance.init_aoe(
            &origin(ActorId::Player, ActorId::Boss, 0.0, 1.0),
            &attack(AttackKind::Aoe),
            &physics,
        );
        assert!((instance.position().x - 3.0).abs() < 1e-5);

        let mut hits = 0;
        let mut steps = 0;
        loop {
            let step = instance.advance(0.1, &physics);
            steps += 1;
            if step.hit {
                hits += 1;
                assert!(steps >= 5);
            }
            if step.finished {
                break;
            }
        }
        assert_eq!(hits, 1);
        assert!((15..=16).contains(&steps));
    }

    #[test]
    fn aoe_without_target_lands_at_max_range() {
        let physics = world(9.0);
        let mut instance = SkillInstance::default();
        instance.init_aoe(
            &origin(ActorId::Player, ActorId::Boss, 0.0, -1.0),
            &attack(AttackKind::Aoe),
            &physics,
        );
        assert!((instance.position().x + 4.0).abs() < 1e-5);
    }

    #[test]
    fn orbit_spawner_releases_rounds_on_countdown() {
        let mut spawner = OrbitSpawner::new(orbit_config(2));
        let instances = vec![SkillInstance::default(); 5];
        let first = spawner.start(
            instances,
            origin(ActorId::Boss, ActorId::Player, 5.0, -1.0),
            attack(AttackKind::Orbit),
        );
        assert_eq!(first.len(), 2);
        assert!(spawner.is_spawning());

        assert!(spawner.tick(0.3, Vec2::new(5.0, 1.0)).is_empty());
        assert!(spawner.tick(0.3, Vec2::new(5.0, 1.0)).is_empty());
        let second = spawner.tick(0.1, Vec2::new(5.0, 1.0));
        assert_eq!(second.len(), 2);
        assert!(spawner.is_spawning());

        spawner.tick(0.6, Vec2::new(5.0, 1.0));
        let third = spawner.tick(0.1, Vec2::new(5.0, 1.0));
        assert_eq!(third.len(), 1);
        assert_eq!(spawner.spawned(), 5);
        assert!(!spawner.is_spawning());
    }

    #[test]
    fn orbit_stop_returns_unspawned_instances() {
        let mut spawner = OrbitSpawner::new(orbit_config(1));
        spawner.start(
            vec![SkillInstance::default(); 3],
            origin(ActorId::Boss, ActorId::Player, 5.0, -1.0),
            attack(AttackKind::Orbit),
        );
        let leftover = spawner.stop();
        assert_eq!(leftover.len(), 2);
        assert!(!spawner.is_spawning());
    }

    #[test]
    fn orbit_instance_follows_bezier_to_its_end() {
        let physics = world(-9.0);
        let mut instance = SkillInstance::default();
        let mut orbit = attack(AttackKind::Orbit);
        orbit.projectile_speed = 1.0;
        instance.init_orbit(
            &origin(ActorId::Boss, ActorId::Player, 5.0, -1.0),
            &orbit,
            Vec2::new(5.0, 3.0),
            Vec2::new(0.0, 1.0),
            1.0,
        );
        let step = instance.advance(0.5, &physics);
        assert!(!step.finished);
        // Midpoint of the curve bows toward -x by half the offset.
        assert!((instance.position().x - 4.5).abs() < 1e-4);
        assert!((instance.position().y - 5.0).abs() < 1e-4);
        assert!(instance.advance(0.6, &physics).finished);
    }

    #[test]
    fn second_orbit_cast_is_skipped_while_spawning() {
        let physics = world(5.0);
        let mut system = SkillSystem::new(orbit_config(2));
        let boss = origin(ActorId::Boss, ActorId::Player, 5.0, -1.0);
        system.spawn(boss, attack(AttackKind::Orbit), &physics);
        assert!(system.is_orbit_spawning());
        let active = system.active().len();
        system.spawn(boss, attack(AttackKind::Orbit), &physics);
        assert_eq!(system.active().len(), active);

        system.cancel_owner(ActorId::Boss);
        assert!(!system.is_orbit_spawning());
    }
}
