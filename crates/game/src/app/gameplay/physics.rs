use std::collections::BTreeMap;

use magic_engine::Vec2;

use super::events::ActorId;
use crate::app::config::ArenaConfig;

const GROUND_FRICTION_PER_SECOND: f32 = 8.0;
const CONTACT_EPSILON: f32 = 1e-3;

/// Collision queries against the arena and the live actors. Anything that
/// needs to look at the world during AI or attack resolution goes through
/// this seam.
pub(crate) trait SpatialQuery {
    fn position(&self, actor: ActorId) -> Option<Vec2>;
    /// True when the circle touches `target`'s hitbox.
    fn overlap_circle(&self, center: Vec2, radius: f32, target: ActorId) -> bool;
    /// Sweeps a box horizontally by `direction * distance`.
    fn box_cast(
        &self,
        origin: Vec2,
        size: Vec2,
        direction: f32,
        distance: f32,
        target: ActorId,
    ) -> bool;
    /// Position of `target` if a horizontal circle sweep reaches it.
    fn circle_cast(
        &self,
        origin: Vec2,
        radius: f32,
        direction: f32,
        distance: f32,
        target: ActorId,
    ) -> Option<Vec2>;
    fn overlaps_wall(&self, center: Vec2, size: Vec2) -> bool;
    fn overlaps_ground(&self, center: Vec2, size: Vec2) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Body {
    pub(crate) position: Vec2,
    pub(crate) velocity: Vec2,
    pub(crate) half_extents: Vec2,
    pub(crate) grounded: bool,
    /// Kinematic bodies ignore gravity and are moved by their controller.
    pub(crate) kinematic: bool,
    /// Corpses stay in the world but no longer collide with attacks.
    pub(crate) hittable: bool,
}

impl Body {
    pub(crate) fn dynamic(position: Vec2, half_extents: Vec2) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            half_extents,
            grounded: false,
            kinematic: false,
            hittable: true,
        }
    }

    pub(crate) fn kinematic(position: Vec2, half_extents: Vec2) -> Self {
        Self {
            kinematic: true,
            hittable: false,
            ..Self::dynamic(position, half_extents)
        }
    }

    pub(crate) fn add_impulse(&mut self, impulse: Vec2) {
        self.velocity = self.velocity + impulse;
    }

    fn min(&self) -> Vec2 {
        self.position - self.half_extents
    }

    fn max(&self) -> Vec2 {
        self.position + self.half_extents
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ArenaPhysics {
    arena: ArenaConfig,
    bodies: BTreeMap<ActorId, Body>,
}

impl ArenaPhysics {
    pub(crate) fn new(arena: ArenaConfig) -> Self {
        Self {
            arena,
            bodies: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, actor: ActorId, body: Body) {
        self.bodies.insert(actor, body);
    }

    pub(crate) fn body(&self, actor: ActorId) -> Option<&Body> {
        self.bodies.get(&actor)
    }

    pub(crate) fn body_mut(&mut self, actor: ActorId) -> Option<&mut Body> {
        self.bodies.get_mut(&actor)
    }

    pub(crate) fn arena(&self) -> &ArenaConfig {
        &self.arena
    }

    pub(crate) fn integrate(&mut self, dt: f32) {
        let arena = self.arena;
        for body in self.bodies.values_mut() {
            if body.kinematic {
                continue;
            }
            if !body.grounded || body.velocity.y > 0.0 {
                body.velocity.y -= arena.gravity * dt;
            }
            body.position = body.position + body.velocity * dt;

            let min_x = arena.left_wall + body.half_extents.x;
            let max_x = arena.right_wall - body.half_extents.x;
            if body.position.x <= min_x {
                body.position.x = min_x;
                body.velocity.x = body.velocity.x.max(0.0);
            } else if body.position.x >= max_x {
                body.position.x = max_x;
                body.velocity.x = body.velocity.x.min(0.0);
            }

            let floor = arena.ground_y + body.half_extents.y;
            if body.position.y <= floor + CONTACT_EPSILON && body.velocity.y <= 0.0 {
                body.position.y = floor;
                body.velocity.y = 0.0;
                body.grounded = true;
            } else {
                body.grounded = false;
            }

            if body.grounded {
                let damping = (GROUND_FRICTION_PER_SECOND * dt).min(1.0);
                body.velocity.x -= body.velocity.x * damping;
            }
        }
    }

    fn hittable_body(&self, target: ActorId) -> Option<&Body> {
        self.bodies.get(&target).filter(|body| body.hittable)
    }
}

fn ranges_overlap(a_min: f32, a_max: f32, b_min: f32, b_max: f32) -> bool {
    a_min <= b_max && b_min <= a_max
}

fn swept_range(center: f32, half: f32, direction: f32, distance: f32) -> (f32, f32) {
    let travel = direction.signum() * distance.max(0.0);
    let start = center - half;
    let end = center + half;
    if travel >= 0.0 {
        (start, end + travel)
    } else {
        (start + travel, end)
    }
}

impl SpatialQuery for ArenaPhysics {
    fn position(&self, actor: ActorId) -> Option<Vec2> {
        self.bodies.get(&actor).map(|body| body.position)
    }

    fn overlap_circle(&self, center: Vec2, radius: f32, target: ActorId) -> bool {
        let Some(body) = self.hittable_body(target) else {
            return false;
        };
        let (min, max) = (body.min(), body.max());
        let closest = Vec2::new(center.x.clamp(min.x, max.x), center.y.clamp(min.y, max.y));
        closest.distance(center) <= radius
    }

    fn box_cast(
        &self,
        origin: Vec2,
        size: Vec2,
        direction: f32,
        distance: f32,
        target: ActorId,
    ) -> bool {
        let Some(body) = self.hittable_body(target) else {
            return false;
        };
        let (x_min, x_max) = swept_range(origin.x, size.x * 0.5, direction, distance);
        let (min, max) = (body.min(), body.max());
        ranges_overlap(x_min, x_max, min.x, max.x)
            && ranges_overlap(origin.y - size.y * 0.5, origin.y + size.y * 0.5, min.y, max.y)
    }

    fn circle_cast(
        &self,
        origin: Vec2,
        radius: f32,
        direction: f32,
        distance: f32,
        target: ActorId,
    ) -> Option<Vec2> {
        let size = Vec2::new(radius * 2.0, radius * 2.0);
        if self.box_cast(origin, size, direction, distance, target) {
            self.position(target)
        } else {
            None
        }
    }

    fn overlaps_wall(&self, center: Vec2, size: Vec2) -> bool {
        center.x - size.x * 0.5 <= self.arena.left_wall
            || center.x + size.x * 0.5 >= self.arena.right_wall
    }

    fn overlaps_ground(&self, center: Vec2, size: Vec2) -> bool {
        ranges_overlap(
            center.x - size.x * 0.5,
            center.x + size.x * 0.5,
            self.arena.left_wall,
            self.arena.right_wall,
        ) && ranges_overlap(
            center.y - size.y * 0.5,
            center.y + size.y * 0.5,
            self.arena.ground_y - 1.0,
            self.arena.ground_y,
        )
    }
}
