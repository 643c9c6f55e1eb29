use std::ops::{Add, Mul, Sub};

use serde::Deserialize;

use super::input::{ActionStates, InputAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneCommand {
    None,
    Quit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (other - self).length()
    }

    /// Linear interpolation with `t` clamped to `[0, 1]`.
    pub fn lerp(self, target: Vec2, t: f32) -> Vec2 {
        let t = t.clamp(0.0, 1.0);
        self + (target - self) * t
    }

    /// Quadratic Bezier point for `t` clamped to `[0, 1]`.
    pub fn quadratic_bezier(p0: Vec2, p1: Vec2, p2: Vec2, t: f32) -> Vec2 {
        let t = t.clamp(0.0, 1.0);
        let inv = 1.0 - t;
        p0 * (inv * inv) + p1 * (2.0 * inv * t) + p2 * (t * t)
    }

    pub fn rotated(self, radians: f32) -> Vec2 {
        let (sin, cos) = radians.sin_cos();
        Vec2 {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
        }
    }

    pub fn normalized_or_zero(self) -> Vec2 {
        let len = self.length();
        if len <= f32::EPSILON {
            Vec2::ZERO
        } else {
            self * (1.0 / len)
        }
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSnapshot {
    quit_requested: bool,
    held: ActionStates,
    pressed: ActionStates,
}

impl InputSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_quit_requested(mut self, quit_requested: bool) -> Self {
        self.quit_requested = quit_requested;
        self
    }

    pub fn with_action_down(mut self, action: InputAction, is_down: bool) -> Self {
        self.held.set(action, is_down);
        self
    }

    /// Marks a press edge; a pressed action is also held for the tick.
    pub fn with_action_pressed(mut self, action: InputAction) -> Self {
        self.pressed.set(action, true);
        self.held.set(action, true);
        self
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested || self.held.is_down(InputAction::Quit)
    }

    pub fn is_down(&self, action: InputAction) -> bool {
        self.held.is_down(action)
    }

    pub fn was_pressed(&self, action: InputAction) -> bool {
        self.pressed.is_down(action)
    }

    /// `-1.0`, `0.0` or `1.0` from the held move actions.
    pub fn horizontal_axis(&self) -> f32 {
        let mut axis = 0.0;
        if self.held.is_down(InputAction::MoveLeft) {
            axis -= 1.0;
        }
        if self.held.is_down(InputAction::MoveRight) {
            axis += 1.0;
        }
        axis
    }
}

/// One simulation scene driven by the headless loop.
///
/// Per loop iteration the runner calls `fixed_update` zero or more times, then
/// `update` once and `late_update` once.
pub trait Scene {
    fn load(&mut self) -> Result<(), String> {
        Ok(())
    }
    fn fixed_update(&mut self, fixed_dt_seconds: f32, input: &InputSnapshot) -> SceneCommand;
    fn update(&mut self, _frame_dt_seconds: f32, _input: &InputSnapshot) -> SceneCommand {
        SceneCommand::None
    }
    /// Returns how many main-thread callbacks were drained this frame.
    fn late_update(&mut self, _frame_dt_seconds: f32) -> usize {
        0
    }
    fn unload(&mut self) {}
}
