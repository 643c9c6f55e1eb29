use magic_engine::ai::{AxisHooks, AxisState, AxisStep, CountdownTimer, StateAxis};
use magic_engine::{CharacterDef, Vec2};
use tracing::{debug, info};

use super::events::ActorId;
use super::health::Health;
use crate::app::config::AllyConfig;

/// Follow distance under which the ally counts as arrived.
const ARRIVE_DISTANCE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum AllyState {
    Idle,
    Move,
    Shield,
    Invincible,
    Death,
}

impl AxisState for AllyState {
    fn is_terminal(self) -> bool {
        self == AllyState::Death
    }
}

impl AllyState {
    /// Parses the upper-case state names used by action definitions and tools.
    pub(crate) fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "IDLE" => Some(Self::Idle),
            "MOVE" => Some(Self::Move),
            "SHIELD" => Some(Self::Shield),
            "INVINCIBLE" => Some(Self::Invincible),
            "DEATH" => Some(Self::Death),
            _ => None,
        }
    }

    pub(crate) fn as_token(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Move => "MOVE",
            Self::Shield => "SHIELD",
            Self::Invincible => "INVINCIBLE",
            Self::Death => "DEATH",
        }
    }
}

/// Where the ally wants to be, derived from the player it follows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FollowTarget {
    pub(crate) position: Vec2,
    pub(crate) facing: f32,
}

#[derive(Debug, Clone)]
struct AllyCore {
    tuning: AllyConfig,
    move_speed: f32,
    position: Vec2,
    shield_duration: f32,
    shield_timer: CountdownTimer,
}

impl AllyCore {
    fn anchor(&self, target: FollowTarget, offset: Vec2) -> Vec2 {
        target.position + Vec2::new(offset.x * target.facing, offset.y)
    }
}

impl AxisHooks<AllyState> for AllyCore {
    fn enter(&mut self, _from: AllyState, to: AllyState) {
        match to {
            AllyState::Shield => {
                self.shield_timer.start(self.shield_duration);
                info!(duration = self.shield_duration, "ally_shield_raised");
            }
            AllyState::Death => info!("ally_died"),
            AllyState::Idle | AllyState::Move | AllyState::Invincible => {}
        }
    }
}

/// Companion that follows the player and casts what its triggers ask for.
#[derive(Debug, Clone)]
pub(crate) struct Ally {
    axis: StateAxis<AllyState>,
    core: AllyCore,
    health: Health,
}

impl Ally {
    pub(crate) fn new(def: &CharacterDef, tuning: AllyConfig, position: Vec2) -> Self {
        Self {
            axis: StateAxis::new("ally", AllyState::Idle),
            core: AllyCore {
                tuning,
                move_speed: def.move_speed,
                position,
                shield_duration: 0.0,
                shield_timer: CountdownTimer::ready(),
            },
            health: Health::from_def(ActorId::Ally, def),
        }
    }

    pub(crate) fn state(&self) -> AllyState {
        self.axis.current()
    }

    pub(crate) fn position(&self) -> Vec2 {
        self.core.position
    }

    pub(crate) fn health_mut(&mut self) -> &mut Health {
        &mut self.health
    }

    pub(crate) fn shield_remaining(&self) -> f32 {
        self.core.shield_timer.remaining()
    }

    /// Buffers a shield for at least the configured minimum duration. A shield
    /// that is already up restarts with the new duration.
    pub(crate) fn activate_shield(&mut self, duration: f32) {
        self.core.shield_duration = duration.max(self.core.tuning.min_shield_duration);
        if self.axis.current() == AllyState::Shield {
            self.core.shield_timer.start(self.core.shield_duration);
            debug!(duration = self.core.shield_duration, "ally_shield_refreshed");
            return;
        }
        debug!(duration = self.core.shield_duration, "ally_shield_requested");
        self.axis.enqueue(AllyState::Shield);
    }

    pub(crate) fn on_death(&mut self) {
        self.axis.enqueue(AllyState::Death);
    }

    pub(crate) fn update(&mut self, dt: f32) {
        self.core.shield_timer.tick(dt);
        self.health.tick(dt);
    }

    /// Runs after the frame's movement so the ally trails the player's final
    /// position for the frame.
    pub(crate) fn late_update(&mut self, dt: f32, target: FollowTarget) {
        if self.axis.drain_pending(&mut self.core) == AxisStep::Terminal {
            return;
        }

        let follow = self.core.anchor(target, self.core.tuning.follow_offset);
        let far = self.core.position.distance(follow) > ARRIVE_DISTANCE;
        let next = match self.axis.current() {
            AllyState::Shield if self.core.shield_timer.is_ready() => Some(AllyState::Idle),
            AllyState::Idle if far => Some(AllyState::Move),
            AllyState::Move if !far => Some(AllyState::Idle),
            _ => None,
        };
        if let Some(next) = next {
            self.axis.change(next, &mut self.core);
        }

        let core = &mut self.core;
        match self.axis.current() {
            AllyState::Move => {
                core.position = core.position.lerp(follow, core.move_speed * dt);
            }
            AllyState::Shield => {
                let anchor = core.anchor(target, core.tuning.shield_offset);
                let speed = core.move_speed * core.tuning.shield_follow_speed_multiplier;
                core.position = core.position.lerp(anchor, speed * dt);
            }
            AllyState::Idle | AllyState::Invincible | AllyState::Death => {}
        }
    }
}
