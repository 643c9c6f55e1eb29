use magic_engine::ai::{AxisHooks, AxisState, AxisStep, CountdownTimer, StateAxis};
use magic_engine::{CharacterDef, InputAction, InputSnapshot, Vec2};
use tracing::debug;

use super::attack::{execute_attack, Arsenal};
use super::events::{ActorId, AttackOrigin, CombatEventBus, CombatIntentQueue};
use super::health::Health;
use super::physics::{Body, SpatialQuery};

const INPUT_EPSILON: f32 = 1e-3;

/// Horizontal axis: locomotion, attacks and hit reactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MoveState {
    Idle,
    Move,
    Attack,
    Damaged,
    Death,
}

impl AxisState for MoveState {
    fn is_terminal(self) -> bool {
        self == MoveState::Death
    }
}

/// Vertical axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JumpState {
    ReadyToJump,
    InFlight,
    Death,
}

impl AxisState for JumpState {
    fn is_terminal(self) -> bool {
        self == JumpState::Death
    }
}

/// Fields both axes read and write. The axes never look at each other.
#[derive(Debug, Clone)]
struct PlayerCore {
    move_speed: f32,
    jump_force: f32,
    hit_recovery_secs: f32,
    attack_recovery_secs: f32,
    landing_margin: f32,
    facing: f32,
    input_x: f32,
    jump_requested: bool,
    pending_knockback: Vec2,
    hit_recovery: CountdownTimer,
    attack_recovery: CountdownTimer,
}

/// Hook target for one axis step: the shared fields plus the physics body.
struct PlayerMotor<'a> {
    core: &'a mut PlayerCore,
    body: &'a mut Body,
}

impl AxisHooks<MoveState> for PlayerMotor<'_> {
    fn enter(&mut self, _from: MoveState, to: MoveState) {
        match to {
            MoveState::Death => {
                self.body.velocity = Vec2::ZERO;
                self.core.jump_requested = false;
            }
            MoveState::Damaged => {
                self.body.velocity = Vec2::ZERO;
                self.body.add_impulse(self.core.pending_knockback);
                self.core.pending_knockback = Vec2::ZERO;
                self.core.hit_recovery.start(self.core.hit_recovery_secs);
            }
            MoveState::Attack => {
                self.core.attack_recovery.start(self.core.attack_recovery_secs);
            }
            MoveState::Idle | MoveState::Move => {}
        }
    }
}

impl AxisHooks<JumpState> for PlayerMotor<'_> {
    fn enter(&mut self, _from: JumpState, to: JumpState) {
        match to {
            JumpState::InFlight => {
                self.body.velocity.y = self.core.jump_force;
                self.body.grounded = false;
                self.core.jump_requested = false;
            }
            JumpState::Death => self.core.jump_requested = false,
            JumpState::ReadyToJump => {}
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Player {
    motion: StateAxis<MoveState>,
    jump: StateAxis<JumpState>,
    core: PlayerCore,
    arsenal: Arsenal,
    health: Health,
}

impl Player {
    pub(crate) fn new(def: &CharacterDef, landing_margin: f32) -> Self {
        Self {
            motion: StateAxis::new("player.move", MoveState::Idle),
            jump: StateAxis::new("player.jump", JumpState::ReadyToJump),
            core: PlayerCore {
                move_speed: def.move_speed,
                jump_force: def.jump_force,
                hit_recovery_secs: def.hit_recovery,
                attack_recovery_secs: def.attack_recovery,
                landing_margin,
                facing: 1.0,
                input_x: 0.0,
                jump_requested: false,
                pending_knockback: Vec2::ZERO,
                hit_recovery: CountdownTimer::ready(),
                attack_recovery: CountdownTimer::ready(),
            },
            arsenal: Arsenal::from_defs(&def.attacks),
            health: Health::from_def(ActorId::Player, def),
        }
    }

    pub(crate) fn move_state(&self) -> MoveState {
        self.motion.current()
    }

    pub(crate) fn jump_state(&self) -> JumpState {
        self.jump.current()
    }

    pub(crate) fn facing(&self) -> f32 {
        self.core.facing
    }

    pub(crate) fn health(&self) -> &Health {
        &self.health
    }

    pub(crate) fn health_mut(&mut self) -> &mut Health {
        &mut self.health
    }

    /// Input is ignored while stunned by a hit or dead.
    pub(crate) fn can_control(&self) -> bool {
        self.health.is_alive() && self.core.hit_recovery.is_ready()
    }

    /// Accepted only while standing on the ready-to-jump axis.
    pub(crate) fn request_jump(&mut self) -> bool {
        if !self.can_control() || self.jump.is(JumpState::InFlight) {
            return false;
        }
        self.core.jump_requested = true;
        true
    }

    /// Fires `slot`; refused while the previous attack is still recovering.
    pub(crate) fn attack(
        &mut self,
        slot: usize,
        world: &dyn SpatialQuery,
        intents: &mut CombatIntentQueue,
        events: &mut CombatEventBus,
    ) -> bool {
        if !self.can_control() || !self.core.attack_recovery.is_ready() {
            return false;
        }
        let Some(position) = world.position(ActorId::Player) else {
            return false;
        };
        let origin = AttackOrigin {
            attacker: ActorId::Player,
            position,
            facing: self.core.facing,
            target: ActorId::Boss,
        };
        execute_attack(&mut self.arsenal, slot, origin, world, intents, events)
    }

    /// Reads jump and attack presses for this tick. Returns the attack slot
    /// pressed, if any.
    pub(crate) fn read_buttons(&mut self, input: &InputSnapshot) -> Option<usize> {
        if input.was_pressed(InputAction::Jump) {
            self.request_jump();
        }
        [InputAction::Attack, InputAction::SkillW, InputAction::SkillE]
            .into_iter()
            .find(|action| input.was_pressed(*action))
            .and_then(InputAction::attack_slot)
    }

    pub(crate) fn on_hit(&mut self, knockback: Vec2) {
        if !self.core.hit_recovery.is_ready() {
            debug!(remaining = self.core.hit_recovery.remaining(), "player_hit_ignored");
            return;
        }
        self.core.pending_knockback = knockback;
        self.motion.enqueue(MoveState::Damaged);
    }

    pub(crate) fn on_death(&mut self) {
        self.motion.enqueue(MoveState::Death);
        self.jump.enqueue(JumpState::Death);
    }

    pub(crate) fn on_attack_fired(&mut self) {
        if self.core.attack_recovery.is_ready() {
            self.motion.enqueue(MoveState::Attack);
        }
    }

    /// Vertical axis first, then horizontal. Each axis drains its buffer,
    /// takes at most one derived transition, then runs its state update.
    pub(crate) fn fixed_update(&mut self, input: &InputSnapshot, body: &mut Body) {
        self.core.input_x = if self.can_control() {
            input.horizontal_axis()
        } else {
            0.0
        };
        let mut motor = PlayerMotor {
            core: &mut self.core,
            body,
        };

        if self.jump.drain_pending(&mut motor) == AxisStep::Continue {
            let next = match self.jump.current() {
                JumpState::InFlight
                    if motor.body.velocity.y <= INPUT_EPSILON + motor.core.landing_margin
                        && motor.body.grounded =>
                {
                    Some(JumpState::ReadyToJump)
                }
                JumpState::ReadyToJump if motor.core.jump_requested && motor.body.grounded => {
                    Some(JumpState::InFlight)
                }
                _ => None,
            };
            if let Some(next) = next {
                self.jump.change(next, &mut motor);
            }
        }

        if self.motion.drain_pending(&mut motor) == AxisStep::Terminal {
            return;
        }
        let moving = motor.core.input_x.abs() > INPUT_EPSILON;
        let next = match self.motion.current() {
            MoveState::Damaged => Some(MoveState::Idle),
            MoveState::Attack if motor.core.attack_recovery.is_ready() => Some(MoveState::Idle),
            MoveState::Move if !moving => Some(MoveState::Idle),
            MoveState::Idle if moving => Some(MoveState::Move),
            _ => None,
        };
        if let Some(next) = next {
            self.motion.change(next, &mut motor);
        }

        let core = motor.core;
        match self.motion.current() {
            MoveState::Move => {
                core.facing = core.input_x.signum();
                if core.hit_recovery.is_ready() {
                    motor.body.velocity.x = core.input_x * core.move_speed;
                }
            }
            MoveState::Idle if core.hit_recovery.is_ready() => motor.body.velocity.x = 0.0,
            _ => {}
        }
    }

    pub(crate) fn update(&mut self, dt: f32) {
        self.core.hit_recovery.tick(dt);
        self.core.attack_recovery.tick(dt);
        self.arsenal.tick(dt);
        self.health.tick(dt);
    }
}
