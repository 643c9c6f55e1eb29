use std::collections::VecDeque;

use magic_engine::inference::{ModelLoader, ModelSpec};
use magic_engine::llm::SessionState;
use magic_engine::{DefDatabase, InputSnapshot, Scene, SceneCommand, Vec2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::{debug, info};

use super::ally::{Ally, AllyState, FollowTarget};
use super::boss::Boss;
use super::chat::AllyChat;
use super::events::{
    ActorId, CombatEvent, CombatEventBus, CombatEventCounts, CombatIntent, CombatIntentQueue,
};
use super::health::Health;
use super::physics::{ArenaPhysics, Body};
use super::player::{JumpState, MoveState, Player};
use super::skills::SkillSystem;
use super::triggers::{AllyTriggers, TriggerInputs};
use crate::app::config::{DemoChat, GameConfig};

const PLAYER_HALF_EXTENTS: Vec2 = Vec2::new(0.35, 0.8);
const ALLY_HALF_EXTENTS: Vec2 = Vec2::new(0.3, 0.3);
const BOSS_HALF_EXTENTS: Vec2 = Vec2::new(0.7, 1.2);
const STATUS_LOG_INTERVAL_TICKS: u64 = 300;

#[derive(Debug, Error)]
pub(crate) enum SceneBuildError {
    #[error("character definition '{def_name}' for the {role} is missing")]
    MissingCharacter {
        role: &'static str,
        def_name: String,
    },
}

/// Point-in-time view of the battle for logs.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BattleStatus {
    pub(crate) tick: u64,
    pub(crate) player_move: MoveState,
    pub(crate) player_jump: JumpState,
    pub(crate) player_health: (f32, f32),
    pub(crate) ally: AllyState,
    pub(crate) shield_remaining: f32,
    pub(crate) boss_alive: bool,
    pub(crate) boss_health: (f32, f32),
    pub(crate) boss_path: String,
    pub(crate) boss_target: Option<ActorId>,
    pub(crate) boss_facing: f32,
    pub(crate) active_skills: usize,
    pub(crate) pooled_skills: usize,
    pub(crate) chat_session: Option<SessionState>,
    pub(crate) chat_lines: usize,
    pub(crate) triggers: usize,
}

impl BattleStatus {
    fn report(&self) {
        info!(
            tick = self.tick,
            player_move = ?self.player_move,
            player_jump = ?self.player_jump,
            player_health = self.player_health.0,
            player_max_health = self.player_health.1,
            ally = ?self.ally,
            shield_remaining = self.shield_remaining,
            boss_alive = self.boss_alive,
            boss_health = self.boss_health.0,
            boss_max_health = self.boss_health.1,
            boss_path = %self.boss_path,
            boss_target = ?self.boss_target,
            boss_facing = self.boss_facing,
            active_skills = self.active_skills,
            pooled_skills = self.pooled_skills,
            chat_session = ?self.chat_session,
            chat_lines = self.chat_lines,
            triggers = self.triggers,
            "battle_status"
        );
    }
}

/// Model the scene starts when it loads.
pub(crate) struct PendingModel {
    pub(crate) loader: Box<dyn ModelLoader>,
    pub(crate) spec: ModelSpec,
}

/// The one battle: player, ally and boss in a walled arena.
pub(crate) struct BattleScene {
    physics: ArenaPhysics,
    player: Player,
    ally: Ally,
    boss: Boss,
    skills: SkillSystem,
    events: CombatEventBus,
    intents: CombatIntentQueue,
    chat: AllyChat,
    chat_script: VecDeque<DemoChat>,
    pending_model: Option<PendingModel>,
    tick: u64,
    last_counts: CombatEventCounts,
}

impl BattleScene {
    pub(crate) fn new(
        config: &GameConfig,
        database: &DefDatabase,
        model: Option<PendingModel>,
        seed: u64,
    ) -> Result<Self, SceneBuildError> {
        let character = |role: &'static str, def_name: &str| {
            database
                .character(def_name)
                .ok_or_else(|| SceneBuildError::MissingCharacter {
                    role,
                    def_name: def_name.to_string(),
                })
        };
        let player_def = character("player", &config.player.def_name)?;
        let ally_def = character("ally", &config.ally.def_name)?;
        let boss_def = character("boss", &config.boss.def_name)?;

        let ally_spawn = config.player.spawn + config.ally.follow_offset;
        let mut physics = ArenaPhysics::new(config.arena);
        physics.insert(
            ActorId::Player,
            Body::dynamic(config.player.spawn, PLAYER_HALF_EXTENTS),
        );
        physics.insert(ActorId::Ally, Body::kinematic(ally_spawn, ALLY_HALF_EXTENTS));
        physics.insert(
            ActorId::Boss,
            Body::dynamic(config.boss.spawn, BOSS_HALF_EXTENTS),
        );

        let triggers = AllyTriggers::new(database, StdRng::seed_from_u64(seed.wrapping_add(1)));
        let chat = AllyChat::new(
            &config.llm,
            config.messages.clone(),
            triggers,
            StdRng::seed_from_u64(seed.wrapping_add(2)),
        );
        let boss = Boss::new(
            boss_def,
            config.boss.clone(),
            physics.clone(),
            StdRng::seed_from_u64(seed),
        );

        let mut chat_script: Vec<DemoChat> = config.demo.chat.clone();
        chat_script.sort_by_key(|line| line.tick);

        Ok(Self {
            player: Player::new(player_def, config.player.landing_velocity_margin),
            ally: Ally::new(ally_def, config.ally.clone(), ally_spawn),
            boss,
            skills: SkillSystem::new(config.boss.orbit.clone()),
            events: CombatEventBus::default(),
            intents: CombatIntentQueue::default(),
            chat,
            chat_script: chat_script.into(),
            pending_model: model,
            physics,
            tick: 0,
            last_counts: CombatEventCounts::default(),
        })
    }

    pub(crate) fn status(&self) -> BattleStatus {
        let health = |health: &Health| (health.current(), health.max());
        BattleStatus {
            tick: self.tick,
            player_move: self.player.move_state(),
            player_jump: self.player.jump_state(),
            player_health: health(self.player.health()),
            ally: self.ally.state(),
            shield_remaining: self.ally.shield_remaining(),
            boss_alive: self.boss.is_alive(),
            boss_health: health(self.boss.health()),
            boss_path: self.boss.last_path().to_string(),
            boss_target: self.boss.target(),
            boss_facing: self.boss.facing(),
            active_skills: self.skills.active().len(),
            pooled_skills: self.skills.pooled(),
            chat_session: self.chat.sessions().session_state(self.chat.session_id()),
            chat_lines: self.chat.log().lines().len(),
            triggers: self.chat.triggers().registry().len(),
        }
    }

    fn deliver_chat_script(&mut self) {
        while self
            .chat_script
            .front()
            .is_some_and(|line| line.tick <= self.tick)
        {
            if let Some(line) = self.chat_script.pop_front() {
                info!(tick = self.tick, text = %line.text, "player_chat");
                self.chat.receive_user_chat(&line.text);
            }
        }
    }

    fn resolve_intents(&mut self) {
        for intent in self.intents.drain_current_tick() {
            match intent {
                CombatIntent::ApplyHit {
                    target,
                    damage,
                    knockback,
                } => {
                    let health = match target {
                        ActorId::Player => self.player.health_mut(),
                        ActorId::Ally => self.ally.health_mut(),
                        ActorId::Boss => self.boss.health_mut(),
                    };
                    health.take_damage(damage, knockback, &mut self.events);
                }
                CombatIntent::SpawnSkill {
                    origin,
                    slot,
                    attack,
                } => {
                    debug!(
                        attacker = origin.attacker.as_token(),
                        slot,
                        kind = ?attack.kind,
                        "skill_spawn"
                    );
                    self.skills.spawn(origin, attack, &self.physics);
                }
            }
        }
    }

    fn dispatch_events(&mut self) {
        for event in self.events.take_pending() {
            match event {
                CombatEvent::Hit {
                    actor: ActorId::Player,
                    knockback,
                } => self.player.on_hit(knockback),
                CombatEvent::Hit {
                    actor: ActorId::Boss,
                    knockback,
                } => self.boss.on_hit(knockback),
                CombatEvent::Death {
                    actor: ActorId::Player,
                } => self.player.on_death(),
                CombatEvent::Death {
                    actor: ActorId::Boss,
                } => {
                    self.boss.on_death(&mut self.physics);
                    self.skills.cancel_owner(ActorId::Boss);
                }
                CombatEvent::Death {
                    actor: ActorId::Ally,
                } => self.ally.on_death(),
                CombatEvent::AttackFired {
                    actor: ActorId::Player,
                    ..
                } => self.player.on_attack_fired(),
                CombatEvent::ShieldActivated { duration } => {
                    self.player.health_mut().grant_invincibility(duration);
                    self.ally.activate_shield(duration);
                }
                CombatEvent::HealthChanged {
                    actor,
                    max,
                    current,
                    ..
                } => debug!(actor = actor.as_token(), current, max, "health_changed"),
                CombatEvent::Hit { .. } | CombatEvent::AttackFired { .. } => {}
            }
        }
    }
}

impl Scene for BattleScene {
    fn load(&mut self) -> Result<(), String> {
        if let Some(PendingModel { loader, spec }) = self.pending_model.take() {
            self.chat
                .start(loader, spec)
                .map_err(|err| format!("ally model failed to start: {err}"))?;
        }
        info!(
            session_id = %self.chat.session_id(),
            chat_lines = self.chat_script.len(),
            "battle_loaded"
        );
        Ok(())
    }

    fn fixed_update(&mut self, fixed_dt_seconds: f32, input: &InputSnapshot) -> SceneCommand {
        if input.quit_requested() {
            return SceneCommand::Quit;
        }
        self.deliver_chat_script();

        if let Some(slot) = self.player.read_buttons(input) {
            self.player
                .attack(slot, &self.physics, &mut self.intents, &mut self.events);
        }
        if let Some(body) = self.physics.body_mut(ActorId::Player) {
            self.player.fixed_update(input, body);
        }

        let boss = self
            .boss
            .fixed_update(&mut self.physics, self.skills.is_orbit_spawning());
        for intent in boss.intents {
            self.intents.push(intent);
        }
        for event in boss.events {
            self.events.emit(event);
        }

        self.skills
            .fixed_update(fixed_dt_seconds, &self.physics, &mut self.intents);
        self.resolve_intents();
        self.dispatch_events();
        self.physics.integrate(fixed_dt_seconds);

        self.last_counts = self.events.finish_tick_rollover();
        if self.last_counts != CombatEventCounts::default() {
            debug!(tick = self.tick, counts = ?self.last_counts, "combat_events");
        }
        self.tick += 1;
        if self.tick % STATUS_LOG_INTERVAL_TICKS == 0 {
            self.status().report();
        }
        SceneCommand::None
    }

    fn update(&mut self, frame_dt_seconds: f32, _input: &InputSnapshot) -> SceneCommand {
        self.player.update(frame_dt_seconds);
        self.boss.update(frame_dt_seconds);
        self.ally.update(frame_dt_seconds);
        self.chat.update(frame_dt_seconds);

        let inputs = TriggerInputs {
            player_health_ratio: self.player.health().ratio(),
        };
        let alive = self.player.health().is_alive();
        if self.chat.route(alive, &inputs, &mut self.events) > 0 {
            self.dispatch_events();
        }
        SceneCommand::None
    }

    fn late_update(&mut self, frame_dt_seconds: f32) -> usize {
        let dispatcher = self.chat.dispatcher();
        let drained = dispatcher.drain_once(&mut self.chat);

        if let Some(body) = self.physics.body(ActorId::Player) {
            let target = FollowTarget {
                position: body.position,
                facing: self.player.facing(),
            };
            self.ally.late_update(frame_dt_seconds, target);
        }
        if let Some(body) = self.physics.body_mut(ActorId::Ally) {
            body.position = self.ally.position();
        }
        drained
    }

    fn unload(&mut self) {
        self.chat.shutdown();
        self.status().report();
        info!(ticks = self.tick, "battle_unloaded");
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use magic_engine::inference::{ScriptedBackend, ScriptedLoader, ScriptedReply};
    use magic_engine::{
        ActionDef, AttackDef, AttackKind, CharacterDef, InputAction, InputSnapshot,
    };

    use super::*;
    use crate::app::gameplay::chat::READY_MESSAGE;

    const DT: f32 = 1.0 / 60.0;

    const CONFIG: &str = r#"{
        "llm": { "model_id": "scripted", "system_prompt": "You are the ally." },
        "messages": { "success": ["Shield trigger armed."] },
        "player": { "def_name": "player", "spawn": { "x": 0.0, "y": 0.8 } },
        "ally": {
            "def_name": "ally",
            "follow_offset": { "x": -1.0, "y": 1.0 },
            "shield_offset": { "x": 0.5, "y": 0.5 },
            "min_shield_duration": 1.0,
            "shield_follow_speed_multiplier": 2.0
        },
        "boss": {
            "def_name": "boss",
            "spawn": { "x": 1.5, "y": 1.2 },
            "patrol_range": 3.0,
            "flip_cooldown": 0.5,
            "detection_margin": 0.2,
            "probe_height": 0.5,
            "wall_probe": { "distance": 0.8, "size": { "x": 0.4, "y": 1.0 } },
            "ledge_probe": { "distance": 0.8, "size": { "x": 0.2, "y": 0.2 } },
            "orbit": {
                "instances": 4,
                "spawn_points": [{ "x": 1.0, "y": 0.0 }, { "x": -1.0, "y": 0.0 }],
                "spawn_cooldown": 0.3,
                "rotation_speed": 90.0,
                "curve_offset": 1.0
            }
        }
    }"#;

    fn melee(damage: f32, range: f32) -> AttackDef {
        AttackDef {
            kind: AttackKind::Melee,
            damage,
            cooldown: 0.5,
            range,
            knockback: Vec2::new(1.0, 1.0),
            projectile_speed: 0.0,
            lifetime: 0.0,
            hit_window: (0.0, 1.0),
        }
    }

    fn character(def_name: &str, max_health: f32, attacks: Vec<AttackDef>) -> CharacterDef {
        CharacterDef {
            def_name: def_name.to_string(),
            max_health,
            move_speed: 3.0,
            jump_force: 8.0,
            defense: 0.0,
            damage_reduction: 0.0,
            hit_recovery: 0.3,
            attack_recovery: 0.3,
            attacks,
        }
    }

    fn database() -> DefDatabase {
        DefDatabase::from_defs(
            vec![
                character("player", 100.0, vec![melee(10.0, 1.0)]),
                character("ally", 1.0, Vec::new()),
                character("boss", 200.0, vec![melee(5.0, 0.5)]),
            ],
            vec![ActionDef {
                def_name: "ally.shield".to_string(),
                state: "SHIELD".to_string(),
                cooldown: 10.0,
                duration: 2.0,
                noise_mean: 0.0,
                noise_std: 0.0,
            }],
        )
    }

    fn config() -> GameConfig {
        serde_json::from_str(CONFIG).expect("config")
    }

    fn scene(model: Option<PendingModel>) -> BattleScene {
        BattleScene::new(&config(), &database(), model, 7).expect("scene")
    }

    #[test]
    fn missing_character_is_reported() {
        let mut config = config();
        config.boss.def_name = "boss.absent".to_string();
        let err = BattleScene::new(&config, &database(), None, 1)
            .err()
            .expect("missing boss");
        assert!(err.to_string().contains("boss.absent"));
    }

    #[test]
    fn fresh_battle_status() {
        let scene = scene(None);
        let status = scene.status();
        assert_eq!(status.tick, 0);
        assert_eq!(status.player_move, MoveState::Idle);
        assert_eq!(status.player_jump, JumpState::ReadyToJump);
        assert_eq!(status.player_health, (100.0, 100.0));
        assert_eq!(status.ally, AllyState::Idle);
        assert!(status.boss_alive);
        assert_eq!(status.boss_facing, -1.0);
        assert_eq!(status.active_skills, 0);
        assert_eq!(status.chat_session, None);
        assert_eq!(status.triggers, 0);
    }

    #[test]
    fn quit_request_stops_the_scene() {
        let mut scene = scene(None);
        let input = InputSnapshot::empty().with_quit_requested(true);
        assert_eq!(scene.fixed_update(DT, &input), SceneCommand::Quit);
    }

    #[test]
    fn melee_press_damages_the_boss_in_the_same_tick() {
        let mut scene = scene(None);
        let before = scene.boss.health().current();
        let input = InputSnapshot::empty().with_action_pressed(InputAction::Attack);
        scene.fixed_update(DT, &input);
        assert!(scene.boss.health().current() < before);
        assert!(scene.last_counts.attack_fired >= 1);
        assert!(scene.last_counts.hit >= 1);
    }

    #[test]
    fn lethal_hit_turns_the_boss_into_a_corpse() {
        let mut scene = scene(None);
        scene.intents.push(CombatIntent::ApplyHit {
            target: ActorId::Boss,
            damage: 10_000.0,
            knockback: Vec2::ZERO,
        });
        scene.fixed_update(DT, &InputSnapshot::empty());
        assert!(!scene.boss.is_alive());
        let body = scene.physics.body(ActorId::Boss).expect("boss body");
        assert!(!body.hittable);
        assert_eq!(scene.last_counts.death, 1);
    }

    #[test]
    fn chat_before_model_start_is_rejected_but_the_battle_runs() {
        let mut scene = scene(None);
        scene.chat_script.push_back(DemoChat {
            tick: 0,
            text: "shield me".to_string(),
        });
        scene.fixed_update(DT, &InputSnapshot::empty());
        assert!(scene.chat_script.is_empty());
        assert_eq!(scene.chat.log().lines().len(), 1);
        assert_eq!(scene.late_update(DT), 0);
    }

    #[test]
    fn shield_trigger_from_chat_protects_the_player() {
        let reply = r#"<tool_call>{"name":"CreatePlayerHealthPointTrigger","arguments":{"skill":"shield","threshold":0.5}}</tool_call>"#;
        let loader = ScriptedLoader::new(ScriptedBackend::new(vec![ScriptedReply::Text(
            reply.to_string(),
        )]));
        let spec = ModelSpec::new(std::path::Path::new("models"), "scripted", "CPU");
        let mut scene = scene(Some(PendingModel {
            loader: Box::new(loader),
            spec,
        }));
        scene.load().expect("load");

        let deadline = Instant::now() + Duration::from_secs(5);
        let has_line = |scene: &BattleScene, text: &str| {
            scene.chat.log().lines().iter().any(|line| line.text == text)
        };
        while !has_line(&scene, READY_MESSAGE) {
            assert!(Instant::now() < deadline, "model never became ready");
            scene.late_update(DT);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(scene.chat.receive_user_chat("shield me at half health"));
        while !has_line(&scene, "Shield trigger armed.") {
            assert!(Instant::now() < deadline, "tool reply never arrived");
            scene.late_update(DT);
            std::thread::sleep(Duration::from_millis(2));
        }

        let mut events = CombatEventBus::default();
        scene
            .player
            .health_mut()
            .take_damage(70.0, Vec2::ZERO, &mut events);
        scene.update(DT, &InputSnapshot::empty());
        scene.late_update(DT);

        assert!(scene.player.health().is_invincible());
        assert_eq!(scene.ally.state(), AllyState::Shield);
        scene.unload();
    }
}
