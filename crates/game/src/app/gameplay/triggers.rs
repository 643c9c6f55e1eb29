use std::collections::BTreeMap;
use std::f32::consts::TAU;
use std::fmt;

use magic_engine::ai::CountdownTimer;
use magic_engine::llm::{PredefinedMessages, ToolCallOutput, ToolExecutor};
use magic_engine::{ActionDef, DefDatabase};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::json;
use tracing::{debug, info, warn};

use super::ally::AllyState;
use super::events::{CombatEvent, CombatEventBus};

pub(crate) const HEALTH_TRIGGER_TOOL: &str = "CreatePlayerHealthPointTrigger";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum TriggerKind {
    PlayerHealthPoint,
}

impl TriggerKind {
    pub(crate) fn as_token(self) -> &'static str {
        match self {
            Self::PlayerHealthPoint => "player_health_point",
        }
    }
}

/// World readings a trigger may look at during evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TriggerInputs {
    pub(crate) player_health_ratio: f32,
}

/// A condition with its own cooldown, evaluated once per frame.
pub(crate) trait EventTrigger: fmt::Debug {
    fn kind(&self) -> TriggerKind;
    fn state(&self) -> AllyState;
    fn action(&self) -> &ActionDef;
    /// Reads only; never changes the trigger.
    fn evaluate(&self, inputs: &TriggerInputs) -> bool;
    fn tick(&mut self, dt: f32);
    fn apply_cooldown(&mut self);
}

/// Fires when the player's health ratio is at or below `threshold`.
#[derive(Debug, Clone)]
pub(crate) struct HealthRatioTrigger {
    state: AllyState,
    action: ActionDef,
    threshold: f32,
    cooldown: CountdownTimer,
}

impl HealthRatioTrigger {
    /// Out-of-range thresholds are clamped into `[0, 1]`.
    pub(crate) fn new(state: AllyState, action: ActionDef, threshold: f32) -> Self {
        if !(0.0..=1.0).contains(&threshold) {
            warn!(threshold, state = state.as_token(), "trigger_threshold_clamped");
        }
        let threshold = if threshold.is_nan() {
            0.0
        } else {
            threshold.clamp(0.0, 1.0)
        };
        Self {
            state,
            action,
            threshold,
            cooldown: CountdownTimer::ready(),
        }
    }

    pub(crate) fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl EventTrigger for HealthRatioTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::PlayerHealthPoint
    }

    fn state(&self) -> AllyState {
        self.state
    }

    fn action(&self) -> &ActionDef {
        &self.action
    }

    fn evaluate(&self, inputs: &TriggerInputs) -> bool {
        self.cooldown.is_ready() && inputs.player_health_ratio <= self.threshold
    }

    fn tick(&mut self, dt: f32) {
        self.cooldown.tick(dt);
    }

    fn apply_cooldown(&mut self) {
        self.cooldown.start(self.action.cooldown);
    }
}

type TriggerKey = (TriggerKind, AllyState);

/// At most one trigger per `(kind, state)`; inserting an existing key
/// replaces it.
#[derive(Debug, Default)]
pub(crate) struct TriggerRegistry {
    triggers: BTreeMap<TriggerKey, Box<dyn EventTrigger>>,
}

impl TriggerRegistry {
    pub(crate) fn insert(&mut self, trigger: Box<dyn EventTrigger>) {
        let key = (trigger.kind(), trigger.state());
        if self.triggers.insert(key, trigger).is_some() {
            info!(
                kind = key.0.as_token(),
                state = key.1.as_token(),
                "trigger_replaced"
            );
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.triggers.len()
    }

    pub(crate) fn get(&self, kind: TriggerKind, state: AllyState) -> Option<&dyn EventTrigger> {
        self.triggers.get(&(kind, state)).map(|trigger| &**trigger)
    }

    pub(crate) fn tick(&mut self, dt: f32) {
        for trigger in self.triggers.values_mut() {
            trigger.tick(dt);
        }
    }

    /// Evaluates every trigger once. A trigger that fires has its cooldown
    /// applied before its action event is raised.
    pub(crate) fn route(&mut self, inputs: &TriggerInputs, events: &mut CombatEventBus) -> usize {
        let mut fired = 0;
        for trigger in self.triggers.values_mut() {
            if !trigger.evaluate(inputs) {
                continue;
            }
            trigger.apply_cooldown();
            fired += 1;
            let state = trigger.state();
            match state {
                AllyState::Shield => {
                    let duration = trigger.action().duration;
                    info!(duration, "trigger_fired_shield");
                    events.emit(CombatEvent::ShieldActivated { duration });
                }
                _ => debug!(state = state.as_token(), "trigger_fired_without_route"),
            }
        }
        fired
    }
}

/// `mean + std * N(0, 1)` via Box-Muller.
pub(crate) fn normal_noise<R: Rng + ?Sized>(rng: &mut R, mean: f32, std: f32) -> f32 {
    let u1: f32 = 1.0 - rng.gen::<f32>();
    let u2: f32 = 1.0 - rng.gen::<f32>();
    let standard = (-2.0 * u1.ln()).sqrt() * (TAU * u2).sin();
    mean + std * standard
}

/// What the ally's tools act on: its action table and its triggers.
#[derive(Debug)]
pub(crate) struct AllyTriggers {
    actions: BTreeMap<AllyState, ActionDef>,
    registry: TriggerRegistry,
    rng: StdRng,
}

impl AllyTriggers {
    pub(crate) fn new(database: &DefDatabase, rng: StdRng) -> Self {
        let mut actions = BTreeMap::new();
        for action in database.actions() {
            match AllyState::parse(&action.state) {
                Some(state) => {
                    actions.insert(state, action.clone());
                }
                None => warn!(
                    def_name = %action.def_name,
                    state = %action.state,
                    "action_state_unknown"
                ),
            }
        }
        Self {
            actions,
            registry: TriggerRegistry::default(),
            rng,
        }
    }

    pub(crate) fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut TriggerRegistry {
        &mut self.registry
    }

    /// Tool body: adds a noisy health-ratio trigger for `skill`. The output
    /// echoes the requested threshold.
    pub(crate) fn create_player_health_point_trigger(
        &mut self,
        skill: &str,
        threshold: f32,
    ) -> ToolCallOutput {
        let Some(state) = AllyState::parse(skill) else {
            warn!(skill, "trigger_skill_unknown");
            return ToolCallOutput::failed();
        };
        let Some(action) = self.actions.get(&state) else {
            warn!(
                skill,
                known = ?self.actions.keys().collect::<Vec<_>>(),
                "trigger_action_missing"
            );
            return ToolCallOutput::failed();
        };

        let applied = threshold + normal_noise(&mut self.rng, action.noise_mean, action.noise_std);
        let trigger = HealthRatioTrigger::new(state, action.clone(), applied);
        info!(
            kind = TriggerKind::PlayerHealthPoint.as_token(),
            skill = state.as_token(),
            threshold,
            applied = trigger.threshold(),
            "trigger_created"
        );
        self.registry.insert(Box::new(trigger));
        ToolCallOutput::success().with_output("threshold", threshold)
    }
}

pub(crate) fn ally_tool_executor(messages: PredefinedMessages) -> ToolExecutor<AllyTriggers> {
    let mut executor = ToolExecutor::new(messages);
    executor.register2(
        HEALTH_TRIGGER_TOOL,
        ["skill", "threshold"],
        |triggers: &mut AllyTriggers, skill: String, threshold: f32| {
            triggers.create_player_health_point_trigger(&skill, threshold)
        },
    );
    executor
}

/// Function-calling manifest sent alongside ally chat queries.
pub(crate) fn ally_tools_manifest() -> String {
    json!([
        {
            "type": "function",
            "function": {
                "name": HEALTH_TRIGGER_TOOL,
                "description": "Create a trigger that casts a skill when player HP is below a threshold.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "skill": {
                            "type": "string",
                            "enum": ["SHIELD", "INVINCIBLE"],
                            "description": "executed skill type when player HP <= threshold"
                        },
                        "threshold": {
                            "type": "number",
                            "description": "HP ratio between 0 and 1. For example, 0.3 means HP <= 30%."
                        }
                    },
                    "required": ["skill", "threshold"]
                }
            }
        }
    ])
    .to_string()
}

#[cfg(test)]
mod tests {
    use magic_engine::llm::{parse_tool_call, ToolResult};
    use rand::SeedableRng;

    use super::*;
    use crate::app::gameplay::events::ActorId;
    use crate::app::gameplay::health::Health;

    fn action(state: &str, cooldown: f32, std: f32) -> ActionDef {
        ActionDef {
            def_name: format!("ally.{}", state.to_ascii_lowercase()),
            state: state.to_string(),
            cooldown,
            duration: 3.0,
            noise_mean: 0.0,
            noise_std: std,
        }
    }

    fn triggers() -> AllyTriggers {
        let mut actions = BTreeMap::new();
        actions.insert(AllyState::Shield, action("SHIELD", 10.0, 0.0));
        AllyTriggers {
            actions,
            registry: TriggerRegistry::default(),
            rng: StdRng::seed_from_u64(7),
        }
    }

    fn shield_events(bus: &mut CombatEventBus) -> usize {
        bus.take_pending()
            .into_iter()
            .filter(|event| matches!(event, CombatEvent::ShieldActivated { duration } if *duration == 3.0))
            .count()
    }

    #[test]
    fn threshold_is_clamped() {
        let high = HealthRatioTrigger::new(AllyState::Shield, action("SHIELD", 1.0, 0.0), 1.4);
        assert_eq!(high.threshold(), 1.0);
        let low = HealthRatioTrigger::new(AllyState::Shield, action("SHIELD", 1.0, 0.0), -0.2);
        assert_eq!(low.threshold(), 0.0);
    }

    #[test]
    fn quarter_health_fires_then_waits_out_cooldown() {
        let def = magic_engine::CharacterDef {
            def_name: "player".to_string(),
            max_health: 100.0,
            move_speed: 0.0,
            jump_force: 0.0,
            defense: 0.0,
            damage_reduction: 0.0,
            hit_recovery: 0.0,
            attack_recovery: 0.0,
            attacks: Vec::new(),
        };
        let mut health = Health::from_def(ActorId::Player, &def);
        let mut bus = CombatEventBus::default();
        assert!(health.take_damage(75.0, magic_engine::Vec2::ZERO, &mut bus));
        assert_eq!(health.current(), 25.0);

        let mut trigger =
            HealthRatioTrigger::new(AllyState::Shield, action("SHIELD", 5.0, 0.0), 0.3);
        let inputs = TriggerInputs {
            player_health_ratio: health.ratio(),
        };
        assert!(trigger.evaluate(&inputs));

        trigger.apply_cooldown();
        assert!(!trigger.evaluate(&inputs));
        for dt in [2.0, 2.0, 0.5] {
            trigger.tick(dt);
            assert!(!trigger.evaluate(&inputs));
        }
        trigger.tick(0.5);
        assert!(trigger.evaluate(&inputs));
    }

    #[test]
    fn router_fires_once_then_waits_for_cooldown() {
        let mut registry = TriggerRegistry::default();
        registry.insert(Box::new(HealthRatioTrigger::new(
            AllyState::Shield,
            action("SHIELD", 10.0, 0.0),
            0.5,
        )));
        let mut bus = CombatEventBus::default();

        let healthy = TriggerInputs {
            player_health_ratio: 0.8,
        };
        assert_eq!(registry.route(&healthy, &mut bus), 0);

        let hurt = TriggerInputs {
            player_health_ratio: 0.5,
        };
        assert_eq!(registry.route(&hurt, &mut bus), 1);
        assert_eq!(shield_events(&mut bus), 1);
        assert_eq!(registry.route(&hurt, &mut bus), 0);

        registry.tick(9.0);
        assert_eq!(registry.route(&hurt, &mut bus), 0);
        registry.tick(1.0);
        assert_eq!(registry.route(&hurt, &mut bus), 1);
    }

    #[test]
    fn non_shield_triggers_fire_without_events() {
        let mut registry = TriggerRegistry::default();
        registry.insert(Box::new(HealthRatioTrigger::new(
            AllyState::Invincible,
            action("INVINCIBLE", 10.0, 0.0),
            1.0,
        )));
        let mut bus = CombatEventBus::default();
        let inputs = TriggerInputs {
            player_health_ratio: 0.2,
        };
        assert_eq!(registry.route(&inputs, &mut bus), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn tool_creates_and_replaces_by_key() {
        let mut target = triggers();
        let output = target.create_player_health_point_trigger("shield", 0.3);
        assert_eq!(output.result, ToolResult::Success);
        assert_eq!(output.output.get("threshold"), Some(&json!(0.3f32)));
        assert_eq!(target.registry().len(), 1);

        target.create_player_health_point_trigger("SHIELD", 0.6);
        assert_eq!(target.registry().len(), 1);
        let stored = target
            .registry()
            .get(TriggerKind::PlayerHealthPoint, AllyState::Shield)
            .expect("trigger");
        assert!(stored.evaluate(&TriggerInputs {
            player_health_ratio: 0.55
        }));
    }

    #[test]
    fn tool_fails_for_unknown_skill_or_missing_action() {
        let mut target = triggers();
        let unknown = target.create_player_health_point_trigger("HEAL", 0.3);
        assert_eq!(unknown.result, ToolResult::Failed);
        let missing = target.create_player_health_point_trigger("INVINCIBLE", 0.3);
        assert_eq!(missing.result, ToolResult::Failed);
        assert_eq!(target.registry().len(), 0);
    }

    #[test]
    fn executor_coerces_arguments_from_model_json() {
        let executor = ally_tool_executor(PredefinedMessages::default());
        let mut target = triggers();
        let call = parse_tool_call(
            r#"{"name":"CreatePlayerHealthPointTrigger","arguments":{"skill":"SHIELD","threshold":"0.4"}}"#,
        )
        .expect("tool call");
        let output = executor.execute(&mut target, &call).expect("outcome");
        assert!(output.is_success());
        assert_eq!(target.registry().len(), 1);
    }

    #[test]
    fn noise_is_centred_on_mean() {
        let mut rng = StdRng::seed_from_u64(11);
        let samples: Vec<f32> = (0..4000).map(|_| normal_noise(&mut rng, 0.2, 0.05)).collect();
        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        assert!((mean - 0.2).abs() < 0.01);
        assert!(samples.iter().all(|value| value.is_finite()));
    }

    #[test]
    fn manifest_lists_the_trigger_tool() {
        let manifest: serde_json::Value =
            serde_json::from_str(&ally_tools_manifest()).expect("manifest json");
        assert_eq!(manifest[0]["function"]["name"], HEALTH_TRIGGER_TOOL);
        assert_eq!(
            manifest[0]["function"]["parameters"]["required"],
            json!(["skill", "threshold"])
        );
    }
}
