use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use magic_engine::llm::PredefinedMessages;
use magic_engine::Vec2;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config '{path}' at {at}: {source}")]
    Parse {
        path: PathBuf,
        at: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config '{path}' at {at}: {message}")]
    Invalid {
        path: PathBuf,
        at: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct GameConfig {
    pub(crate) llm: LlmConfig,
    #[serde(default)]
    pub(crate) messages: PredefinedMessages,
    #[serde(default)]
    pub(crate) arena: ArenaConfig,
    pub(crate) player: PlayerConfig,
    pub(crate) ally: AllyConfig,
    pub(crate) boss: BossConfig,
    #[serde(default)]
    pub(crate) demo: DemoConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct LlmConfig {
    pub(crate) model_id: String,
    #[serde(default = "default_device")]
    pub(crate) device: String,
    pub(crate) system_prompt: String,
    #[serde(default)]
    pub(crate) request_timeout_secs: Option<f32>,
}

impl LlmConfig {
    pub(crate) fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f32)
    }
}

fn default_device() -> String {
    magic_engine::inference::DEFAULT_DEVICE.to_string()
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ArenaConfig {
    pub(crate) ground_y: f32,
    pub(crate) left_wall: f32,
    pub(crate) right_wall: f32,
    pub(crate) gravity: f32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            ground_y: 0.0,
            left_wall: -12.0,
            right_wall: 12.0,
            gravity: 25.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PlayerConfig {
    pub(crate) def_name: String,
    pub(crate) spawn: Vec2,
    #[serde(default = "default_landing_margin")]
    pub(crate) landing_velocity_margin: f32,
}

fn default_landing_margin() -> f32 {
    0.05
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct AllyConfig {
    pub(crate) def_name: String,
    pub(crate) follow_offset: Vec2,
    pub(crate) shield_offset: Vec2,
    pub(crate) min_shield_duration: f32,
    pub(crate) shield_follow_speed_multiplier: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BossConfig {
    pub(crate) def_name: String,
    pub(crate) spawn: Vec2,
    pub(crate) patrol_range: f32,
    pub(crate) flip_cooldown: f32,
    /// Extra reach added to the attack range when deciding the target is adjacent.
    pub(crate) detection_margin: f32,
    pub(crate) probe_height: f32,
    pub(crate) wall_probe: ProbeConfig,
    pub(crate) ledge_probe: ProbeConfig,
    pub(crate) orbit: OrbitConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ProbeConfig {
    pub(crate) distance: f32,
    pub(crate) size: Vec2,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct OrbitConfig {
    pub(crate) instances: usize,
    pub(crate) spawn_points: Vec<Vec2>,
    pub(crate) spawn_cooldown: f32,
    /// Degrees per second.
    pub(crate) rotation_speed: f32,
    pub(crate) curve_offset: f32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct DemoConfig {
    pub(crate) max_frames: Option<u64>,
    pub(crate) target_tps: Option<u32>,
    pub(crate) inference_delay_ms: u64,
    pub(crate) load_delay_ms: u64,
    pub(crate) replies: Vec<DemoReply>,
    pub(crate) fallback_reply: Option<String>,
    pub(crate) inputs: Vec<DemoInput>,
    pub(crate) chat: Vec<DemoChat>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum DemoReply {
    Text(String),
    Fail(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum DemoInputKind {
    Press,
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DemoInput {
    pub(crate) tick: u64,
    pub(crate) action: String,
    pub(crate) kind: DemoInputKind,
    #[serde(default = "default_hold_ticks")]
    pub(crate) ticks: u64,
}

fn default_hold_ticks() -> u64 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DemoChat {
    pub(crate) tick: u64,
    pub(crate) text: String,
}

pub(crate) fn load_game_config(path: &Path) -> Result<GameConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_game_config(path, &raw)?;
    validate(path, &config)?;
    Ok(config)
}

fn parse_game_config(path: &Path, raw: &str) -> Result<GameConfig, ConfigError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, GameConfig>(&mut deserializer).map_err(|error| {
        let at = error.path().to_string();
        ConfigError::Parse {
            path: path.to_path_buf(),
            at: if at.is_empty() { ".".to_string() } else { at },
            source: error.into_inner(),
        }
    })
}

fn validate(path: &Path, config: &GameConfig) -> Result<(), ConfigError> {
    let invalid = |at: &'static str, message: String| ConfigError::Invalid {
        path: path.to_path_buf(),
        at,
        message,
    };
    if config.arena.left_wall >= config.arena.right_wall {
        return Err(invalid(
            "arena",
            format!(
                "left_wall {} must be less than right_wall {}",
                config.arena.left_wall, config.arena.right_wall
            ),
        ));
    }
    if config.boss.orbit.spawn_points.is_empty() {
        return Err(invalid(
            "boss.orbit.spawn_points",
            "at least one spawn point is required".to_string(),
        ));
    }
    if config.ally.min_shield_duration < 0.0 {
        return Err(invalid(
            "ally.min_shield_duration",
            format!("expected >= 0, got {}", config.ally.min_shield_duration),
        ));
    }
    for (idx, input) in config.demo.inputs.iter().enumerate() {
        if magic_engine::InputAction::from_name(&input.action).is_none() {
            return Err(invalid(
                "demo.inputs",
                format!("entry {idx}: unknown action '{}'", input.action),
            ));
        }
    }
    Ok(())
}
