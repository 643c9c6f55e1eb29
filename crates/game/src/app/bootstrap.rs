use std::time::Duration;

use magic_engine::inference::{ModelSpec, ScriptedBackend, ScriptedLoader, ScriptedReply};
use magic_engine::{
    compile_def_database, resolve_app_paths, ContentCompileError, LoopConfig, StartupError,
};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::config::{load_game_config, ConfigError, DemoConfig, DemoReply, GameConfig};
use super::demo::ScriptedInput;
use super::gameplay::{BattleScene, PendingModel, SceneBuildError};

#[derive(Debug, Error)]
pub(crate) enum BootstrapError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("failed to compile content definitions: {0}")]
    Content(#[from] ContentCompileError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scene(#[from] SceneBuildError),
}

pub(crate) struct AppWiring {
    pub(crate) config: LoopConfig,
    pub(crate) scene: BattleScene,
    pub(crate) input: ScriptedInput,
}

pub(crate) fn build_app() -> Result<AppWiring, BootstrapError> {
    init_tracing();
    info!("=== Magic Battle Startup ===");

    let paths = resolve_app_paths()?;
    info!(
        root = %paths.root.display(),
        content = %paths.content_dir.display(),
        config = %paths.config_path.display(),
        "app_paths_resolved"
    );
    let database = compile_def_database(&paths.content_dir)?;
    info!(
        characters = database.characters().len(),
        actions = database.actions().len(),
        "content_compiled"
    );
    let game = load_game_config(&paths.config_path)?;

    let spec = ModelSpec::new(&paths.models_dir, &game.llm.model_id, &game.llm.device);
    let model = PendingModel {
        loader: Box::new(scripted_loader(&game.demo)),
        spec,
    };
    let seed = rand::random::<u64>();
    info!(seed, "battle_seed");
    let scene = BattleScene::new(&game, &database, Some(model), seed)?;
    let input = ScriptedInput::from_config(&game.demo.inputs);

    Ok(AppWiring {
        config: loop_config(&game),
        scene,
        input,
    })
}

fn loop_config(game: &GameConfig) -> LoopConfig {
    let defaults = LoopConfig::default();
    LoopConfig {
        target_tps: game.demo.target_tps.unwrap_or(defaults.target_tps),
        max_frames: game.demo.max_frames,
        ..defaults
    }
}

/// The in-process stand-in for the local model, replaying the configured replies.
fn scripted_loader(demo: &DemoConfig) -> ScriptedLoader {
    let replies = demo.replies.iter().map(|reply| match reply {
        DemoReply::Text(text) => ScriptedReply::Text(text.clone()),
        DemoReply::Fail(reason) => ScriptedReply::Fail(reason.clone()),
    });
    let mut backend =
        ScriptedBackend::new(replies).with_delay(Duration::from_millis(demo.inference_delay_ms));
    if let Some(fallback) = &demo.fallback_reply {
        backend = backend.with_fallback(fallback.as_str());
    }
    ScriptedLoader::new(backend).with_load_delay(Duration::from_millis(demo.load_delay_ms))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}
