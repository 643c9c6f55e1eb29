use std::process::ExitCode;

use magic_engine::run_app;
use tracing::{error, info};

use super::bootstrap::AppWiring;

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let AppWiring {
        config,
        mut scene,
        mut input,
    } = app;
    if let Some(last_tick) = input.last_tick() {
        info!(last_tick, "demo_input_loaded");
    }

    match run_app(config, &mut scene, &mut input) {
        Ok(summary) => {
            info!(
                frames = summary.frames,
                ticks = summary.ticks,
                dropped_backlog_ms = summary.dropped_backlog.as_millis() as u64,
                "demo_finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "startup_failed");
            ExitCode::FAILURE
        }
    }
}
