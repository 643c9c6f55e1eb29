use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::{ContentCompileError, StartupError};

use super::metrics::MetricsAccumulator;
use super::{InputSnapshot, MetricsHandle, Scene, SceneCommand};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub target_tps: u32,
    pub max_frame_delta: Duration,
    pub max_ticks_per_frame: u32,
    pub metrics_log_interval: Duration,
    /// Frame pacing cap; `None` runs frames back to back.
    pub max_frame_rate: Option<u32>,
    /// Stop after this many frames; `None` runs until the scene quits.
    pub max_frames: Option<u64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: 60,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
            metrics_log_interval: Duration::from_secs(1),
            max_frame_rate: Some(60),
            max_frames: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("failed to compile content definitions: {0}")]
    Content(#[from] ContentCompileError),
    #[error("failed to load scene: {message}")]
    SceneLoad { message: String },
}

/// Feeds the fixed-step simulation one input snapshot per tick.
pub trait InputSource {
    fn snapshot_for_tick(&mut self, tick: u64) -> InputSnapshot;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames: u64,
    pub ticks: u64,
    pub dropped_backlog: Duration,
}

pub fn run_app(
    config: LoopConfig,
    scene: &mut dyn Scene,
    input: &mut dyn InputSource,
) -> Result<LoopSummary, AppError> {
    let metrics_handle = MetricsHandle::default();
    run_app_with_metrics(config, scene, input, metrics_handle)
}

pub fn run_app_with_metrics(
    config: LoopConfig,
    scene: &mut dyn Scene,
    input: &mut dyn InputSource,
    metrics_handle: MetricsHandle,
) -> Result<LoopSummary, AppError> {
    let target_tps = config.target_tps.max(1);
    let max_frame_delta =
        normalize_non_zero_duration(config.max_frame_delta, Duration::from_millis(250));
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let metrics_log_interval =
        normalize_non_zero_duration(config.metrics_log_interval, Duration::from_secs(1));
    let fixed_dt = Duration::from_secs_f64(1.0 / target_tps as f64);
    let fixed_dt_seconds = fixed_dt.as_secs_f32();
    let frame_target = target_frame_duration(config.max_frame_rate.filter(|fps| *fps > 0));

    scene
        .load()
        .map_err(|message| AppError::SceneLoad { message })?;
    info!(
        target_tps,
        max_frame_delta_ms = max_frame_delta.as_millis() as u64,
        max_ticks_per_frame,
        metrics_log_interval_ms = metrics_log_interval.as_millis() as u64,
        max_frames = ?config.max_frames,
        "loop_config"
    );

    let mut summary = LoopSummary::default();
    let mut accumulator = Duration::ZERO;
    let mut last_frame_instant = Instant::now();
    let mut metrics_accumulator = MetricsAccumulator::new(metrics_log_interval);
    let mut last_input = InputSnapshot::empty();

    loop {
        if config
            .max_frames
            .is_some_and(|max_frames| summary.frames >= max_frames)
        {
            info!(frames = summary.frames, "frame_limit_reached");
            break;
        }

        let frame_start = Instant::now();
        let raw_frame_dt = frame_start.saturating_duration_since(last_frame_instant);
        last_frame_instant = frame_start;

        let clamped_frame_dt = clamp_frame_delta(raw_frame_dt, max_frame_delta);
        accumulator = accumulator.saturating_add(clamped_frame_dt);

        let mut quit = false;
        let step_plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
        for _ in 0..step_plan.ticks_to_run {
            let input_snapshot = input.snapshot_for_tick(summary.ticks);
            summary.ticks = summary.ticks.saturating_add(1);
            metrics_accumulator.record_tick();
            last_input = input_snapshot;
            if input_snapshot.quit_requested() {
                info!(reason = "input", "shutdown_requested");
                quit = true;
                break;
            }
            if scene.fixed_update(fixed_dt_seconds, &input_snapshot) == SceneCommand::Quit {
                info!(reason = "scene", "shutdown_requested");
                quit = true;
                break;
            }
        }
        accumulator = step_plan.remaining_accumulator;

        if step_plan.dropped_backlog > Duration::ZERO {
            summary.dropped_backlog = summary
                .dropped_backlog
                .saturating_add(step_plan.dropped_backlog);
            warn!(
                dropped_backlog_ms = step_plan.dropped_backlog.as_millis() as u64,
                max_ticks_per_frame, "sim_clamp_triggered"
            );
        }
        if quit {
            break;
        }

        let frame_dt_seconds = clamped_frame_dt.as_secs_f32();
        let command = scene.update(frame_dt_seconds, &last_input);
        let drained = scene.late_update(frame_dt_seconds);
        metrics_accumulator.record_drained(drained);
        summary.frames = summary.frames.saturating_add(1);
        metrics_accumulator.record_frame(raw_frame_dt);

        if let Some(snapshot) = metrics_accumulator.maybe_snapshot(Instant::now()) {
            metrics_handle.publish(snapshot);
            info!(
                fps = snapshot.fps,
                tps = snapshot.tps,
                frame_time_ms = snapshot.frame_time_ms,
                peak_frame_time_ms = snapshot.peak_frame_time_ms,
                drained_per_second = snapshot.drained_per_second,
                peak_drain = snapshot.peak_drain,
                "loop_metrics"
            );
        }

        if command == SceneCommand::Quit {
            info!(reason = "scene", "shutdown_requested");
            break;
        }

        let cap_sleep = compute_cap_sleep(
            Instant::now().saturating_duration_since(frame_start),
            frame_target,
        );
        if cap_sleep > Duration::ZERO {
            thread::sleep(cap_sleep);
        }
    }

    scene.unload();
    info!(
        frames = summary.frames,
        ticks = summary.ticks,
        dropped_backlog_ms = summary.dropped_backlog.as_millis() as u64,
        "shutdown"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Copy)]
struct StepPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;

    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    if accumulator >= fixed_dt {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: Duration::ZERO,
            dropped_backlog: accumulator,
        }
    } else {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: accumulator,
            dropped_backlog: Duration::ZERO,
        }
    }
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

fn target_frame_duration(max_frame_rate: Option<u32>) -> Option<Duration> {
    max_frame_rate.map(|fps| Duration::from_secs_f64(1.0 / fps as f64))
}

fn compute_cap_sleep(elapsed: Duration, target: Option<Duration>) -> Duration {
    match target {
        Some(frame_target) if elapsed < frame_target => frame_target - elapsed,
        _ => Duration::ZERO,
    }
}
