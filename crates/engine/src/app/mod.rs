mod input;
mod loop_runner;
mod metrics;
mod scene;

pub use input::InputAction;
pub use loop_runner::{
    run_app, run_app_with_metrics, AppError, InputSource, LoopConfig, LoopSummary,
};
pub use metrics::{LoopMetricsSnapshot, MetricsHandle};
pub use scene::{InputSnapshot, Scene, SceneCommand, Vec2};
