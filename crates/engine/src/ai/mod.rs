//! Per-frame decision primitives shared by the characters.

mod behavior_tree;
mod cooldown;
mod pool;
mod state_axis;

pub use behavior_tree::{ActionNode, Evaluation, NodeStatus, Selector, Sequence};
pub use cooldown::CountdownTimer;
pub use pool::ObjectPool;
pub use state_axis::{AxisHooks, AxisState, AxisStep, StateAxis};
