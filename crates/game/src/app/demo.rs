use magic_engine::{InputAction, InputSnapshot, InputSource};
use tracing::warn;

use super::config::{DemoInput, DemoInputKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimedAction {
    action: InputAction,
    kind: DemoInputKind,
    start: u64,
    /// Exclusive.
    end: u64,
}

impl TimedAction {
    fn covers(&self, tick: u64) -> bool {
        (self.start..self.end).contains(&tick)
    }
}

/// Replays a fixed input timeline tick by tick. A press is an edge on its
/// tick only; a hold keeps the action down for its tick count.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedInput {
    timeline: Vec<TimedAction>,
}

impl ScriptedInput {
    pub(crate) fn from_config(inputs: &[DemoInput]) -> Self {
        let timeline = inputs
            .iter()
            .filter_map(|input| {
                let Some(action) = InputAction::from_name(&input.action) else {
                    warn!(action = %input.action, tick = input.tick, "demo_input_unknown");
                    return None;
                };
                let length = match input.kind {
                    DemoInputKind::Press => 1,
                    DemoInputKind::Hold => input.ticks.max(1),
                };
                Some(TimedAction {
                    action,
                    kind: input.kind,
                    start: input.tick,
                    end: input.tick.saturating_add(length),
                })
            })
            .collect();
        Self { timeline }
    }

    pub(crate) fn last_tick(&self) -> Option<u64> {
        self.timeline.iter().map(|entry| entry.end).max()
    }
}

impl InputSource for ScriptedInput {
    fn snapshot_for_tick(&mut self, tick: u64) -> InputSnapshot {
        self.timeline
            .iter()
            .filter(|entry| entry.covers(tick))
            .fold(InputSnapshot::empty(), |snapshot, entry| match entry.kind {
                DemoInputKind::Press => snapshot.with_action_pressed(entry.action),
                DemoInputKind::Hold => snapshot.with_action_down(entry.action, true),
            })
    }
}
