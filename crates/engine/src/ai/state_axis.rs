use std::collections::VecDeque;
use std::fmt;

use tracing::trace;

pub trait AxisState: Copy + Eq + fmt::Debug {
    /// A terminal state is never left and stops buffered transitions.
    fn is_terminal(self) -> bool;
}

/// Exit/enter callbacks run around every applied transition.
pub trait AxisHooks<S> {
    fn exit(&mut self, _from: S, _to: S) {}
    fn enter(&mut self, _from: S, _to: S) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisStep {
    Continue,
    /// The axis is terminal; skip the rest of its processing this frame.
    Terminal,
}

/// One state machine axis with a FIFO of externally requested transitions.
///
/// Event sources only [`enqueue`](StateAxis::enqueue); the owner drains at a
/// fixed point in its frame.
#[derive(Debug, Clone)]
pub struct StateAxis<S> {
    name: &'static str,
    current: S,
    pending: VecDeque<S>,
}

impl<S: AxisState> StateAxis<S> {
    pub fn new(name: &'static str, initial: S) -> Self {
        Self {
            name,
            current: initial,
            pending: VecDeque::new(),
        }
    }

    pub fn current(&self) -> S {
        self.current
    }

    pub fn is(&self, state: S) -> bool {
        self.current == state
    }

    pub fn enqueue(&mut self, state: S) {
        self.pending.push_back(state);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = S> + '_ {
        self.pending.iter().copied()
    }

    /// Applies buffered transitions in order, stopping as soon as the axis is
    /// terminal. Anything queued behind that point stays in the buffer.
    pub fn drain_pending<H: AxisHooks<S> + ?Sized>(&mut self, hooks: &mut H) -> AxisStep {
        if self.current.is_terminal() {
            return AxisStep::Terminal;
        }
        while let Some(next) = self.pending.pop_front() {
            self.change(next, hooks);
            if self.current.is_terminal() {
                return AxisStep::Terminal;
            }
        }
        AxisStep::Continue
    }

    /// Immediate transition. No-op when unchanged or terminal.
    pub fn change<H: AxisHooks<S> + ?Sized>(&mut self, next: S, hooks: &mut H) -> bool {
        if next == self.current || self.current.is_terminal() {
            return false;
        }
        let previous = self.current;
        hooks.exit(previous, next);
        self.current = next;
        hooks.enter(previous, next);
        trace!(axis = self.name, from = ?previous, to = ?next, "state_changed");
        true
    }
}
