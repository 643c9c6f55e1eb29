use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Running,
    Success,
    Failure,
}

/// Status plus the `/`-joined labels of the nodes that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub status: NodeStatus,
    pub path: String,
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.status, self.path)
    }
}

/// Leaf condition or action evaluated against the owner's context.
pub trait ActionNode<C> {
    fn label(&self) -> &str;
    fn evaluate(&mut self, ctx: &mut C) -> NodeStatus;
}

/// AND-chain: stops at the first child that fails or is still running.
pub struct Sequence<C> {
    label: String,
    children: Vec<Box<dyn ActionNode<C>>>,
}

impl<C> Sequence<C> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            children: Vec::new(),
        }
    }

    pub fn with(mut self, child: impl ActionNode<C> + 'static) -> Self {
        self.children.push(Box::new(child));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn evaluate(&mut self, ctx: &mut C) -> Evaluation {
        for child in &mut self.children {
            let status = child.evaluate(ctx);
            if status != NodeStatus::Success {
                return Evaluation {
                    status,
                    path: format!("{}/{}", self.label, child.label()),
                };
            }
        }
        Evaluation {
            status: NodeStatus::Success,
            path: format!("{}/END", self.label),
        }
    }
}

impl<C> fmt::Debug for Sequence<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self.children.iter().map(|child| child.label()).collect();
        f.debug_struct("Sequence")
            .field("label", &self.label)
            .field("children", &labels)
            .finish()
    }
}

/// OR-chain over sequences in priority order: the first one that does not
/// fail decides the tick.
pub struct Selector<C> {
    label: String,
    children: Vec<Sequence<C>>,
}

impl<C> Selector<C> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            children: Vec::new(),
        }
    }

    pub fn with(mut self, child: Sequence<C>) -> Self {
        self.children.push(child);
        self
    }

    pub fn evaluate(&mut self, ctx: &mut C) -> Evaluation {
        for child in &mut self.children {
            let evaluation = child.evaluate(ctx);
            if evaluation.status != NodeStatus::Failure {
                return Evaluation {
                    status: evaluation.status,
                    path: format!("{}/{}", self.label, evaluation.path),
                };
            }
        }
        Evaluation {
            status: NodeStatus::Failure,
            path: format!("{}/END", self.label),
        }
    }
}

impl<C> fmt::Debug for Selector<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("label", &self.label)
            .field("children", &self.children)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Ctx {
        dead: bool,
        calls: Vec<&'static str>,
    }

    struct Stub {
        label: &'static str,
        status: fn(&Ctx) -> NodeStatus,
    }

    impl ActionNode<Ctx> for Stub {
        fn label(&self) -> &str {
            self.label
        }

        fn evaluate(&mut self, ctx: &mut Ctx) -> NodeStatus {
            ctx.calls.push(self.label);
            (self.status)(ctx)
        }
    }

    fn stub(label: &'static str, status: fn(&Ctx) -> NodeStatus) -> Stub {
        Stub { label, status }
    }

    fn tree() -> Selector<Ctx> {
        Selector::new("Root")
            .with(
                Sequence::new("DEATH")
                    .with(stub("IsDead", |ctx| {
                        if ctx.dead {
                            NodeStatus::Success
                        } else {
                            NodeStatus::Failure
                        }
                    }))
                    .with(stub("PlayDeath", |_| NodeStatus::Success)),
            )
            .with(Sequence::new("DETECTION").with(stub("Detect", |_| NodeStatus::Failure)))
            .with(Sequence::new("ATTACK").with(stub("Swing", |_| NodeStatus::Running)))
            .with(Sequence::new("IDLE").with(stub("Idle", |_| NodeStatus::Success)))
    }

    #[test]
    fn death_wins_and_lower_priorities_never_run() {
        let mut root = tree();
        let mut ctx = Ctx {
            dead: true,
            ..Ctx::default()
        };
        let evaluation = root.evaluate(&mut ctx);
        assert_eq!(evaluation.status, NodeStatus::Success);
        assert_eq!(evaluation.path, "Root/DEATH/END");
        assert_eq!(ctx.calls, vec!["IsDead", "PlayDeath"]);
    }

    #[test]
    fn failure_falls_through_and_running_short_circuits() {
        let mut root = tree();
        let mut ctx = Ctx::default();
        let evaluation = root.evaluate(&mut ctx);
        assert_eq!(evaluation.status, NodeStatus::Running);
        assert_eq!(evaluation.path, "Root/ATTACK/Swing");
        assert_eq!(ctx.calls, vec!["IsDead", "Detect", "Swing"]);
    }

    #[test]
    fn sequence_reports_failing_child() {
        let mut sequence = Sequence::new("CHASE")
            .with(stub("HasTarget", |_| NodeStatus::Success))
            .with(stub("InRange", |_| NodeStatus::Failure))
            .with(stub("Move", |_| NodeStatus::Success));
        let mut ctx = Ctx::default();
        let evaluation = sequence.evaluate(&mut ctx);
        assert_eq!(evaluation.status, NodeStatus::Failure);
        assert_eq!(evaluation.path, "CHASE/InRange");
        assert_eq!(ctx.calls, vec!["HasTarget", "InRange"]);
    }

    #[test]
    fn all_failing_selector_ends_with_failure() {
        let mut root = Selector::new("Root")
            .with(Sequence::new("A").with(stub("a", |_| NodeStatus::Failure)));
        let evaluation = root.evaluate(&mut Ctx::default());
        assert_eq!(evaluation.status, NodeStatus::Failure);
        assert_eq!(evaluation.path, "Root/END");
    }
}
