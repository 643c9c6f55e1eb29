use magic_engine::{AttackDef, Vec2};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum ActorId {
    Player,
    Ally,
    Boss,
}

impl ActorId {
    pub(crate) fn as_token(self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Ally => "ally",
            Self::Boss => "boss",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CombatEvent {
    HealthChanged {
        actor: ActorId,
        max: f32,
        before: f32,
        current: f32,
    },
    Hit {
        actor: ActorId,
        knockback: Vec2,
    },
    Death {
        actor: ActorId,
    },
    AttackFired {
        actor: ActorId,
        slot: usize,
    },
    ShieldActivated {
        duration: f32,
    },
}

impl CombatEvent {
    fn kind(&self) -> CombatEventKind {
        match self {
            Self::HealthChanged { .. } => CombatEventKind::HealthChanged,
            Self::Hit { .. } => CombatEventKind::Hit,
            Self::Death { .. } => CombatEventKind::Death,
            Self::AttackFired { .. } => CombatEventKind::AttackFired,
            Self::ShieldActivated { .. } => CombatEventKind::ShieldActivated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CombatEventKind {
    HealthChanged,
    Hit,
    Death,
    AttackFired,
    ShieldActivated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CombatEventCounts {
    pub(crate) health_changed: u32,
    pub(crate) hit: u32,
    pub(crate) death: u32,
    pub(crate) attack_fired: u32,
    pub(crate) shield_activated: u32,
}

impl CombatEventCounts {
    fn record(&mut self, kind: CombatEventKind) {
        let slot = match kind {
            CombatEventKind::HealthChanged => &mut self.health_changed,
            CombatEventKind::Hit => &mut self.hit,
            CombatEventKind::Death => &mut self.death,
            CombatEventKind::AttackFired => &mut self.attack_fired,
            CombatEventKind::ShieldActivated => &mut self.shield_activated,
        };
        *slot = slot.saturating_add(1);
    }
}

/// Events raised during one tick. Listeners read them after the systems ran;
/// the bus is cleared at rollover.
#[derive(Debug, Default)]
pub(crate) struct CombatEventBus {
    current_tick_events: Vec<CombatEvent>,
    last_tick_counts: CombatEventCounts,
}

impl CombatEventBus {
    pub(crate) fn emit(&mut self, event: CombatEvent) {
        self.current_tick_events.push(event);
    }

    /// Takes the events emitted so far, leaving the bus open for more.
    pub(crate) fn take_pending(&mut self) -> Vec<CombatEvent> {
        let taken = std::mem::take(&mut self.current_tick_events);
        for event in &taken {
            self.last_tick_counts.record(event.kind());
        }
        taken
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.current_tick_events.is_empty()
    }

    pub(crate) fn finish_tick_rollover(&mut self) -> CombatEventCounts {
        for event in &self.current_tick_events {
            self.last_tick_counts.record(event.kind());
        }
        self.current_tick_events.clear();
        std::mem::take(&mut self.last_tick_counts)
    }
}

/// Where an attack originates: the attacker, its position and facing sign.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct AttackOrigin {
    pub(crate) attacker: ActorId,
    pub(crate) position: Vec2,
    pub(crate) facing: f32,
    pub(crate) target: ActorId,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CombatIntent {
    ApplyHit {
        target: ActorId,
        damage: f32,
        knockback: Vec2,
    },
    SpawnSkill {
        origin: AttackOrigin,
        slot: usize,
        attack: AttackDef,
    },
}

#[derive(Debug, Default)]
pub(crate) struct CombatIntentQueue {
    intents: Vec<CombatIntent>,
}

impl CombatIntentQueue {
    pub(crate) fn push(&mut self, intent: CombatIntent) {
        self.intents.push(intent);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.intents.len()
    }

    pub(crate) fn drain_current_tick(&mut self) -> Vec<CombatIntent> {
        std::mem::take(&mut self.intents)
    }
}
