use std::collections::HashMap;

use crate::app::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttackKind {
    Melee,
    Projectile,
    Aoe,
    /// Staggered multi-point spawn of orbiting instances.
    Orbit,
}

impl AttackKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Melee" => Some(Self::Melee),
            "Projectile" => Some(Self::Projectile),
            "Aoe" => Some(Self::Aoe),
            "Orbit" => Some(Self::Orbit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttackDef {
    pub kind: AttackKind,
    pub damage: f32,
    pub cooldown: f32,
    pub range: f32,
    pub knockback: Vec2,
    pub projectile_speed: f32,
    pub lifetime: f32,
    /// Normalized active window of an AOE hitbox.
    pub hit_window: (f32, f32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharacterDef {
    pub def_name: String,
    pub max_health: f32,
    pub move_speed: f32,
    pub jump_force: f32,
    pub defense: f32,
    pub damage_reduction: f32,
    pub hit_recovery: f32,
    pub attack_recovery: f32,
    /// Slot 0 is the basic attack, later slots are skills.
    pub attacks: Vec<AttackDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionDef {
    pub def_name: String,
    /// Upper-case state tag, e.g. `SHIELD`.
    pub state: String,
    pub cooldown: f32,
    pub duration: f32,
    pub noise_mean: f32,
    pub noise_std: f32,
}

#[derive(Debug, Default, Clone)]
pub struct DefDatabase {
    characters: Vec<CharacterDef>,
    actions: Vec<ActionDef>,
    characters_by_name: HashMap<String, usize>,
    actions_by_state: HashMap<String, usize>,
}

impl DefDatabase {
    pub fn from_defs(characters: Vec<CharacterDef>, actions: Vec<ActionDef>) -> Self {
        let characters_by_name = characters
            .iter()
            .enumerate()
            .map(|(idx, def)| (def.def_name.clone(), idx))
            .collect();
        let actions_by_state = actions
            .iter()
            .enumerate()
            .map(|(idx, def)| (def.state.clone(), idx))
            .collect();
        Self {
            characters,
            actions,
            characters_by_name,
            actions_by_state,
        }
    }

    pub fn character(&self, def_name: &str) -> Option<&CharacterDef> {
        self.characters_by_name
            .get(def_name)
            .and_then(|idx| self.characters.get(*idx))
    }

    pub fn action_for_state(&self, state: &str) -> Option<&ActionDef> {
        self.actions_by_state
            .get(state)
            .and_then(|idx| self.actions.get(*idx))
    }

    pub fn characters(&self) -> &[CharacterDef] {
        &self.characters
    }

    pub fn actions(&self) -> &[ActionDef] {
        &self.actions
    }
}
