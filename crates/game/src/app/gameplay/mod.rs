mod ally;
mod attack;
mod boss;
mod chat;
mod events;
mod health;
mod physics;
mod player;
mod scene;
mod skills;
mod triggers;

pub(crate) use scene::{BattleScene, PendingModel, SceneBuildError};
