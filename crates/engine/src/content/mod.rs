mod compiler;
mod database;

pub use compiler::{compile_def_database, ContentCompileError, ContentErrorCode, SourceLocation};
pub use database::{ActionDef, AttackDef, AttackKind, CharacterDef, DefDatabase};
