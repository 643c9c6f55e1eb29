use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};

use crate::app::Vec2;

use super::database::{ActionDef, AttackDef, AttackKind, CharacterDef, DefDatabase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentErrorCode {
    ReadFile,
    XmlMalformed,
    InvalidRoot,
    UnknownDefType,
    UnknownField,
    DuplicateField,
    MissingField,
    InvalidValue,
    DuplicateDef,
}

#[derive(Debug, Clone)]
pub struct ContentCompileError {
    pub code: ContentErrorCode,
    pub message: String,
    pub file_path: PathBuf,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for ContentCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (file={}, line={}, column={})",
                self.code,
                self.message,
                self.file_path.display(),
                loc.line,
                loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (file={})",
                self.code,
                self.message,
                self.file_path.display()
            ),
        }
    }
}

impl std::error::Error for ContentCompileError {}

#[derive(Clone, Copy)]
struct DocContext<'a, 'input> {
    file_path: &'a Path,
    doc: &'a Document<'input>,
}

enum ParsedDef {
    Character(CharacterDef),
    Action(ActionDef),
}

/// Compiles every `*.xml` file under `content_dir` (sorted by relative path)
/// into one database.
pub fn compile_def_database(content_dir: &Path) -> Result<DefDatabase, ContentCompileError> {
    let xml_files = collect_xml_files_sorted(content_dir)
        .map_err(|error| read_error(error.path, error.source))?;

    let mut characters = Vec::<CharacterDef>::new();
    let mut actions = Vec::<ActionDef>::new();
    let mut seen_names = HashSet::<String>::new();
    let mut seen_states = HashSet::<String>::new();

    for xml_file in xml_files {
        let raw = fs::read_to_string(&xml_file)
            .map_err(|source| read_error(xml_file.clone(), source))?;
        for def in parse_defs_document(&xml_file, &raw)? {
            let def_name = match &def {
                ParsedDef::Character(character) => character.def_name.clone(),
                ParsedDef::Action(action) => action.def_name.clone(),
            };
            if !seen_names.insert(def_name.clone()) {
                return Err(duplicate_error(
                    &xml_file,
                    format!("duplicate defName '{def_name}'"),
                ));
            }
            match def {
                ParsedDef::Character(character) => characters.push(character),
                ParsedDef::Action(action) => {
                    if !seen_states.insert(action.state.clone()) {
                        return Err(duplicate_error(
                            &xml_file,
                            format!("more than one ActionDef for state '{}'", action.state),
                        ));
                    }
                    actions.push(action);
                }
            }
        }
    }

    Ok(DefDatabase::from_defs(characters, actions))
}

fn parse_defs_document(file_path: &Path, raw: &str) -> Result<Vec<ParsedDef>, ContentCompileError> {
    let doc = Document::parse(raw).map_err(|error| ContentCompileError {
        code: ContentErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;
    let ctx = DocContext {
        file_path,
        doc: &doc,
    };

    let root = doc.root_element();
    if root.tag_name().name() != "Defs" {
        return Err(error_at_node(
            ContentErrorCode::InvalidRoot,
            "root element must be <Defs>".to_string(),
            ctx,
            root,
        ));
    }

    let mut defs = Vec::<ParsedDef>::new();
    for child in root.children().filter(|node| node.is_element()) {
        match child.tag_name().name() {
            "CharacterDef" => defs.push(ParsedDef::Character(parse_character_def(ctx, child)?)),
            "ActionDef" => defs.push(ParsedDef::Action(parse_action_def(ctx, child)?)),
            other => {
                return Err(error_at_node(
                    ContentErrorCode::UnknownDefType,
                    format!(
                        "unsupported def type <{other}>; expected <CharacterDef> or <ActionDef>"
                    ),
                    ctx,
                    child,
                ))
            }
        }
    }

    Ok(defs)
}

fn parse_character_def(
    ctx: DocContext<'_, '_>,
    node: Node<'_, '_>,
) -> Result<CharacterDef, ContentCompileError> {
    let mut def_name: Option<String> = None;
    let mut max_health: Option<f32> = None;
    let mut move_speed = 5.0;
    let mut jump_force = 0.0;
    let mut defense = 0.0;
    let mut damage_reduction = 0.0;
    let mut hit_recovery = 0.3;
    let mut attack_recovery = 0.3;
    let mut attacks = Vec::<AttackDef>::new();

    for field in unique_fields(ctx, node, "CharacterDef")? {
        match field.tag_name().name() {
            "defName" => def_name = Some(required_text(ctx, field, "defName")?),
            "maxHealth" => max_health = Some(positive_number(ctx, field, "maxHealth")?),
            "moveSpeed" => move_speed = non_negative_number(ctx, field, "moveSpeed")?,
            "jumpForce" => jump_force = non_negative_number(ctx, field, "jumpForce")?,
            "defense" => defense = non_negative_number(ctx, field, "defense")?,
            "damageReduction" => {
                damage_reduction = unit_interval_number(ctx, field, "damageReduction")?
            }
            "hitRecovery" => hit_recovery = non_negative_number(ctx, field, "hitRecovery")?,
            "attackRecovery" => {
                attack_recovery = non_negative_number(ctx, field, "attackRecovery")?
            }
            "attacks" => {
                for item in field.children().filter(|child| child.is_element()) {
                    if item.tag_name().name() != "li" {
                        return Err(error_at_node(
                            ContentErrorCode::UnknownField,
                            format!("<attacks> entries must be <li>, found <{}>", item.tag_name().name()),
                            ctx,
                            item,
                        ));
                    }
                    attacks.push(parse_attack(ctx, item)?);
                }
            }
            other => return Err(unknown_field(ctx, field, other, "CharacterDef")),
        }
    }

    let def_name = def_name.ok_or_else(|| missing_field(ctx, node, "defName", "CharacterDef"))?;
    let max_health =
        max_health.ok_or_else(|| missing_field(ctx, node, "maxHealth", "CharacterDef"))?;

    Ok(CharacterDef {
        def_name,
        max_health,
        move_speed,
        jump_force,
        defense,
        damage_reduction,
        hit_recovery,
        attack_recovery,
        attacks,
    })
}

fn parse_attack(
    ctx: DocContext<'_, '_>,
    node: Node<'_, '_>,
) -> Result<AttackDef, ContentCompileError> {
    let mut kind: Option<AttackKind> = None;
    let mut damage: Option<f32> = None;
    let mut cooldown: Option<f32> = None;
    let mut range: Option<f32> = None;
    let mut knockback = Vec2::ZERO;
    let mut projectile_speed = 0.0;
    let mut lifetime = 2.0;
    let mut hit_window = (0.0, 1.0);

    for field in unique_fields(ctx, node, "li")? {
        match field.tag_name().name() {
            "kind" => {
                let value = required_text(ctx, field, "kind")?;
                kind = Some(AttackKind::parse(&value).ok_or_else(|| {
                    error_at_node(
                        ContentErrorCode::InvalidValue,
                        format!(
                            "invalid attack kind '{value}'; allowed values: Melee, Projectile, Aoe, Orbit"
                        ),
                        ctx,
                        field,
                    )
                })?);
            }
            "damage" => damage = Some(non_negative_number(ctx, field, "damage")?),
            "cooldown" => cooldown = Some(non_negative_number(ctx, field, "cooldown")?),
            "range" => range = Some(non_negative_number(ctx, field, "range")?),
            "knockbackX" => knockback.x = number(ctx, field, "knockbackX")?,
            "knockbackY" => knockback.y = number(ctx, field, "knockbackY")?,
            "projectileSpeed" => {
                projectile_speed = non_negative_number(ctx, field, "projectileSpeed")?
            }
            "lifetime" => lifetime = positive_number(ctx, field, "lifetime")?,
            "hitWindowMin" => hit_window.0 = unit_interval_number(ctx, field, "hitWindowMin")?,
            "hitWindowMax" => hit_window.1 = unit_interval_number(ctx, field, "hitWindowMax")?,
            other => return Err(unknown_field(ctx, field, other, "attacks/li")),
        }
    }

    if hit_window.0 > hit_window.1 {
        return Err(error_at_node(
            ContentErrorCode::InvalidValue,
            "hitWindowMin must not exceed hitWindowMax".to_string(),
            ctx,
            node,
        ));
    }

    Ok(AttackDef {
        kind: kind.ok_or_else(|| missing_field(ctx, node, "kind", "attacks/li"))?,
        damage: damage.ok_or_else(|| missing_field(ctx, node, "damage", "attacks/li"))?,
        cooldown: cooldown.ok_or_else(|| missing_field(ctx, node, "cooldown", "attacks/li"))?,
        range: range.ok_or_else(|| missing_field(ctx, node, "range", "attacks/li"))?,
        knockback,
        projectile_speed,
        lifetime,
        hit_window,
    })
}

fn parse_action_def(
    ctx: DocContext<'_, '_>,
    node: Node<'_, '_>,
) -> Result<ActionDef, ContentCompileError> {
    let mut def_name: Option<String> = None;
    let mut state: Option<String> = None;
    let mut cooldown: Option<f32> = None;
    let mut duration: Option<f32> = None;
    let mut noise_mean = 0.0;
    let mut noise_std = 0.0;

    for field in unique_fields(ctx, node, "ActionDef")? {
        match field.tag_name().name() {
            "defName" => def_name = Some(required_text(ctx, field, "defName")?),
            "state" => state = Some(required_text(ctx, field, "state")?.to_ascii_uppercase()),
            "cooldown" => cooldown = Some(non_negative_number(ctx, field, "cooldown")?),
            "duration" => duration = Some(non_negative_number(ctx, field, "duration")?),
            "noiseMean" => noise_mean = number(ctx, field, "noiseMean")?,
            "noiseStd" => noise_std = non_negative_number(ctx, field, "noiseStd")?,
            other => return Err(unknown_field(ctx, field, other, "ActionDef")),
        }
    }

    Ok(ActionDef {
        def_name: def_name.ok_or_else(|| missing_field(ctx, node, "defName", "ActionDef"))?,
        state: state.ok_or_else(|| missing_field(ctx, node, "state", "ActionDef"))?,
        cooldown: cooldown.ok_or_else(|| missing_field(ctx, node, "cooldown", "ActionDef"))?,
        duration: duration.ok_or_else(|| missing_field(ctx, node, "duration", "ActionDef"))?,
        noise_mean,
        noise_std,
    })
}

fn unique_fields<'a, 'input>(
    ctx: DocContext<'_, '_>,
    node: Node<'a, 'input>,
    owner: &str,
) -> Result<Vec<Node<'a, 'input>>, ContentCompileError> {
    let mut seen_fields = HashSet::<&str>::new();
    let mut fields = Vec::new();
    for field in node.children().filter(|child| child.is_element()) {
        let field_name = field.tag_name().name();
        if !seen_fields.insert(field_name) {
            return Err(error_at_node(
                ContentErrorCode::DuplicateField,
                format!("duplicate field <{field_name}> in <{owner}>"),
                ctx,
                field,
            ));
        }
        fields.push(field);
    }
    Ok(fields)
}

fn required_text(
    ctx: DocContext<'_, '_>,
    node: Node<'_, '_>,
    field_name: &str,
) -> Result<String, ContentCompileError> {
    let value = node.text().map(str::trim).unwrap_or_default().to_string();
    if value.is_empty() {
        return Err(error_at_node(
            ContentErrorCode::MissingField,
            format!("field <{field_name}> must not be empty"),
            ctx,
            node,
        ));
    }
    Ok(value)
}

fn number(
    ctx: DocContext<'_, '_>,
    node: Node<'_, '_>,
    field_name: &str,
) -> Result<f32, ContentCompileError> {
    let value = required_text(ctx, node, field_name)?;
    match value.parse::<f32>() {
        Ok(parsed) if parsed.is_finite() => Ok(parsed),
        _ => Err(error_at_node(
            ContentErrorCode::InvalidValue,
            format!("{field_name} '{value}' is not a valid number"),
            ctx,
            node,
        )),
    }
}

fn non_negative_number(
    ctx: DocContext<'_, '_>,
    node: Node<'_, '_>,
    field_name: &str,
) -> Result<f32, ContentCompileError> {
    let parsed = number(ctx, node, field_name)?;
    if parsed < 0.0 {
        return Err(error_at_node(
            ContentErrorCode::InvalidValue,
            format!("{field_name} must be >= 0"),
            ctx,
            node,
        ));
    }
    Ok(parsed)
}

fn positive_number(
    ctx: DocContext<'_, '_>,
    node: Node<'_, '_>,
    field_name: &str,
) -> Result<f32, ContentCompileError> {
    let parsed = number(ctx, node, field_name)?;
    if parsed <= 0.0 {
        return Err(error_at_node(
            ContentErrorCode::InvalidValue,
            format!("{field_name} must be > 0"),
            ctx,
            node,
        ));
    }
    Ok(parsed)
}

fn unit_interval_number(
    ctx: DocContext<'_, '_>,
    node: Node<'_, '_>,
    field_name: &str,
) -> Result<f32, ContentCompileError> {
    let parsed = number(ctx, node, field_name)?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(error_at_node(
            ContentErrorCode::InvalidValue,
            format!("{field_name} must be within [0, 1]"),
            ctx,
            node,
        ));
    }
    Ok(parsed)
}

fn unknown_field(
    ctx: DocContext<'_, '_>,
    node: Node<'_, '_>,
    field_name: &str,
    owner: &str,
) -> ContentCompileError {
    error_at_node(
        ContentErrorCode::UnknownField,
        format!("unknown field <{field_name}> in <{owner}>"),
        ctx,
        node,
    )
}

fn missing_field(
    ctx: DocContext<'_, '_>,
    node: Node<'_, '_>,
    field_name: &str,
    owner: &str,
) -> ContentCompileError {
    error_at_node(
        ContentErrorCode::MissingField,
        format!("missing required field <{field_name}> in <{owner}>"),
        ctx,
        node,
    )
}

fn error_at_node(
    code: ContentErrorCode,
    message: String,
    ctx: DocContext<'_, '_>,
    node: Node<'_, '_>,
) -> ContentCompileError {
    let pos = ctx.doc.text_pos_at(node.range().start);
    ContentCompileError {
        code,
        message,
        file_path: ctx.file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: pos.row as usize,
            column: pos.col as usize,
        }),
    }
}

fn duplicate_error(file_path: &Path, message: String) -> ContentCompileError {
    ContentCompileError {
        code: ContentErrorCode::DuplicateDef,
        message,
        file_path: file_path.to_path_buf(),
        location: None,
    }
}

struct ReadError {
    path: PathBuf,
    source: std::io::Error,
}

fn collect_xml_files_sorted(root: &Path) -> Result<Vec<PathBuf>, ReadError> {
    let mut files = Vec::<PathBuf>::new();
    collect_recursive(root, &mut files)?;
    files.sort_by_key(|path| normalize_rel_path(path.strip_prefix(root).unwrap_or(path)));
    Ok(files)
}

fn collect_recursive(current: &Path, files: &mut Vec<PathBuf>) -> Result<(), ReadError> {
    let entries = fs::read_dir(current).map_err(|source| ReadError {
        path: current.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ReadError {
            path: current.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, files)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_error(path: PathBuf, source: std::io::Error) -> ContentCompileError {
    ContentCompileError {
        code: ContentErrorCode::ReadFile,
        message: format!("failed to read content: {source}"),
        file_path: path,
        location: None,
    }
}
