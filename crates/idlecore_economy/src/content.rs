//! # Content Registry
//!
//! Turns the freeform catalog (category -> key -> property bag) into typed
//! [`ContentItem`]s.
//!
//! ## Conversion
//!
//! Schema-directed, not reflection-based: the well-known fields `name`,
//! `type`, `description`, `cost`, `effects`, `initial` and `reqs` are
//! checked and coerced one by one (integer and floating literals are both
//! accepted for numbers). Every other field is kept verbatim in
//! [`ContentItem::properties`].
//!
//! ## Failure Policy
//!
//! All-or-nothing. The first malformed item aborts the load with a
//! [`ParseError`]; a partially built registry is never returned.
//!
//! ## Example
//!
//! ```rust,ignore
//! let registry = ContentRegistry::from_toml_str(r#"
//!     [resources.gold]
//!     initial = 10
//!
//!     [buildings.mine]
//!     cost = { gold = 10 }
//!     effects = ["yield:gold:count * 2"]
//! "#)?;
//!
//! let mine = registry.get_content("buildings", "mine")?;
//! ```

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{EconomyError, EconomyResult, ParseError};

/// Well-known category names.
pub mod category {
    /// Spendable resources (gold, wood...).
    pub const RESOURCES: &str = "resources";
    /// Buildings, bought repeatedly, produce yield every tick.
    pub const BUILDINGS: &str = "buildings";
    /// One-off upgrades, provide multipliers.
    pub const UPGRADES: &str = "upgrades";
    /// Levelled achievements with conditions and rewards.
    pub const ACHIEVEMENTS: &str = "achievements";
    /// Time-limited bonus events.
    pub const SHINIES: &str = "shinies";
    /// The prestige definition (single item keyed `prestige`).
    pub const PRESTIGE: &str = "prestige";
}

/// Key of the single prestige item inside the prestige category.
pub const PRESTIGE_KEY: &str = "prestige";

// ============================================================================
// Effects
// ============================================================================

/// Kind of state transition an effect performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EffectKind {
    /// Adds the evaluated expression to a resource.
    Yield,
    /// Scales a multiplier by a static value.
    Multiply,
    /// Activates a shiny timer.
    Grant,
    /// Applies a shiny's own yield effects.
    Spawn,
    /// Restores a resource (or `all`) to its catalog initial value.
    Reset,
}

impl EffectKind {
    /// Parses the catalog spelling of an effect type.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "yield" => Some(Self::Yield),
            "multiply" => Some(Self::Multiply),
            "grant" => Some(Self::Grant),
            "spawn" => Some(Self::Spawn),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }

    /// Catalog spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yield => "yield",
            Self::Multiply => "multiply",
            Self::Grant => "grant",
            Self::Spawn => "spawn",
            Self::Reset => "reset",
        }
    }
}

/// A typed, formula-capable state transition.
#[derive(Clone, Debug, PartialEq)]
pub struct Effect {
    /// What the effect does.
    pub kind: EffectKind,
    /// Resource, building or shiny key it acts on.
    pub target: String,
    /// Static amount, used when `expression` is absent.
    pub value: f64,
    /// Formula. Takes precedence over `value`.
    pub expression: Option<String>,
    /// Optional per-effect gate, evaluated before dispatch.
    pub condition: Option<String>,
}

impl Effect {
    /// Creates an effect with only kind and target set.
    #[must_use]
    pub fn new(kind: EffectKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            value: 0.0,
            expression: None,
            condition: None,
        }
    }

    /// Sets the static value.
    #[must_use]
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    /// Sets the formula.
    #[must_use]
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// Sets the per-effect condition.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    fn from_value(category: &str, key: &str, raw: &Value) -> Result<Self, ParseError> {
        match raw {
            Value::String(text) => Self::from_shorthand(category, key, text),
            Value::Object(fields) => Self::from_fields(category, key, fields),
            other => Err(ParseError::new(
                category,
                key,
                format!("effect must be a mapping or string, got {}", kind_name(other)),
            )),
        }
    }

    /// `type:target[:expression]`, e.g. `yield:gold:count * 2`.
    fn from_shorthand(category: &str, key: &str, text: &str) -> Result<Self, ParseError> {
        let mut parts = text.splitn(3, ':');
        let kind_raw = parts.next().unwrap_or_default();
        let target = parts
            .next()
            .ok_or_else(|| ParseError::new(category, key, format!("effect '{text}' has no target")))?;
        let kind = EffectKind::parse(kind_raw).ok_or_else(|| {
            ParseError::new(category, key, format!("unknown effect type '{kind_raw}'"))
        })?;

        let mut effect = Self::new(kind, target.trim());
        if let Some(rest) = parts.next().map(str::trim).filter(|s| !s.is_empty()) {
            match rest.parse::<f64>() {
                Ok(number) if kind == EffectKind::Multiply => effect.value = number,
                _ => effect.expression = Some(rest.to_string()),
            }
        }
        Ok(effect)
    }

    fn from_fields(
        category: &str,
        key: &str,
        fields: &Map<String, Value>,
    ) -> Result<Self, ParseError> {
        let kind_raw = optional_string(category, key, fields, "type")?
            .ok_or_else(|| ParseError::new(category, key, "effect is missing 'type'"))?;
        let kind = EffectKind::parse(&kind_raw).ok_or_else(|| {
            ParseError::new(category, key, format!("unknown effect type '{kind_raw}'"))
        })?;

        Ok(Self {
            kind,
            target: optional_string(category, key, fields, "target")?.unwrap_or_default(),
            value: optional_number(category, key, fields, "value")?.unwrap_or(0.0),
            expression: optional_string(category, key, fields, "expression")?
                .filter(|s| !s.trim().is_empty()),
            condition: optional_string(category, key, fields, "condition")?
                .filter(|s| !s.trim().is_empty()),
        })
    }
}

/// Gate shared by every effect of a block, checked once per execution.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockGate {
    /// Passes with this probability, in percent.
    Chance(f64),
    /// Passes when the formula is truthy.
    Condition(String),
}

impl BlockGate {
    /// Reads the gate from an item's `chance` or `condition` field.
    ///
    /// `chance` accepts a number or a string such as `"25%"`.
    fn from_fields(
        category: &str,
        key: &str,
        fields: &Map<String, Value>,
    ) -> Result<Option<Self>, ParseError> {
        match fields.get("chance") {
            None | Some(Value::Null) => {}
            Some(Value::Number(n)) => {
                return n.as_f64().map(|p| Some(Self::Chance(p))).ok_or_else(|| {
                    ParseError::new(category, key, "'chance' is out of range")
                })
            }
            Some(Value::String(text)) => {
                let digits = text.trim().trim_end_matches('%').trim();
                return digits.parse::<f64>().map(|p| Some(Self::Chance(p))).map_err(|_| {
                    ParseError::new(category, key, format!("'chance' is not a percentage: '{text}'"))
                });
            }
            Some(other) => {
                return Err(ParseError::new(
                    category,
                    key,
                    format!("'chance' must be a number or percentage, got {}", kind_name(other)),
                ))
            }
        }
        Ok(optional_string(category, key, fields, "condition")?
            .filter(|c| !c.trim().is_empty())
            .map(Self::Condition))
    }
}

/// Ordered effects sharing one optional gate.
///
/// When the gate fails the whole block is skipped; each effect's own
/// `condition` is still checked individually when the gate passes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EffectBlock {
    /// Block-level gate.
    pub gate: Option<BlockGate>,
    /// Effects, applied in order.
    pub effects: Vec<Effect>,
}

impl EffectBlock {
    /// Ungated block.
    #[must_use]
    pub fn new(effects: Vec<Effect>) -> Self {
        Self { gate: None, effects }
    }

    /// Sets the gate.
    #[must_use]
    pub fn with_gate(mut self, gate: BlockGate) -> Self {
        self.gate = Some(gate);
        self
    }
}

// ============================================================================
// Achievements
// ============================================================================

/// One level of a levelled achievement.
#[derive(Clone, Debug, PartialEq)]
pub struct AchievementLevel {
    /// Level number (1-based, need not be contiguous).
    pub level: u32,
    /// Formula that must evaluate truthy to unlock.
    pub condition: String,
    /// Resources granted on unlock.
    pub rewards: BTreeMap<String, f64>,
}

fn parse_levels(
    category: &str,
    key: &str,
    fields: &Map<String, Value>,
) -> Result<Vec<AchievementLevel>, ParseError> {
    if let Some(raw_levels) = fields.get("levels") {
        let Value::Array(entries) = raw_levels else {
            return Err(ParseError::new(category, key, "'levels' must be a list"));
        };
        let mut levels = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let Value::Object(level_fields) = entry else {
                return Err(ParseError::new(
                    category,
                    key,
                    format!("level #{index} must be a mapping"),
                ));
            };
            levels.push(parse_level(category, key, level_fields, index + 1)?);
        }
        return Ok(levels);
    }

    // Flat form: a single condition is level 1.
    if fields.contains_key("condition") {
        return Ok(vec![parse_level(category, key, fields, 1)?]);
    }
    Ok(Vec::new())
}

fn parse_level(
    category: &str,
    key: &str,
    fields: &Map<String, Value>,
    default_level: usize,
) -> Result<AchievementLevel, ParseError> {
    let level = match optional_number(category, key, fields, "level")? {
        Some(n) if n >= 1.0 && n.fract() == 0.0 => n as u32,
        Some(n) => {
            return Err(ParseError::new(
                category,
                key,
                format!("level must be a positive integer, got {n}"),
            ))
        }
        None => u32::try_from(default_level).unwrap_or(u32::MAX),
    };
    let condition = optional_string(category, key, fields, "condition")?
        .ok_or_else(|| ParseError::new(category, key, format!("level {level} has no condition")))?;
    let rewards = number_map(category, key, fields, "rewards")?;
    Ok(AchievementLevel {
        level,
        condition,
        rewards,
    })
}

// ============================================================================
// Content Items
// ============================================================================

/// A catalog-defined entity.
///
/// Unique per `(category, key)`, immutable once the registry is built.
#[derive(Clone, Debug, PartialEq)]
pub struct ContentItem {
    /// Category the item was declared under.
    pub category: String,
    /// Key inside the category.
    pub key: String,
    /// Display name (defaults to the key).
    pub name: String,
    /// Free-form `type` tag.
    pub item_type: Option<String>,
    /// Display description.
    pub description: String,
    /// Base cost, resource key -> amount.
    pub cost: BTreeMap<String, f64>,
    /// Ordered effect list.
    pub effects: Vec<Effect>,
    /// Gate over the whole effect list, from `chance` / `condition`.
    pub gate: Option<BlockGate>,
    /// Starting amount for resources and buildings.
    pub initial: f64,
    /// Keys the player must have before buying this item.
    pub requirements: Vec<String>,
    /// Achievement levels (empty for other categories).
    pub levels: Vec<AchievementLevel>,
    /// Every field that is not one of the well-known ones, verbatim.
    pub properties: BTreeMap<String, Value>,
}

/// Field names extracted into typed slots.
const KNOWN_FIELDS: [&str; 7] = [
    "name",
    "type",
    "description",
    "cost",
    "effects",
    "initial",
    "reqs",
];

impl ContentItem {
    /// Converts a raw property bag into a content item.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the bag is not a mapping or any well-known
    /// field has the wrong shape.
    pub fn from_value(category: &str, key: &str, raw: &Value) -> Result<Self, ParseError> {
        let Value::Object(fields) = raw else {
            return Err(ParseError::new(
                category,
                key,
                format!("item must be a mapping, got {}", kind_name(raw)),
            ));
        };

        let initial = optional_number(category, key, fields, "initial")?.unwrap_or(0.0);
        if initial < 0.0 {
            return Err(ParseError::new(category, key, "initial must not be negative"));
        }

        let effects = match fields.get("effects") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(raw_effects)) => raw_effects
                .iter()
                .map(|e| Effect::from_value(category, key, e))
                .collect::<Result<_, _>>()?,
            Some(single @ (Value::Object(_) | Value::String(_))) => {
                vec![Effect::from_value(category, key, single)?]
            }
            Some(other) => {
                return Err(ParseError::new(
                    category,
                    key,
                    format!("'effects' must be a list, got {}", kind_name(other)),
                ))
            }
        };

        // Achievements use `condition` for their unlock level instead.
        let (levels, gate) = if category == category::ACHIEVEMENTS {
            (parse_levels(category, key, fields)?, None)
        } else {
            (Vec::new(), BlockGate::from_fields(category, key, fields)?)
        };

        let properties = fields
            .iter()
            .filter(|(name, _)| !KNOWN_FIELDS.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Ok(Self {
            category: category.to_string(),
            key: key.to_string(),
            name: optional_string(category, key, fields, "name")?.unwrap_or_else(|| key.to_string()),
            item_type: optional_string(category, key, fields, "type")?,
            description: optional_string(category, key, fields, "description")?.unwrap_or_default(),
            cost: number_map(category, key, fields, "cost")?,
            effects,
            gate,
            initial,
            requirements: string_list(category, key, fields, "reqs")?,
            levels,
            properties,
        })
    }

    /// Looks up an extension property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Extension property coerced to a number, if it is one.
    #[must_use]
    pub fn number_property(&self, name: &str) -> Option<f64> {
        self.properties.get(name).and_then(Value::as_f64)
    }

    /// The item's effects and gate as a standalone block.
    #[must_use]
    pub fn effect_block(&self) -> EffectBlock {
        EffectBlock {
            gate: self.gate.clone(),
            effects: self.effects.clone(),
        }
    }

    /// Effects of the given kind, in declaration order.
    pub fn effects_of(&self, kind: EffectKind) -> impl Iterator<Item = &Effect> {
        self.effects.iter().filter(move |e| e.kind == kind)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Category -> key -> item table, read-only after construction.
#[derive(Debug, Default)]
pub struct ContentRegistry {
    categories: HashMap<String, HashMap<String, ContentItem>>,
    empty: HashMap<String, ContentItem>,
}

impl ContentRegistry {
    /// Builds a registry from a catalog document.
    ///
    /// The document is either the category mapping itself or a mapping with
    /// a top-level `content` key holding it.
    ///
    /// # Errors
    ///
    /// Returns the first [`ParseError`] encountered; nothing is kept.
    pub fn load(catalog: &Value) -> Result<Self, ParseError> {
        let root = match catalog {
            Value::Object(map) => match map.get("content") {
                Some(Value::Object(inner)) => inner,
                _ => map,
            },
            other => {
                return Err(ParseError::new(
                    "catalog",
                    "",
                    format!("catalog must be a mapping, got {}", kind_name(other)),
                ))
            }
        };

        let mut categories = HashMap::with_capacity(root.len());
        for (category_name, raw_items) in root {
            let Value::Object(items) = raw_items else {
                return Err(ParseError::new(
                    category_name,
                    "",
                    format!("category must be a mapping, got {}", kind_name(raw_items)),
                ));
            };

            let mut parsed = HashMap::with_capacity(items.len());
            for (key, raw) in items {
                parsed.insert(key.clone(), ContentItem::from_value(category_name, key, raw)?);
            }
            categories.insert(category_name.clone(), parsed);
        }

        let registry = Self {
            categories,
            empty: HashMap::new(),
        };
        tracing::info!(
            categories = registry.categories.len(),
            items = registry.item_count(),
            "content catalog loaded"
        );
        Ok(registry)
    }

    /// Parses a JSON catalog.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for invalid JSON or malformed items.
    pub fn from_json_str(source: &str) -> Result<Self, ParseError> {
        let document: Value = serde_json::from_str(source)
            .map_err(|e| ParseError::new("catalog", "", format!("invalid JSON: {e}")))?;
        Self::load(&document)
    }

    /// Parses a TOML catalog.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] for invalid TOML or malformed items.
    pub fn from_toml_str(source: &str) -> Result<Self, ParseError> {
        let document: Value = toml::from_str(source)
            .map_err(|e| ParseError::new("catalog", "", format!("invalid TOML: {e}")))?;
        Self::load(&document)
    }

    /// Reads a catalog file, choosing the format by extension
    /// (`.json`, anything else is TOML).
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> EconomyResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            EconomyError::Config(format!("cannot read catalog {}: {e}", path.display()))
        })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let registry = if is_json {
            Self::from_json_str(&source)?
        } else {
            Self::from_toml_str(&source)?
        };
        Ok(registry)
    }

    /// Returns the item at `(category, key)`.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::NotFound`] if either part is unknown.
    pub fn get_content(&self, category: &str, key: &str) -> EconomyResult<&ContentItem> {
        self.categories
            .get(category)
            .and_then(|items| items.get(key))
            .ok_or_else(|| EconomyError::not_found(category, key))
    }

    /// All items of a category (empty for unknown categories).
    ///
    /// Iteration order is not specified.
    #[must_use]
    pub fn get_all_content(&self, category: &str) -> &HashMap<String, ContentItem> {
        self.categories.get(category).unwrap_or(&self.empty)
    }

    /// Category names present in the catalog.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    /// Total number of items across all categories.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.categories.values().map(HashMap::len).sum()
    }

    /// Resource definitions.
    #[must_use]
    pub fn resources(&self) -> &HashMap<String, ContentItem> {
        self.get_all_content(category::RESOURCES)
    }

    /// Building definitions.
    #[must_use]
    pub fn buildings(&self) -> &HashMap<String, ContentItem> {
        self.get_all_content(category::BUILDINGS)
    }

    /// Upgrade definitions.
    #[must_use]
    pub fn upgrades(&self) -> &HashMap<String, ContentItem> {
        self.get_all_content(category::UPGRADES)
    }

    /// Achievement definitions.
    #[must_use]
    pub fn achievements(&self) -> &HashMap<String, ContentItem> {
        self.get_all_content(category::ACHIEVEMENTS)
    }

    /// Shiny definitions.
    #[must_use]
    pub fn shinies(&self) -> &HashMap<String, ContentItem> {
        self.get_all_content(category::SHINIES)
    }

    /// The configured prestige item.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::NotFound`] if the catalog has none.
    pub fn prestige(&self) -> EconomyResult<&ContentItem> {
        self.get_content(category::PRESTIGE, PRESTIGE_KEY)
    }

    /// Catalog `initial` for a resource, 0 when the resource is not declared.
    #[must_use]
    pub fn initial_resource(&self, key: &str) -> f64 {
        self.resources().get(key).map_or(0.0, |item| item.initial)
    }
}

// ============================================================================
// Field coercion helpers
// ============================================================================

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

fn optional_string(
    category: &str,
    key: &str,
    fields: &Map<String, Value>,
    field: &str,
) -> Result<Option<String>, ParseError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ParseError::new(
            category,
            key,
            format!("'{field}' must be a string, got {}", kind_name(other)),
        )),
    }
}

fn optional_number(
    category: &str,
    key: &str,
    fields: &Map<String, Value>,
    field: &str,
) -> Result<Option<f64>, ParseError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| {
            ParseError::new(category, key, format!("'{field}' is out of range"))
        }),
        Some(other) => Err(ParseError::new(
            category,
            key,
            format!("'{field}' must be a number, got {}", kind_name(other)),
        )),
    }
}

fn number_map(
    category: &str,
    key: &str,
    fields: &Map<String, Value>,
    field: &str,
) -> Result<BTreeMap<String, f64>, ParseError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(resource, amount)| match amount.as_f64() {
                Some(n) if n >= 0.0 => Ok((resource.clone(), n)),
                Some(_) => Err(ParseError::new(
                    category,
                    key,
                    format!("'{field}.{resource}' must not be negative"),
                )),
                None => Err(ParseError::new(
                    category,
                    key,
                    format!("'{field}.{resource}' must be a number, got {}", kind_name(amount)),
                )),
            })
            .collect(),
        Some(other) => Err(ParseError::new(
            category,
            key,
            format!("'{field}' must be a mapping, got {}", kind_name(other)),
        )),
    }
}

fn string_list(
    category: &str,
    key: &str,
    fields: &Map<String, Value>,
    field: &str,
) -> Result<Vec<String>, ParseError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    ParseError::new(
                        category,
                        key,
                        format!("'{field}' entries must be strings, got {}", kind_name(item)),
                    )
                })
            })
            .collect(),
        Some(other) => Err(ParseError::new(
            category,
            key,
            format!("'{field}' must be a list of keys, got {}", kind_name(other)),
        )),
    }
}
