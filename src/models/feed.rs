use serde::{Deserialize, Serialize};
use std::fmt;

pub type FeedId = u32;
pub type UserId = u32;

/// Maximum byte length of a feed unit.
pub const MAX_UNIT_LEN: usize = 10;

/// Storage strategy a feed is bound to at creation.
///
/// The numeric ids are what the metadata store persists, so they must never
/// be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    RelationalTable,
    VariableInterval,
    FixedInterval,
    Virtual,
    MemoryTable,
    WriteBuffer,
    /// Experimental wide-column backend, never accepted by the registry.
    Columnar,
}

impl EngineKind {
    pub const ALL: [EngineKind; 7] = [
        EngineKind::RelationalTable,
        EngineKind::VariableInterval,
        EngineKind::FixedInterval,
        EngineKind::Virtual,
        EngineKind::MemoryTable,
        EngineKind::WriteBuffer,
        EngineKind::Columnar,
    ];

    pub fn id(self) -> u32 {
        match self {
            EngineKind::RelationalTable => 0,
            EngineKind::VariableInterval => 2,
            EngineKind::FixedInterval => 5,
            EngineKind::Virtual => 7,
            EngineKind::MemoryTable => 8,
            EngineKind::WriteBuffer => 9,
            EngineKind::Columnar => 10,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }

    /// Parses either a numeric id or a kind name such as `fixed_interval`.
    pub fn parse(input: &str) -> Option<Self> {
        if let Ok(id) = input.trim().parse::<u32>() {
            return Self::from_id(id);
        }
        Self::ALL.into_iter().find(|kind| kind.name() == input.trim())
    }

    pub fn name(self) -> &'static str {
        match self {
            EngineKind::RelationalTable => "relational_table",
            EngineKind::VariableInterval => "variable_interval",
            EngineKind::FixedInterval => "fixed_interval",
            EngineKind::Virtual => "virtual",
            EngineKind::MemoryTable => "memory_table",
            EngineKind::WriteBuffer => "write_buffer",
            EngineKind::Columnar => "columnar",
        }
    }

    /// Kinds the engine registry will construct.
    pub fn is_production(self) -> bool {
        !matches!(self, EngineKind::Columnar)
    }

    /// The two file-backed kinds: the only ones that accept sync frames,
    /// bulk writes and buffer gap-filling.
    pub fn is_file_backed(self) -> bool {
        matches!(self, EngineKind::FixedInterval | EngineKind::VariableInterval)
    }

    pub fn is_relational(self) -> bool {
        matches!(self, EngineKind::RelationalTable | EngineKind::MemoryTable)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Padding applied by fixed-interval engines when a post leaves a gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingMode {
    /// Linear interpolation between the previous and the new value.
    Join,
}

impl PaddingMode {
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "join" => Some(PaddingMode::Join),
            _ => None,
        }
    }
}

/// A feed metadata record as held by the store and mirrored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    pub id: FeedId,
    pub userid: UserId,
    pub name: String,
    pub tag: String,
    pub public: bool,
    pub size: u64,
    /// Raw engine id; may name a kind the registry rejects.
    pub engine: u32,
    pub unit: String,
    #[serde(rename = "processList")]
    pub process_list: String,
    pub time: Option<i64>,
    pub value: Option<f64>,
}

impl FeedRecord {
    pub fn kind(&self) -> Option<EngineKind> {
        EngineKind::from_id(self.engine)
    }

    pub fn apply(&mut self, field: &FeedField) {
        match field {
            FeedField::Name(name) => self.name = name.clone(),
            FeedField::Tag(tag) => self.tag = tag.clone(),
            FeedField::Unit(unit) => self.unit = unit.clone(),
            FeedField::Public(public) => self.public = *public,
            FeedField::Size(size) => self.size = *size,
            FeedField::ProcessList(list) => self.process_list = list.clone(),
            FeedField::LastValue { time, value } => {
                self.time = Some(*time);
                self.value = *value;
            }
        }
    }
}

/// A single mutable field of a feed record. Updates are expressed per field
/// so concurrent writers touching different fields do not clobber each other.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedField {
    Name(String),
    Tag(String),
    Unit(String),
    Public(bool),
    Size(u64),
    ProcessList(String),
    LastValue { time: i64, value: Option<f64> },
}

/// Fields required to insert a new feed.
#[derive(Debug, Clone)]
pub struct NewFeed {
    pub userid: UserId,
    pub tag: String,
    pub name: String,
    pub engine: EngineKind,
    pub unit: String,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == ':' || c.is_whitespace()
}

/// True when `input` only contains letters, digits, underscore, whitespace,
/// hyphen or colon (unicode aware).
pub fn is_valid_name(input: &str) -> bool {
    input.chars().all(is_name_char)
}

/// ASCII-only variant used for name lookups.
pub fn sanitize_ascii_name(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || *c == ':' || c.is_ascii_whitespace())
        .collect()
}

/// Escapes the characters that are significant in HTML.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Checks a unit: no HTML-significant characters or surrounding whitespace,
/// at most [`MAX_UNIT_LEN`] bytes.
pub fn validate_unit(unit: &str) -> Result<(), &'static str> {
    if html_escape(unit.trim()) != unit {
        return Err("invalid characters in feed unit");
    }
    if unit.len() > MAX_UNIT_LEN {
        return Err("feed unit too long");
    }
    Ok(())
}
