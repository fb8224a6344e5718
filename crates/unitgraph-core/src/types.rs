use crate::hash::{content_hash, current_timestamp_ms, generate_unit_id, line_hash, split_lines};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Granularity of a compilation unit.
///
/// `Function` and `Class` are structural: the engine treats them as
/// indivisible recompilation boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitType {
    Line,
    Statement,
    Function,
    Class,
    Module,
    Import,
    Decorator,
    Block,
}

impl UnitType {
    /// True for unit types that act as recompilation boundaries.
    pub fn is_structural(self) -> bool {
        matches!(self, UnitType::Function | UnitType::Class)
    }

    /// Stable integer tag used by the line-oriented serialization format.
    pub fn as_u8(self) -> u8 {
        match self {
            UnitType::Line => 0,
            UnitType::Statement => 1,
            UnitType::Function => 2,
            UnitType::Class => 3,
            UnitType::Module => 4,
            UnitType::Import => 5,
            UnitType::Decorator => 6,
            UnitType::Block => 7,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(UnitType::Line),
            1 => Some(UnitType::Statement),
            2 => Some(UnitType::Function),
            3 => Some(UnitType::Class),
            4 => Some(UnitType::Module),
            5 => Some(UnitType::Import),
            6 => Some(UnitType::Decorator),
            7 => Some(UnitType::Block),
            _ => None,
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitType::Line => "line",
            UnitType::Statement => "statement",
            UnitType::Function => "function",
            UnitType::Class => "class",
            UnitType::Module => "module",
            UnitType::Import => "import",
            UnitType::Decorator => "decorator",
            UnitType::Block => "block",
        };
        write!(f, "{}", s)
    }
}

/// Change-detection state of a compilation unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitState {
    #[default]
    Unknown,
    Unchanged,
    Modified,
    Added,
    Deleted,
    /// Reachable from a modified unit through reverse dependency edges,
    /// or an enclosing structural container of a touched unit.
    Affected,
}

/// A contiguous, addressable fragment of a source file; the atomic
/// recompile granularity.
///
/// Dependency edges are kept symmetric: `x` appears in `y.dependencies`
/// exactly when `y` appears in `x.dependents`. `UnitManager` maintains
/// that invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationUnit {
    /// Globally unique: `file_path:start_line:end_line:hash-prefix`.
    pub id: String,
    pub file_path: String,
    /// 1-based, inclusive.
    pub start_line: u32,
    /// 1-based, inclusive.
    pub end_line: u32,
    pub unit_type: UnitType,
    /// Symbolic name (function/class name); empty when anonymous.
    pub name: String,
    /// 16-hex-char FNV-1a hash of the unit's raw text.
    pub content_hash: String,
    /// Ids of units this unit depends on (forward edges).
    pub dependencies: Vec<String>,
    /// Ids of units that depend on this unit (reverse edges).
    pub dependents: Vec<String>,
    pub state: UnitState,
    /// Last successful compile output; empty until first compile.
    pub cached_output: String,
    /// Milliseconds since epoch; 0 when the cached output is invalid.
    pub cache_timestamp: i64,
    /// True only while `cached_output` corresponds to `content_hash`.
    pub cache_valid: bool,
}

impl CompilationUnit {
    /// Build a unit for `raw_text`, deriving `content_hash` and `id`.
    pub fn from_source(
        file_path: impl Into<String>,
        start_line: u32,
        end_line: u32,
        unit_type: UnitType,
        name: impl Into<String>,
        raw_text: &str,
    ) -> Self {
        let file_path = file_path.into();
        let content_hash = content_hash(raw_text);
        let id = generate_unit_id(&file_path, start_line, end_line, &content_hash);
        Self {
            id,
            file_path,
            start_line,
            end_line,
            unit_type,
            name: name.into(),
            content_hash,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            state: UnitState::Unknown,
            cached_output: String::new(),
            cache_timestamp: 0,
            cache_valid: false,
        }
    }

    /// True when `[start_line, end_line]` contains the 1-based `line`.
    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    /// True when this unit's range fully covers `other`'s range.
    pub fn encloses(&self, other: &CompilationUnit) -> bool {
        self.start_line <= other.start_line && self.end_line >= other.end_line
    }
}

/// Immutable record of a file's content at a point in time, used for
/// change detection. `units` holds copies of the units as they were when
/// the snapshot was taken, not references into the unit manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub file_path: String,
    /// Hash of the full file text.
    pub content_hash: String,
    /// Whitespace-insensitive per-line hashes, in file order.
    pub line_hashes: Vec<String>,
    pub units: HashMap<String, CompilationUnit>,
    /// Milliseconds since epoch.
    pub timestamp: i64,
}

impl Snapshot {
    /// Snapshot `content` as the current version of `file_path`.
    pub fn of_content(file_path: impl Into<String>, content: &str) -> Self {
        Self {
            file_path: file_path.into(),
            content_hash: content_hash(content),
            line_hashes: split_lines(content).iter().map(|l| line_hash(l)).collect(),
            units: HashMap::new(),
            timestamp: current_timestamp_ms(),
        }
    }
}

/// One detected change, attributed to a unit. Line numbers are 1-based;
/// 0 marks a side that does not apply (e.g. no old range for `Added`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub unit_id: String,
    pub change_type: UnitState,
    pub old_start_line: u32,
    pub old_end_line: u32,
    pub new_start_line: u32,
    pub new_end_line: u32,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_type_tags_round_trip() {
        for tag in 0..8u8 {
            let ty = UnitType::from_u8(tag).unwrap();
            assert_eq!(ty.as_u8(), tag);
        }
        assert!(UnitType::from_u8(8).is_none());
    }

    #[test]
    fn only_functions_and_classes_are_structural() {
        assert!(UnitType::Function.is_structural());
        assert!(UnitType::Class.is_structural());
        assert!(!UnitType::Statement.is_structural());
        assert!(!UnitType::Module.is_structural());
    }

    #[test]
    fn from_source_derives_id_and_hash() {
        let unit =
            CompilationUnit::from_source("lib.py", 4, 7, UnitType::Function, "load", "def load():");
        assert_eq!(unit.content_hash, content_hash("def load():"));
        assert!(unit.id.starts_with("lib.py:4:7:"));
        assert_eq!(unit.state, UnitState::Unknown);
        assert!(!unit.cache_valid);
    }

    #[test]
    fn range_helpers() {
        let inner = CompilationUnit::from_source("f", 15, 16, UnitType::Statement, "", "x = 1");
        let outer = CompilationUnit::from_source("f", 10, 30, UnitType::Function, "f", "def f():");
        assert!(outer.encloses(&inner));
        assert!(!inner.encloses(&outer));
        assert!(inner.contains_line(15));
        assert!(!inner.contains_line(17));
    }

    #[test]
    fn snapshot_hashes_lines_in_order() {
        let snap = Snapshot::of_content("mod.py", "a\n\nb");
        assert_eq!(snap.line_hashes.len(), 3);
        assert_eq!(snap.line_hashes[1], crate::hash::EMPTY_LINE_HASH);
        assert_eq!(snap.content_hash, content_hash("a\n\nb"));
        assert!(snap.units.is_empty());
    }
}
