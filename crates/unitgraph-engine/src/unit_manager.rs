// ABOUTME: Owns every compilation unit, the per-file index and both directions of dependency edges.
// ABOUTME: Provides the reverse-reachability closure used to find recompilation candidates.
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use tracing::debug;
use unitgraph_core::{CompilationUnit, Result, UnitGraphError, UnitState, UnitType};

const UNITS_MAGIC: &str = "unitgraph-units";
const UNITS_FORMAT_VERSION: u32 = 1;

/// Exclusive owner of all [`CompilationUnit`] instances.
///
/// Maintains the edge-symmetry invariant: `x` is in `y.dependencies`
/// exactly when `y` is in `x.dependents`. Removal scrubs both directions.
/// Per-file queries sort by `start_line`, so repeated calls on the same
/// state return the same list.
#[derive(Debug, Default)]
pub struct UnitManager {
    units: HashMap<String, CompilationUnit>,
    /// file path → unit ids in insertion order.
    file_units: HashMap<String, Vec<String>>,
}

impl UnitManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a unit and index it under its file.
    pub fn add_unit(&mut self, unit: CompilationUnit) {
        let ids = self.file_units.entry(unit.file_path.clone()).or_default();
        if !ids.iter().any(|id| *id == unit.id) {
            ids.push(unit.id.clone());
        }
        self.units.insert(unit.id.clone(), unit);
    }

    /// Replace an existing unit in place; unknown ids are ignored.
    pub fn update_unit(&mut self, id: &str, unit: CompilationUnit) {
        if self.units.contains_key(id) {
            self.units.insert(id.to_owned(), unit);
        }
    }

    /// Remove a unit and scrub its id from both edge directions of every
    /// neighbor.
    pub fn remove_unit(&mut self, id: &str) -> bool {
        let Some(unit) = self.units.remove(id) else {
            return false;
        };
        if let Some(ids) = self.file_units.get_mut(&unit.file_path) {
            ids.retain(|uid| uid != id);
            if ids.is_empty() {
                self.file_units.remove(&unit.file_path);
            }
        }
        for dep_id in &unit.dependencies {
            if let Some(dep) = self.units.get_mut(dep_id) {
                dep.dependents.retain(|d| d != id);
            }
        }
        for dependent_id in &unit.dependents {
            if let Some(dependent) = self.units.get_mut(dependent_id) {
                dependent.dependencies.retain(|d| d != id);
            }
        }
        true
    }

    pub fn get_unit(&self, id: &str) -> Option<&CompilationUnit> {
        self.units.get(id)
    }

    pub fn get_unit_mut(&mut self, id: &str) -> Option<&mut CompilationUnit> {
        self.units.get_mut(id)
    }

    /// Units of `file_path` sorted by `start_line`.
    pub fn units_by_file(&self, file_path: &str) -> Vec<&CompilationUnit> {
        let mut units: Vec<&CompilationUnit> = self
            .file_units
            .get(file_path)
            .map(|ids| ids.iter().filter_map(|id| self.units.get(id)).collect())
            .unwrap_or_default();
        units.sort_by_key(|u| u.start_line);
        units
    }

    /// Ids of `file_path`'s units, in `start_line` order.
    pub fn unit_ids_by_file(&self, file_path: &str) -> Vec<String> {
        self.units_by_file(file_path)
            .into_iter()
            .map(|u| u.id.clone())
            .collect()
    }

    /// Units whose `[start_line, end_line]` overlaps `[start, end]`.
    pub fn units_in_range(&self, file_path: &str, start: u32, end: u32) -> Vec<&CompilationUnit> {
        self.units_by_file(file_path)
            .into_iter()
            .filter(|u| u.start_line <= end && u.end_line >= start)
            .collect()
    }

    /// Record `from_id` → depends on → `to_id`. Set semantics on both
    /// sides; returns false when either unit is unknown.
    pub fn add_dependency(&mut self, from_id: &str, to_id: &str) -> bool {
        if !self.units.contains_key(from_id) || !self.units.contains_key(to_id) {
            return false;
        }
        if let Some(from) = self.units.get_mut(from_id) {
            if !from.dependencies.iter().any(|d| d == to_id) {
                from.dependencies.push(to_id.to_owned());
            }
        }
        if let Some(to) = self.units.get_mut(to_id) {
            if !to.dependents.iter().any(|d| d == from_id) {
                to.dependents.push(from_id.to_owned());
            }
        }
        true
    }

    /// Remove the `from_id` → `to_id` edge from both sides.
    pub fn remove_dependency(&mut self, from_id: &str, to_id: &str) {
        if let Some(from) = self.units.get_mut(from_id) {
            from.dependencies.retain(|d| d != to_id);
        }
        if let Some(to) = self.units.get_mut(to_id) {
            to.dependents.retain(|d| d != from_id);
        }
    }

    pub fn get_dependencies(&self, id: &str) -> Vec<String> {
        self.units
            .get(id)
            .map(|u| u.dependencies.clone())
            .unwrap_or_default()
    }

    pub fn get_dependents(&self, id: &str) -> Vec<String> {
        self.units
            .get(id)
            .map(|u| u.dependents.clone())
            .unwrap_or_default()
    }

    /// Every unit reachable from `changed_id` over reverse edges, the
    /// seed excluded. A visited set makes this terminate on cycles; the
    /// result is sorted so callers see a stable order.
    pub fn get_affected_units(&self, changed_id: &str) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack = vec![changed_id.to_owned()];
        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(unit) = self.units.get(&id) {
                for dependent in &unit.dependents {
                    if !visited.contains(dependent) {
                        stack.push(dependent.clone());
                    }
                }
            }
        }
        visited.remove(changed_id);
        let mut affected: Vec<String> = visited.into_iter().collect();
        affected.sort();
        affected
    }

    pub fn for_each_mut(&mut self, mut callback: impl FnMut(&mut CompilationUnit)) {
        for unit in self.units.values_mut() {
            callback(unit);
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.file_units.len()
    }

    pub fn clear(&mut self) {
        self.units.clear();
        self.file_units.clear();
    }

    /// Line-oriented, tab-delimited dump of the graph: a versioned
    /// header, the unit count, then one record per unit with its forward
    /// dependency list. Reverse edges are derived, not stored.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{UNITS_MAGIC} {UNITS_FORMAT_VERSION}");
        let _ = writeln!(out, "{}", self.units.len());
        let mut ids: Vec<&String> = self.units.keys().collect();
        ids.sort();
        for id in ids {
            let u = &self.units[id];
            let _ = write!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                u.id,
                u.file_path,
                u.start_line,
                u.end_line,
                u.unit_type.as_u8(),
                u.name,
                u.content_hash,
                u.dependencies.len()
            );
            for dep in &u.dependencies {
                let _ = write!(out, "\t{dep}");
            }
            out.push('\n');
        }
        out
    }

    /// Rebuild the graph from [`serialize`](Self::serialize) output: all
    /// units are added first, then `dependents` lists are reconstructed
    /// by scanning each unit's `dependencies`.
    pub fn deserialize(&mut self, data: &str) -> Result<()> {
        self.clear();
        let mut lines = data.lines();
        let header = lines
            .next()
            .ok_or_else(|| UnitGraphError::Parse("empty unit dump".into()))?;
        let expected = format!("{UNITS_MAGIC} {UNITS_FORMAT_VERSION}");
        if header != expected {
            return Err(UnitGraphError::Parse(format!(
                "bad unit dump header: {header:?}"
            )));
        }
        let count: usize = lines
            .next()
            .and_then(|l| l.parse().ok())
            .ok_or_else(|| UnitGraphError::Parse("bad unit count".into()))?;
        for _ in 0..count {
            let line = lines
                .next()
                .ok_or_else(|| UnitGraphError::Parse("truncated unit dump".into()))?;
            self.add_unit(parse_unit_record(line)?);
        }
        // second pass: rebuild reverse edges from the forward lists
        let edges: Vec<(String, String)> = self
            .units
            .values()
            .flat_map(|u| {
                u.dependencies
                    .iter()
                    .map(|dep| (dep.clone(), u.id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (dep_id, dependent_id) in edges {
            if let Some(dep) = self.units.get_mut(&dep_id) {
                if !dep.dependents.iter().any(|d| *d == dependent_id) {
                    dep.dependents.push(dependent_id);
                }
            }
        }
        debug!(units = self.units.len(), "unit graph deserialized");
        Ok(())
    }
}

fn parse_unit_record(line: &str) -> Result<CompilationUnit> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 8 {
        return Err(UnitGraphError::Parse(format!(
            "unit record has {} fields, expected at least 8",
            fields.len()
        )));
    }
    let parse_u32 = |s: &str, what: &str| -> Result<u32> {
        s.parse()
            .map_err(|_| UnitGraphError::Parse(format!("bad {what}: {s:?}")))
    };
    let start_line = parse_u32(fields[2], "start line")?;
    let end_line = parse_u32(fields[3], "end line")?;
    let type_tag = parse_u32(fields[4], "unit type")?;
    let unit_type = u8::try_from(type_tag)
        .ok()
        .and_then(UnitType::from_u8)
        .ok_or_else(|| UnitGraphError::Parse(format!("unknown unit type tag: {type_tag}")))?;
    let dep_count: usize = fields[7]
        .parse()
        .map_err(|_| UnitGraphError::Parse(format!("bad dependency count: {:?}", fields[7])))?;
    if fields.len() < 8 + dep_count {
        return Err(UnitGraphError::Parse(format!(
            "unit record declares {dep_count} dependencies but carries {}",
            fields.len() - 8
        )));
    }
    let dependencies = fields[8..8 + dep_count]
        .iter()
        .filter(|d| !d.is_empty())
        .map(|d| (*d).to_owned())
        .collect();
    Ok(CompilationUnit {
        id: fields[0].to_owned(),
        file_path: fields[1].to_owned(),
        start_line,
        end_line,
        unit_type,
        name: fields[5].to_owned(),
        content_hash: fields[6].to_owned(),
        dependencies,
        dependents: Vec::new(),
        state: UnitState::Unknown,
        cached_output: String::new(),
        cache_timestamp: 0,
        cache_valid: false,
    })
}
