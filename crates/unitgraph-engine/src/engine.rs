// ABOUTME: Orchestrates snapshots, invalidation propagation, boundary expansion and output reassembly.
// ABOUTME: Drives the external compiler through the UnitCompiler hook and reuses cached unit outputs.
use crate::change_detector::ChangeDetector;
use crate::unit_manager::UnitManager;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use unitgraph_cache::{CacheStats, CompilationCache, HistoryEvent};
use unitgraph_core::{
    current_timestamp_ms, ChangeRecord, CompilationUnit, Result, Snapshot, UnitCompiler,
    UnitGraphError, UnitState,
};

const UNIT_STATE_FILE_NAME: &str = "unit_state.dat";

/// Predicted units warmed up per cache hit.
const WARMUP_FANOUT: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_units: usize,
    pub pending_units: usize,
    pub files: usize,
    pub cache: CacheStats,
}

/// Core of the incremental recompiler.
///
/// The caller registers a file's compilation units (and asserts
/// dependency edges through [`units_mut`](Self::units_mut)), then feeds
/// every new version of the file to [`update_source`](Self::update_source).
/// The engine diffs the version against the previous snapshot, walks the
/// reverse-dependency closure, expands to structural boundaries, and
/// exposes the minimal recompile set via
/// [`get_units_to_compile`](Self::get_units_to_compile).
///
/// Not internally synchronized; wrap it in a mutex when sharing across
/// threads.
pub struct IncrementalEngine {
    units: UnitManager,
    detector: ChangeDetector,
    cache: CompilationCache,
    cache_dir: PathBuf,
    /// file path → latest installed snapshot.
    snapshots: HashMap<String, Snapshot>,
    /// Kept sorted; acts as the pending recompile set.
    units_to_compile: Vec<String>,
    compiler: Option<Box<dyn UnitCompiler>>,
}

impl IncrementalEngine {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            units: UnitManager::new(),
            detector: ChangeDetector::new(),
            cache: CompilationCache::new(&cache_dir),
            cache_dir,
            snapshots: HashMap::new(),
            units_to_compile: Vec::new(),
            compiler: None,
        }
    }

    /// Install the external compiler driven by
    /// [`compile_unit`](Self::compile_unit).
    pub fn set_compiler<C>(&mut self, compiler: C)
    where
        C: UnitCompiler + 'static,
    {
        self.compiler = Some(Box::new(compiler));
    }

    pub fn units(&self) -> &UnitManager {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut UnitManager {
        &mut self.units
    }

    pub fn cache(&self) -> &CompilationCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut CompilationCache {
        &mut self.cache
    }

    /// Replace the unit set for `file_path`. Dependency edges are not
    /// inferred; the caller re-asserts them through
    /// [`units_mut`](Self::units_mut).
    pub fn register_units(&mut self, file_path: &str, units: Vec<CompilationUnit>) {
        for old_id in self.units.unit_ids_by_file(file_path) {
            self.units.remove_unit(&old_id);
        }
        let count = units.len();
        for unit in units {
            self.units.add_unit(unit);
        }
        debug!(file = file_path, units = count, "units registered");
    }

    /// Diff `new_content` against the previous snapshot of `file_path`,
    /// invalidate everything the edit touches, and return one change
    /// record per affected unit. The first call for a file marks every
    /// registered unit `Added`.
    pub fn update_source(&mut self, file_path: &str, new_content: &str) -> Vec<ChangeRecord> {
        let mut new_snap = self.detector.create_snapshot(file_path, new_content);
        let mut changes = Vec::new();

        if self.snapshots.contains_key(file_path) {
            let changed_lines = {
                let old_snap = &self.snapshots[file_path];
                self.detector.get_changed_lines(old_snap, &new_snap)
            };

            let modified = self.collect_modified(file_path, &changed_lines);
            for id in &modified {
                if let Some(unit) = self.units.get_unit_mut(id) {
                    unit.state = UnitState::Modified;
                    unit.cache_valid = false;
                }
            }

            let mut affected = modified.clone();
            self.propagate_dependents(&modified, &mut affected);
            self.expand_to_boundaries(file_path, &modified, &mut affected);

            for id in &affected {
                let Some(unit) = self.units.get_unit(id) else {
                    continue;
                };
                let (old_start, old_end) = self
                    .snapshots
                    .get(file_path)
                    .and_then(|snap| snap.units.get(id))
                    .map(|u| (u.start_line, u.end_line))
                    .unwrap_or((0, 0));
                changes.push(ChangeRecord {
                    unit_id: id.clone(),
                    change_type: unit.state,
                    old_start_line: old_start,
                    old_end_line: old_end,
                    new_start_line: unit.start_line,
                    new_end_line: unit.end_line,
                    reason: match unit.state {
                        UnitState::Modified => "content changed".into(),
                        UnitState::Affected => "dependency changed".into(),
                        other => format!("state {other:?}"),
                    },
                });
            }
            self.units_to_compile = affected.into_iter().collect();
        } else {
            // first version of this file: everything compiles
            for id in self.units.unit_ids_by_file(file_path) {
                if let Some(unit) = self.units.get_unit_mut(&id) {
                    unit.state = UnitState::Added;
                    changes.push(ChangeRecord {
                        unit_id: id.clone(),
                        change_type: UnitState::Added,
                        old_start_line: 0,
                        old_end_line: 0,
                        new_start_line: unit.start_line,
                        new_end_line: unit.end_line,
                        reason: "first analysis".into(),
                    });
                }
                self.units_to_compile.push(id);
            }
            self.units_to_compile.sort();
            self.units_to_compile.dedup();
        }

        for unit in self.units.units_by_file(file_path) {
            new_snap.units.insert(unit.id.clone(), unit.clone());
        }
        self.snapshots.insert(file_path.to_owned(), new_snap);

        info!(
            file = file_path,
            changed_units = changes.len(),
            pending = self.units_to_compile.len(),
            "source updated"
        );
        changes
    }

    /// Units directly hit by a changed line. When several nested units
    /// cover the same line only the innermost is treated as modified;
    /// its containers surface later as `Affected` through boundary
    /// expansion.
    fn collect_modified(&self, file_path: &str, changed_lines: &[u32]) -> BTreeSet<String> {
        let mut modified = BTreeSet::new();
        for &line in changed_lines {
            let hit = self.units.units_in_range(file_path, line, line);
            for unit in &hit {
                let has_inner = hit.iter().any(|other| {
                    other.id != unit.id
                        && unit.encloses(other)
                        && (unit.start_line, unit.end_line) != (other.start_line, other.end_line)
                });
                if !has_inner {
                    modified.insert(unit.id.clone());
                }
            }
        }
        modified
    }

    /// Add the reverse-dependency closure of every modified unit and
    /// mark the newcomers `Affected`. A directly modified unit keeps its
    /// `Modified` state.
    fn propagate_dependents(&mut self, modified: &BTreeSet<String>, affected: &mut BTreeSet<String>) {
        let closure: BTreeSet<String> = modified
            .iter()
            .flat_map(|id| self.units.get_affected_units(id))
            .collect();
        for id in closure {
            if modified.contains(&id) {
                continue;
            }
            if let Some(unit) = self.units.get_unit_mut(&id) {
                unit.state = UnitState::Affected;
                unit.cache_valid = false;
            }
            affected.insert(id);
        }
    }

    /// Pull enclosing `Function`/`Class` containers of every affected
    /// unit into the set. Structural units themselves are not expanded
    /// further.
    fn expand_to_boundaries(
        &mut self,
        file_path: &str,
        modified: &BTreeSet<String>,
        affected: &mut BTreeSet<String>,
    ) {
        let mut containers: Vec<String> = Vec::new();
        for id in affected.iter() {
            let Some(unit) = self.units.get_unit(id) else {
                continue;
            };
            if unit.unit_type.is_structural() {
                continue;
            }
            for candidate in self.units.units_by_file(file_path) {
                if candidate.id != *id
                    && candidate.unit_type.is_structural()
                    && candidate.encloses(unit)
                {
                    containers.push(candidate.id.clone());
                }
            }
        }
        for id in containers {
            if !modified.contains(&id) {
                if let Some(unit) = self.units.get_unit_mut(&id) {
                    unit.state = UnitState::Affected;
                    unit.cache_valid = false;
                }
            }
            affected.insert(id);
        }
    }

    /// Ids still waiting for [`mark_compiled`](Self::mark_compiled).
    pub fn get_units_to_compile(&self) -> Vec<String> {
        self.units_to_compile.clone()
    }

    pub fn mark_compiled(&mut self, unit_id: &str, output: &str) {
        self.mark_compiled_timed(unit_id, output, 0);
    }

    /// Record a finished compile: the unit's local cache becomes valid,
    /// the output lands in the compilation cache keyed by the unit's
    /// current content hash, and the id leaves the pending set.
    pub fn mark_compiled_timed(&mut self, unit_id: &str, output: &str, compile_time_ms: i64) {
        if let Some(unit) = self.units.get_unit_mut(unit_id) {
            unit.cached_output = output.to_owned();
            unit.cache_timestamp = current_timestamp_ms();
            unit.cache_valid = true;
            unit.state = UnitState::Unchanged;
            let content_hash = unit.content_hash.clone();
            self.cache
                .put_timed(unit_id, output, &content_hash, compile_time_ms);
        }
        self.units_to_compile.retain(|id| id != unit_id);
    }

    /// Compile one unit, treating a valid cache entry as a zero-cost
    /// compile. A cache hit also warms up units predicted to be needed
    /// next. Requires a registered compiler for the miss path.
    pub fn compile_unit(&mut self, unit_id: &str) -> Result<String> {
        let Some(unit) = self.units.get_unit(unit_id) else {
            return Err(UnitGraphError::UnitNotFound(unit_id.to_owned()));
        };
        let content_hash = unit.content_hash.clone();
        let locally_valid = unit.cache_valid;

        if locally_valid || self.cache.is_valid(unit_id, &content_hash) {
            if let Some(output) = self.cache.get(unit_id) {
                if let Some(unit) = self.units.get_unit_mut(unit_id) {
                    unit.cached_output = output.clone();
                    unit.cache_valid = true;
                }
                self.units_to_compile.retain(|id| id != unit_id);
                self.predictive_warmup(unit_id);
                debug!(unit = unit_id, "cache hit served as compilation");
                return Ok(output);
            }
        }

        let output = {
            let compiler = self.compiler.as_deref().ok_or_else(|| {
                UnitGraphError::Configuration("no unit compiler registered".into())
            })?;
            let unit = self
                .units
                .get_unit(unit_id)
                .ok_or_else(|| UnitGraphError::UnitNotFound(unit_id.to_owned()))?;
            let started = Instant::now();
            let output = compiler.compile(unit)?;
            let elapsed_ms = started.elapsed().as_millis() as i64;
            self.mark_compiled_timed(unit_id, &output, elapsed_ms);
            output
        };
        Ok(output)
    }

    /// Compile everything in the pending set; returns unit id → output.
    pub fn compile_all_pending(&mut self) -> Result<HashMap<String, String>> {
        let pending = self.units_to_compile.clone();
        let mut results = HashMap::with_capacity(pending.len());
        for unit_id in pending {
            let output = self.compile_unit(&unit_id)?;
            results.insert(unit_id, output);
        }
        Ok(results)
    }

    /// Queue up to [`WARMUP_FANOUT`] units that historically follow
    /// `unit_id` and are registered but not yet cached.
    fn predictive_warmup(&mut self, unit_id: &str) {
        let predicted: Vec<String> = self
            .cache
            .predictions(unit_id)
            .iter()
            .take(WARMUP_FANOUT)
            .cloned()
            .collect();
        let mut queued = false;
        for candidate in predicted {
            if self.units.get_unit(&candidate).is_some()
                && !self.cache.has(&candidate)
                && !self.units_to_compile.iter().any(|id| *id == candidate)
            {
                debug!(unit = %candidate, "queued for predictive warmup");
                self.units_to_compile.push(candidate);
                queued = true;
            }
        }
        if queued {
            self.units_to_compile.sort();
        }
    }

    /// Reassemble `file_path`'s output by concatenating per-unit
    /// fragments in source order with a single `\n` between non-empty
    /// fragments. A unit's own valid output wins; otherwise a
    /// hash-validated cache entry is used; otherwise the unit
    /// contributes nothing.
    pub fn get_combined_output(&mut self, file_path: &str) -> String {
        let candidates: Vec<(String, String, bool, String)> = self
            .units
            .units_by_file(file_path)
            .into_iter()
            .map(|u| {
                (
                    u.id.clone(),
                    u.content_hash.clone(),
                    u.cache_valid,
                    u.cached_output.clone(),
                )
            })
            .collect();

        let mut fragments: Vec<String> = Vec::with_capacity(candidates.len());
        for (id, content_hash, locally_valid, local_output) in candidates {
            let output = if locally_valid {
                Some(local_output)
            } else if self.cache.is_valid(&id, &content_hash) {
                self.cache.get(&id)
            } else {
                None
            };
            match output {
                Some(o) if !o.is_empty() => fragments.push(o),
                _ => {}
            }
        }
        fragments.join("\n")
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            total_units: self.units.len(),
            pending_units: self.units_to_compile.len(),
            files: self.units.file_count(),
            cache: self.cache.stats(),
        }
    }

    pub fn compile_history(&self, limit: usize) -> &[HistoryEvent] {
        self.cache.compile_history(limit)
    }

    pub fn hot_units(&self, limit: usize) -> Vec<(String, u64)> {
        self.cache.hot_units(limit)
    }

    pub fn predictions(&self, unit_id: &str) -> &[String] {
        self.cache.predictions(unit_id)
    }

    /// Persist the compilation cache and the unit graph under the cache
    /// directory. Best-effort: failures are logged and swallowed.
    pub fn save_state(&self) {
        self.cache.save();
        let path = self.unit_state_path();
        if let Err(e) = fs::write(&path, self.units.serialize()) {
            warn!(file = %path.display(), error = %e, "failed to write unit state");
        }
    }

    /// Reload previously saved state. Missing files are fine; corrupt
    /// unit dumps are logged and leave the current units untouched.
    pub fn load_state(&mut self) {
        self.cache.load();
        let path = self.unit_state_path();
        if !path.exists() {
            return;
        }
        match fs::read_to_string(&path) {
            Ok(data) => {
                if let Err(e) = self.units.deserialize(&data) {
                    warn!(file = %path.display(), error = %e, "ignoring unreadable unit state");
                }
            }
            Err(e) => warn!(file = %path.display(), error = %e, "failed to read unit state"),
        }
    }

    /// Drop all units, snapshots and pending work and invalidate the
    /// cache.
    pub fn clear(&mut self) {
        self.units.clear();
        self.snapshots.clear();
        self.units_to_compile.clear();
        self.cache.invalidate_all();
    }

    fn unit_state_path(&self) -> PathBuf {
        self.cache_dir.join(UNIT_STATE_FILE_NAME)
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}
