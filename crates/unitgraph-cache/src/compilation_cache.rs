// ABOUTME: Persistent per-unit output cache validated by content hash, with hit/miss accounting.
// ABOUTME: Also records compile history and learns access patterns for predictive warmup.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use unitgraph_core::{current_timestamp_ms, Result, UnitGraphError};

pub const CACHE_FILE_NAME: &str = "incremental_cache.dat";
pub const HISTORY_FILE_NAME: &str = "compile_history.json";
pub const PATTERNS_FILE_NAME: &str = "prediction_patterns.json";

const CACHE_MAGIC: &str = "unitgraph-cache";
const CACHE_FORMAT_VERSION: u32 = 1;

/// Compile history retained in memory and on disk.
const HISTORY_LIMIT: usize = 10_000;
/// Access sequence is halved once it grows past this bound.
const ACCESS_SEQUENCE_LIMIT: usize = 1_000;
/// Successors remembered per predecessor unit.
const PREDICTIONS_PER_KEY: usize = 10;

/// One cached compile output, keyed by unit id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub output: String,
    pub content_hash: String,
    /// Milliseconds since epoch at insertion.
    pub timestamp: i64,
    pub last_access: i64,
    pub access_count: u64,
    pub compile_time_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Compile,
    Invalidate,
}

/// Append-only record of cache activity, bounded to `HISTORY_LIMIT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub unit_id: String,
    pub action: HistoryAction,
    pub content_hash: String,
    pub timestamp: i64,
    pub compile_time_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub total_output_bytes: u64,
    pub total_compile_time_ms: i64,
    pub history_events: usize,
    pub prediction_patterns: usize,
}

/// Content-hash-validated cache of per-unit compile outputs.
///
/// Not internally synchronized; callers serialize access. Persists to a
/// flat file under `cache_dir` plus two JSON side files for history and
/// learned access patterns. All persistence I/O is best-effort: a missing
/// or unreadable file loads as empty, an unwritable target is skipped.
pub struct CompilationCache {
    cache_dir: PathBuf,
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    history: Vec<HistoryEvent>,
    access_sequence: Vec<String>,
    predictions: HashMap<String, Vec<String>>,
}

impl CompilationCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!(dir = %cache_dir.display(), error = %e, "failed to create cache directory");
        }
        let mut cache = Self {
            cache_dir,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            history: Vec::new(),
            access_sequence: Vec::new(),
            predictions: HashMap::new(),
        };
        cache.load();
        cache
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn has(&self, unit_id: &str) -> bool {
        self.entries.contains_key(unit_id)
    }

    /// Fetch a cached output. A hit bumps the entry's access bookkeeping
    /// and feeds the access-pattern model; a miss only counts.
    pub fn get(&mut self, unit_id: &str) -> Option<String> {
        if !self.entries.contains_key(unit_id) {
            self.misses += 1;
            return None;
        }
        self.hits += 1;
        self.record_access(unit_id);
        let now = current_timestamp_ms();
        let entry = self.entries.get_mut(unit_id)?;
        entry.last_access = now;
        entry.access_count += 1;
        Some(entry.output.clone())
    }

    pub fn put(&mut self, unit_id: &str, output: &str, content_hash: &str) {
        self.put_timed(unit_id, output, content_hash, 0);
    }

    /// Store a compile result along with how long the compile took.
    pub fn put_timed(
        &mut self,
        unit_id: &str,
        output: &str,
        content_hash: &str,
        compile_time_ms: i64,
    ) {
        let timestamp = current_timestamp_ms();
        self.entries.insert(
            unit_id.to_owned(),
            CacheEntry {
                output: output.to_owned(),
                content_hash: content_hash.to_owned(),
                timestamp,
                last_access: timestamp,
                access_count: 1,
                compile_time_ms,
            },
        );
        self.push_history(HistoryEvent {
            unit_id: unit_id.to_owned(),
            action: HistoryAction::Compile,
            content_hash: content_hash.to_owned(),
            timestamp,
            compile_time_ms,
        });
        self.record_access(unit_id);
    }

    pub fn invalidate(&mut self, unit_id: &str) {
        self.entries.remove(unit_id);
        self.push_history(HistoryEvent {
            unit_id: unit_id.to_owned(),
            action: HistoryAction::Invalidate,
            content_hash: String::new(),
            timestamp: current_timestamp_ms(),
            compile_time_ms: 0,
        });
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    /// True when an entry exists and was produced from `current_hash`.
    pub fn is_valid(&self, unit_id: &str, current_hash: &str) -> bool {
        self.entries
            .get(unit_id)
            .is_some_and(|entry| entry.content_hash == current_hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_count(&self) -> u64 {
        self.hits
    }

    pub fn miss_count(&self) -> u64 {
        self.misses
    }

    /// Most recent `limit` history events, oldest first.
    pub fn compile_history(&self, limit: usize) -> &[HistoryEvent] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }

    /// Unit ids by descending access count; ties break on id so repeated
    /// calls agree.
    pub fn hot_units(&self, limit: usize) -> Vec<(String, u64)> {
        let mut units: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.access_count))
            .collect();
        units.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        units.truncate(limit);
        units
    }

    /// Units observed to follow `unit_id` in past access sequences.
    pub fn predictions(&self, unit_id: &str) -> &[String] {
        self.predictions
            .get(unit_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: if total > 0 {
                self.hits as f64 / total as f64
            } else {
                0.0
            },
            total_output_bytes: self.entries.values().map(|e| e.output.len() as u64).sum(),
            total_compile_time_ms: self.entries.values().map(|e| e.compile_time_ms).sum(),
            history_events: self.history.len(),
            prediction_patterns: self.predictions.len(),
        }
    }

    /// Persist entries, history and patterns. Failures are logged and
    /// swallowed; the in-memory state is authoritative.
    pub fn save(&self) {
        if let Err(e) = self.write_entries() {
            warn!(dir = %self.cache_dir.display(), error = %e, "failed to write compilation cache");
        }
        if let Err(e) = self.write_side_files() {
            warn!(dir = %self.cache_dir.display(), error = %e, "failed to write cache side files");
        }
    }

    /// Replace in-memory state with whatever is on disk. Missing files
    /// are fine; corrupt files are logged and skipped.
    pub fn load(&mut self) {
        let cache_file = self.cache_dir.join(CACHE_FILE_NAME);
        if cache_file.exists() {
            match fs::read(&cache_file).map_err(UnitGraphError::from).and_then(|b| parse_cache_file(&b)) {
                Ok(entries) => {
                    debug!(entries = entries.len(), "loaded compilation cache");
                    self.entries = entries;
                }
                Err(e) => warn!(file = %cache_file.display(), error = %e, "ignoring unreadable cache file"),
            }
        }
        let history_file = self.cache_dir.join(HISTORY_FILE_NAME);
        if history_file.exists() {
            match fs::read_to_string(&history_file)
                .map_err(UnitGraphError::from)
                .and_then(|s| Ok(serde_json::from_str(&s)?))
            {
                Ok(history) => self.history = history,
                Err(e) => warn!(file = %history_file.display(), error = %e, "ignoring unreadable history file"),
            }
        }
        let patterns_file = self.cache_dir.join(PATTERNS_FILE_NAME);
        if patterns_file.exists() {
            match fs::read_to_string(&patterns_file)
                .map_err(UnitGraphError::from)
                .and_then(|s| Ok(serde_json::from_str(&s)?))
            {
                Ok(predictions) => self.predictions = predictions,
                Err(e) => warn!(file = %patterns_file.display(), error = %e, "ignoring unreadable patterns file"),
            }
        }
    }

    fn write_entries(&self) -> Result<()> {
        let mut out = String::new();
        out.push_str(&format!("{CACHE_MAGIC} {CACHE_FORMAT_VERSION}\n"));
        out.push_str(&format!("{}\n", self.entries.len()));
        let mut ids: Vec<&String> = self.entries.keys().collect();
        ids.sort();
        for id in ids {
            let entry = &self.entries[id];
            out.push_str(&format!(
                "{}\n{}\n{}\n{}\n",
                id,
                entry.content_hash,
                entry.timestamp,
                entry.output.len()
            ));
            out.push_str(&entry.output);
        }
        fs::write(self.cache_dir.join(CACHE_FILE_NAME), out)?;
        Ok(())
    }

    fn write_side_files(&self) -> Result<()> {
        let start = self.history.len().saturating_sub(HISTORY_LIMIT);
        let history = serde_json::to_string_pretty(&self.history[start..])?;
        fs::write(self.cache_dir.join(HISTORY_FILE_NAME), history)?;
        let patterns = serde_json::to_string_pretty(&self.predictions)?;
        fs::write(self.cache_dir.join(PATTERNS_FILE_NAME), patterns)?;
        Ok(())
    }

    fn push_history(&mut self, event: HistoryEvent) {
        self.history.push(event);
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    /// Append to the access sequence and learn predecessor → successor
    /// pairs for predictive warmup.
    fn record_access(&mut self, unit_id: &str) {
        self.access_sequence.push(unit_id.to_owned());
        if self.access_sequence.len() > ACCESS_SEQUENCE_LIMIT {
            let keep_from = self.access_sequence.len() - ACCESS_SEQUENCE_LIMIT / 2;
            self.access_sequence.drain(..keep_from);
        }
        if self.access_sequence.len() >= 2 {
            let prev = self.access_sequence[self.access_sequence.len() - 2].clone();
            if prev != unit_id {
                let successors = self.predictions.entry(prev).or_default();
                if !successors.iter().any(|s| s == unit_id) {
                    successors.push(unit_id.to_owned());
                    successors.truncate(PREDICTIONS_PER_KEY);
                }
            }
        }
    }
}

/// Parse the flat cache file: a `unitgraph-cache <version>` header, the
/// entry count, then per entry the id, content hash, timestamp and
/// output byte length on their own lines followed by the raw output
/// bytes with no separator.
fn parse_cache_file(bytes: &[u8]) -> Result<HashMap<String, CacheEntry>> {
    let mut pos = 0usize;
    let header = read_line(bytes, &mut pos)?;
    let expected = format!("{CACHE_MAGIC} {CACHE_FORMAT_VERSION}");
    if header != expected {
        return Err(UnitGraphError::Parse(format!(
            "bad cache header: {header:?}"
        )));
    }
    let count: usize = read_line(bytes, &mut pos)?
        .parse()
        .map_err(|_| UnitGraphError::Parse("bad entry count".into()))?;
    let mut entries = HashMap::with_capacity(count);
    for _ in 0..count {
        let unit_id = read_line(bytes, &mut pos)?.to_owned();
        let content_hash = read_line(bytes, &mut pos)?.to_owned();
        let timestamp: i64 = read_line(bytes, &mut pos)?
            .parse()
            .map_err(|_| UnitGraphError::Parse("bad timestamp".into()))?;
        let output_len: usize = read_line(bytes, &mut pos)?
            .parse()
            .map_err(|_| UnitGraphError::Parse("bad output length".into()))?;
        let end = pos
            .checked_add(output_len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| UnitGraphError::Parse("truncated output".into()))?;
        let output = std::str::from_utf8(&bytes[pos..end])
            .map_err(|_| UnitGraphError::Parse("output is not valid UTF-8".into()))?
            .to_owned();
        pos = end;
        entries.insert(
            unit_id.clone(),
            CacheEntry {
                output,
                content_hash,
                timestamp,
                last_access: timestamp,
                access_count: 0,
                compile_time_ms: 0,
            },
        );
    }
    Ok(entries)
}

fn read_line<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a str> {
    if *pos >= bytes.len() {
        return Err(UnitGraphError::Parse("unexpected end of cache file".into()));
    }
    let rest = &bytes[*pos..];
    let line_end = rest
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| UnitGraphError::Parse("unterminated line".into()))?;
    let line = std::str::from_utf8(&rest[..line_end])
        .map_err(|_| UnitGraphError::Parse("line is not valid UTF-8".into()))?;
    *pos += line_end + 1;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_cache() -> (tempfile::TempDir, CompilationCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = CompilationCache::new(dir.path().join("cc"));
        (dir, cache)
    }

    #[test]
    fn get_counts_hits_and_misses() {
        let (_dir, mut cache) = scratch_cache();
        cache.put("u1", "out", "hash1");
        assert_eq!(cache.get("u1"), Some("out".into()));
        assert_eq!(cache.get("nope"), None);
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn is_valid_requires_matching_hash() {
        let (_dir, mut cache) = scratch_cache();
        cache.put("u1", "out", "hash1");
        assert!(cache.is_valid("u1", "hash1"));
        assert!(!cache.is_valid("u1", "hash2"));
        assert!(!cache.is_valid("u2", "hash1"));
    }

    #[test]
    fn invalidate_drops_entry_and_records_history() {
        let (_dir, mut cache) = scratch_cache();
        cache.put("u1", "out", "hash1");
        cache.invalidate("u1");
        assert!(!cache.has("u1"));
        let history = cache.compile_history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, HistoryAction::Compile);
        assert_eq!(history[1].action, HistoryAction::Invalidate);
    }

    #[test]
    fn save_load_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cc");
        {
            let mut cache = CompilationCache::new(&path);
            cache.put("a.py:1:2:deadbeef", "compiled a\nwith two lines", "h-a");
            cache.put("a.py:3:4:cafebabe", "", "h-b");
            cache.save();
        }
        let mut reloaded = CompilationCache::new(&path);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.is_valid("a.py:1:2:deadbeef", "h-a"));
        assert_eq!(
            reloaded.get("a.py:1:2:deadbeef"),
            Some("compiled a\nwith two lines".into())
        );
        assert_eq!(reloaded.get("a.py:3:4:cafebabe"), Some(String::new()));
    }

    #[test]
    fn load_tolerates_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cc");
        let cache = CompilationCache::new(&path);
        assert!(cache.is_empty());
        fs::write(path.join(CACHE_FILE_NAME), "not a cache file").unwrap();
        let mut cache = CompilationCache::new(&path);
        assert!(cache.is_empty());
        // still usable after a bad load
        cache.put("u", "o", "h");
        assert!(cache.has("u"));
    }

    #[test]
    fn history_and_patterns_persist_as_side_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cc");
        {
            let mut cache = CompilationCache::new(&path);
            cache.put("a", "1", "ha");
            cache.put("b", "2", "hb");
            cache.get("a");
            cache.get("b");
            cache.save();
        }
        assert!(path.join(HISTORY_FILE_NAME).exists());
        assert!(path.join(PATTERNS_FILE_NAME).exists());
        let cache = CompilationCache::new(&path);
        assert_eq!(cache.compile_history(10).len(), 2);
        assert!(cache.predictions("a").contains(&"b".to_string()));
    }

    #[test]
    fn access_patterns_learn_successors() {
        let (_dir, mut cache) = scratch_cache();
        cache.put("a", "1", "ha");
        cache.put("b", "2", "hb");
        cache.get("a");
        cache.get("b");
        assert!(cache.predictions("a").contains(&"b".to_string()));
        assert!(cache.predictions("zzz").is_empty());
    }

    #[test]
    fn hot_units_orders_by_access_count() {
        let (_dir, mut cache) = scratch_cache();
        cache.put("cold", "1", "hc");
        cache.put("hot", "2", "hh");
        cache.get("hot");
        cache.get("hot");
        let hot = cache.hot_units(10);
        assert_eq!(hot[0].0, "hot");
        assert_eq!(hot[0].1, 3);
        assert_eq!(hot[1].0, "cold");
        let limited = cache.hot_units(1);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn stats_reflect_state() {
        let (_dir, mut cache) = scratch_cache();
        cache.put_timed("u1", "abcd", "h1", 12);
        cache.get("u1");
        cache.get("gone");
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.total_output_bytes, 4);
        assert_eq!(stats.total_compile_time_ms, 12);
    }
}
