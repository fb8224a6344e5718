use std::collections::HashSet;
use tracing::debug;
use unitgraph_core::{ChangeRecord, Snapshot, UnitState};

/// Detects which lines and units changed between two snapshots of a file.
///
/// Line matching runs a classical dynamic-programming LCS over the
/// whitespace-insensitive line hashes; the cost is O(m·n) in time and
/// space over the two line counts, so callers should not feed it
/// unbounded inputs without considering the quadratic growth.
#[derive(Debug, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Snapshot `content` as the current version of `file_path`. The
    /// snapshot's unit map starts empty; the engine fills it from the
    /// unit manager after invalidation.
    pub fn create_snapshot(&self, file_path: &str, content: &str) -> Snapshot {
        Snapshot::of_content(file_path, content)
    }

    /// Longest common subsequence over two line-hash sequences, returned
    /// as ordered `(old_index, new_index)` pairs (0-based).
    ///
    /// The backtrace takes the diagonal on a match, moves up when the
    /// cell above is strictly greater, and otherwise moves left — which
    /// pins ambiguous diffs to the new side and keeps them deterministic.
    pub fn compute_lcs(&self, old_lines: &[String], new_lines: &[String]) -> Vec<(usize, usize)> {
        let m = old_lines.len();
        let n = new_lines.len();
        let mut dp = vec![vec![0u32; n + 1]; m + 1];
        for i in 1..=m {
            for j in 1..=n {
                dp[i][j] = if old_lines[i - 1] == new_lines[j - 1] {
                    dp[i - 1][j - 1] + 1
                } else {
                    dp[i - 1][j].max(dp[i][j - 1])
                };
            }
        }
        let mut pairs = Vec::with_capacity(dp[m][n] as usize);
        let (mut i, mut j) = (m, n);
        while i > 0 && j > 0 {
            if old_lines[i - 1] == new_lines[j - 1] {
                pairs.push((i - 1, j - 1));
                i -= 1;
                j -= 1;
            } else if dp[i - 1][j] > dp[i][j - 1] {
                i -= 1;
            } else {
                j -= 1;
            }
        }
        pairs.reverse();
        pairs
    }

    /// 1-based line numbers in the new snapshot that are not part of the
    /// LCS. Pure deletions have no new-side line and therefore do not
    /// appear here; they surface as deleted units in
    /// [`detect_changes`](Self::detect_changes).
    pub fn get_changed_lines(&self, old_snap: &Snapshot, new_snap: &Snapshot) -> Vec<u32> {
        let lcs = self.compute_lcs(&old_snap.line_hashes, &new_snap.line_hashes);
        let matched: HashSet<usize> = lcs.iter().map(|(_, new_idx)| *new_idx).collect();
        let changed: Vec<u32> = (0..new_snap.line_hashes.len())
            .filter(|idx| !matched.contains(idx))
            .map(|idx| idx as u32 + 1)
            .collect();
        debug!(
            file = %new_snap.file_path,
            old_lines = old_snap.line_hashes.len(),
            new_lines = new_snap.line_hashes.len(),
            changed = changed.len(),
            "line diff computed"
        );
        changed
    }

    /// Unit-level diff of two snapshots: ids only in the old map are
    /// `Deleted`, ids only in the new map are `Added`, ids in both with
    /// differing content hashes are `Modified`.
    pub fn detect_changes(&self, old_snap: &Snapshot, new_snap: &Snapshot) -> Vec<ChangeRecord> {
        let mut records = Vec::new();

        let mut old_ids: Vec<&String> = old_snap.units.keys().collect();
        old_ids.sort();
        for id in old_ids {
            if !new_snap.units.contains_key(id) {
                let old_unit = &old_snap.units[id];
                records.push(ChangeRecord {
                    unit_id: id.clone(),
                    change_type: UnitState::Deleted,
                    old_start_line: old_unit.start_line,
                    old_end_line: old_unit.end_line,
                    new_start_line: 0,
                    new_end_line: 0,
                    reason: "unit deleted".into(),
                });
            }
        }

        let mut new_ids: Vec<&String> = new_snap.units.keys().collect();
        new_ids.sort();
        for id in new_ids {
            let new_unit = &new_snap.units[id];
            match old_snap.units.get(id) {
                None => records.push(ChangeRecord {
                    unit_id: id.clone(),
                    change_type: UnitState::Added,
                    old_start_line: 0,
                    old_end_line: 0,
                    new_start_line: new_unit.start_line,
                    new_end_line: new_unit.end_line,
                    reason: "unit added".into(),
                }),
                Some(old_unit) if old_unit.content_hash != new_unit.content_hash => {
                    records.push(ChangeRecord {
                        unit_id: id.clone(),
                        change_type: UnitState::Modified,
                        old_start_line: old_unit.start_line,
                        old_end_line: old_unit.end_line,
                        new_start_line: new_unit.start_line,
                        new_end_line: new_unit.end_line,
                        reason: "content changed".into(),
                    });
                }
                Some(_) => {}
            }
        }

        records
    }
}
