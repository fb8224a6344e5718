// ABOUTME: Build-result cache keyed by target, hashed command and hashed dependency file contents.
// ABOUTME: Delegates storage to a runtime-swappable replacement policy (LRU by default, LFU optional).
use crate::lfu::LfuCache;
use crate::lru::LruCache;
use crate::policy::ReplacementPolicy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use unitgraph_core::{content_hash, content_hash_bytes, Result, UnitGraphError};

/// Which replacement policy backs the build cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    #[default]
    Lru,
    Lfu,
}

impl fmt::Display for EvictionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionStrategy::Lru => write!(f, "lru"),
            EvictionStrategy::Lfu => write!(f, "lfu"),
        }
    }
}

impl FromStr for EvictionStrategy {
    type Err = UnitGraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lru" => Ok(EvictionStrategy::Lru),
            "lfu" => Ok(EvictionStrategy::Lfu),
            other => Err(UnitGraphError::Configuration(format!(
                "unknown eviction strategy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildCacheConfig {
    pub cache_dir: PathBuf,
    /// Maximum number of cached build results.
    pub max_size: usize,
    pub strategy: EvictionStrategy,
}

impl Default for BuildCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".cache"),
            max_size: 1_000_000_000,
            strategy: EvictionStrategy::default(),
        }
    }
}

impl BuildCacheConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Caches external build outputs so unchanged inputs skip the build.
///
/// The cache key folds in the target name, a hash of the build command
/// and a hash of every dependency file's bytes in caller-supplied order,
/// so any input drift produces a different key and a miss.
pub struct BuildCache {
    cache_dir: PathBuf,
    policy: Mutex<PolicyCell>,
}

struct PolicyCell {
    strategy: EvictionStrategy,
    policy: Box<dyn ReplacementPolicy>,
}

fn make_policy(strategy: EvictionStrategy, max_size: usize) -> Box<dyn ReplacementPolicy> {
    match strategy {
        EvictionStrategy::Lru => Box::new(LruCache::new(max_size)),
        EvictionStrategy::Lfu => Box::new(LfuCache::new(max_size)),
    }
}

impl BuildCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self::with_config(BuildCacheConfig {
            cache_dir: cache_dir.into(),
            ..BuildCacheConfig::default()
        })
    }

    pub fn with_config(config: BuildCacheConfig) -> Self {
        if let Err(e) = fs::create_dir_all(&config.cache_dir) {
            warn!(dir = %config.cache_dir.display(), error = %e, "failed to create build cache directory");
        }
        Self {
            cache_dir: config.cache_dir,
            policy: Mutex::new(PolicyCell {
                strategy: config.strategy,
                policy: make_policy(config.strategy, config.max_size),
            }),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn strategy(&self) -> EvictionStrategy {
        self.policy.lock().strategy
    }

    /// Swap the replacement policy. All cached entries are discarded; the
    /// fresh policy keeps the previous capacity.
    pub fn set_strategy(&self, strategy: EvictionStrategy) {
        let mut cell = self.policy.lock();
        if cell.strategy == strategy {
            return;
        }
        let max_size = cell.policy.max_size();
        let discarded = cell.policy.len();
        cell.strategy = strategy;
        cell.policy = make_policy(strategy, max_size);
        info!(%strategy, discarded, "switched build cache eviction strategy");
    }

    /// Store the result of building `target`; returns the policy's verdict.
    pub fn cache_build_result<S: AsRef<str>>(
        &self,
        target: &str,
        command: &str,
        dependencies: &[S],
        result: &str,
    ) -> bool {
        let cell = self.policy.lock();
        let key = self.build_key(target, command, dependencies);
        cell.policy.put(&key, result)
    }

    /// Look up a previously cached result for identical inputs.
    pub fn get_cached_build_result<S: AsRef<str>>(
        &self,
        target: &str,
        command: &str,
        dependencies: &[S],
    ) -> Option<String> {
        let cell = self.policy.lock();
        let key = self.build_key(target, command, dependencies);
        cell.policy.get(&key)
    }

    pub fn needs_rebuild<S: AsRef<str>>(
        &self,
        target: &str,
        command: &str,
        dependencies: &[S],
    ) -> bool {
        self.get_cached_build_result(target, command, dependencies)
            .is_none()
    }

    /// Drop every cached entry and reset the cache directory on disk.
    pub fn clean_all_cache(&self) {
        let cell = self.policy.lock();
        cell.policy.clear();
        if self.cache_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.cache_dir) {
                warn!(dir = %self.cache_dir.display(), error = %e, "failed to remove build cache directory");
            }
        }
        if let Err(e) = fs::create_dir_all(&self.cache_dir) {
            warn!(dir = %self.cache_dir.display(), error = %e, "failed to recreate build cache directory");
        }
        info!(dir = %self.cache_dir.display(), "build cache cleaned");
    }

    /// Age-based cleanup hook. Declared for API completeness; entries do
    /// not record insertion times yet, so this performs no work.
    pub fn clean_expired_cache(&self, max_age: Duration) {
        warn!(?max_age, "expired-entry cleanup is not implemented; no entries removed");
    }

    /// Per-target cleanup hook. Keys are one-way hashes of their inputs,
    /// so entries cannot be traced back to a target; performs no work.
    pub fn clean_target_cache(&self, target: &str) {
        warn!(build_target = target, "per-target cleanup is not implemented; no entries removed");
    }

    pub fn len(&self) -> usize {
        self.policy.lock().policy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn log_stats(&self) {
        let cell = self.policy.lock();
        info!(dir = %self.cache_dir.display(), strategy = %cell.strategy, "build cache stats");
        cell.policy.log_stats();
    }

    /// Compose the deterministic key string and hash it.
    ///
    /// Shape: `target=<t>;command=<H(cmd)>;dep=<p>:<H(bytes(p))>;...` with
    /// dependencies in caller order. A dependency file that cannot be
    /// read contributes an empty hash but still shifts the key.
    fn build_key<S: AsRef<str>>(&self, target: &str, command: &str, dependencies: &[S]) -> String {
        let mut key = String::new();
        let _ = write!(key, "target={target};command={};", content_hash(command));
        for dep in dependencies {
            let dep = dep.as_ref();
            let file_hash = hash_file(dep);
            let _ = write!(key, "dep={dep}:{file_hash};");
        }
        content_hash(&key)
    }
}

fn hash_file(path: &str) -> String {
    match fs::read(path) {
        Ok(bytes) => content_hash_bytes(&bytes),
        Err(e) => {
            debug!(path, error = %e, "dependency file unreadable; hashing as empty");
            String::new()
        }
    }
}
