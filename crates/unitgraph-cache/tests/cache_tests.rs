use std::fs;
use unitgraph_cache::{
    BuildCache, BuildCacheConfig, CompilationCache, EvictionStrategy, LfuCache, LruCache,
    ReplacementPolicy,
};

#[test]
fn lru_eviction_order_end_to_end() {
    // capacity 2: touching "a" keeps it alive, "b" is the victim
    let cache = LruCache::new(2);
    cache.put("a", "1");
    cache.put("b", "2");
    cache.get("a");
    cache.put("c", "3");
    assert_eq!(cache.get("a"), Some("1".into()));
    assert_eq!(cache.get("b"), None);
    assert_eq!(cache.get("c"), Some("3".into()));
}

#[test]
fn lfu_eviction_removes_minimum_frequency_key() {
    let cache = LfuCache::new(3);
    cache.put("a", "1");
    cache.put("b", "2");
    cache.put("c", "3");
    cache.get("a");
    cache.get("a");
    cache.get("b");
    cache.put("d", "4");
    // "c" was the only key still at frequency 1
    assert!(!cache.contains("c"));
    assert!(cache.contains("a"));
    assert!(cache.contains("b"));
    assert!(cache.contains("d"));
}

#[test]
fn policies_share_one_interface() {
    let policies: Vec<Box<dyn ReplacementPolicy>> =
        vec![Box::new(LruCache::new(8)), Box::new(LfuCache::new(8))];
    for policy in policies {
        assert!(policy.put("k", "v"));
        assert_eq!(policy.get("k"), Some("v".into()));
        assert!(policy.contains("k"));
        assert_eq!(policy.len(), 1);
        policy.set_max_size(0);
        assert!(policy.is_empty());
    }
}

#[test]
fn build_cache_key_is_stable_until_a_dependency_changes() {
    let dir = tempfile::tempdir().unwrap();
    let dep_a = dir.path().join("a.src");
    let dep_b = dir.path().join("b.src");
    fs::write(&dep_a, "alpha").unwrap();
    fs::write(&dep_b, "beta").unwrap();
    let deps = [
        dep_a.to_string_lossy().into_owned(),
        dep_b.to_string_lossy().into_owned(),
    ];

    let cache = BuildCache::new(dir.path().join("bc"));
    assert!(cache.cache_build_result("app", "cc -O2 main.c", &deps, "object-code"));

    // unchanged inputs: stored result comes back
    assert_eq!(
        cache.get_cached_build_result("app", "cc -O2 main.c", &deps),
        Some("object-code".into())
    );
    assert!(!cache.needs_rebuild("app", "cc -O2 main.c", &deps));

    // one byte of one dependency flips the key
    fs::write(&dep_b, "betA").unwrap();
    assert_eq!(
        cache.get_cached_build_result("app", "cc -O2 main.c", &deps),
        None
    );
    assert!(cache.needs_rebuild("app", "cc -O2 main.c", &deps));
}

#[test]
fn build_cache_missing_dependency_still_contributes_to_key() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BuildCache::new(dir.path().join("bc"));
    let ghost = dir.path().join("ghost.src");
    let deps = [ghost.to_string_lossy().into_owned()];

    cache.cache_build_result("app", "make", &deps, "out");
    assert_eq!(
        cache.get_cached_build_result("app", "make", &deps),
        Some("out".into())
    );
    // materializing the file changes its hash contribution
    fs::write(&ghost, "now it exists").unwrap();
    assert!(cache.needs_rebuild("app", "make", &deps));
}

#[test]
fn build_cache_with_lfu_strategy_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let cache = BuildCache::with_config(BuildCacheConfig {
        cache_dir: dir.path().join("bc"),
        max_size: 16,
        strategy: EvictionStrategy::Lfu,
    });
    assert_eq!(cache.strategy(), EvictionStrategy::Lfu);
    cache.cache_build_result("t", "cmd", &[] as &[&str], "r");
    assert_eq!(
        cache.get_cached_build_result("t", "cmd", &[] as &[&str]),
        Some("r".into())
    );
}

#[test]
fn compilation_cache_survives_restart_and_revalidates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cc");
    {
        let mut cache = CompilationCache::new(&path);
        cache.put("mod.py:1:5:0a1b2c3d", "def f: ...", "hash-v1");
        cache.save();
    }
    let mut cache = CompilationCache::new(&path);
    assert!(cache.is_valid("mod.py:1:5:0a1b2c3d", "hash-v1"));
    assert_eq!(cache.get("mod.py:1:5:0a1b2c3d"), Some("def f: ...".into()));
    // stale hash: entry exists but must not be used
    assert!(!cache.is_valid("mod.py:1:5:0a1b2c3d", "hash-v2"));
}
