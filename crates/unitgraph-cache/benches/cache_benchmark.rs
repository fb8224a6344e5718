use criterion::{black_box, criterion_group, criterion_main, Criterion};
use unitgraph_cache::{LfuCache, LruCache};

fn bench_lru(c: &mut Criterion) {
    c.bench_function("lru_put_get_1k", |b| {
        let cache = LruCache::new(512);
        b.iter(|| {
            for i in 0..1_000u32 {
                let key = format!("unit-{}", i % 700);
                cache.put(&key, "output");
                if i % 3 == 0 {
                    black_box(cache.get(&key));
                }
            }
        });
    });
}

fn bench_lfu(c: &mut Criterion) {
    c.bench_function("lfu_put_get_1k", |b| {
        let cache = LfuCache::new(512);
        b.iter(|| {
            for i in 0..1_000u32 {
                let key = format!("unit-{}", i % 700);
                cache.put(&key, "output");
                if i % 3 == 0 {
                    black_box(cache.get(&key));
                }
            }
        });
    });
}

criterion_group!(benches, bench_lru, bench_lfu);
criterion_main!(benches);
