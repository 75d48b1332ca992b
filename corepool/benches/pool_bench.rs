//! Allocation throughput for the bump path and the large-block free-list.

use corepool::Pool;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_small_alloc(c: &mut Criterion) {
    c.bench_function("pool_alloc_small", |b| {
        let pool = Pool::new();
        b.iter(|| {
            let ptr = pool.alloc_default(black_box(64)).unwrap();
            black_box(ptr);
        });
        pool.destroy();
    });
}

fn bench_large_alloc_reuse(c: &mut Criterion) {
    c.bench_function("pool_alloc_large_reuse", |b| {
        let pool = Pool::new();
        b.iter(|| {
            let ptr = pool.alloc_default(black_box(4096)).unwrap();
            pool.free(ptr, 4096);
        });
        pool.destroy();
    });
}

fn bench_nested_pools(c: &mut Criterion) {
    c.bench_function("pool_create_destroy_child", |b| {
        let root = Pool::new();
        b.iter(|| {
            let child = root.create();
            child.alloc_default(black_box(128)).unwrap();
            child.destroy();
        });
        root.destroy();
    });
}

criterion_group!(
    benches,
    bench_small_alloc,
    bench_large_alloc_reuse,
    bench_nested_pools
);
criterion_main!(benches);
