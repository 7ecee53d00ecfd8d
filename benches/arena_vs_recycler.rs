use criterion::{Criterion, black_box, criterion_group, criterion_main};
use radix_arena::{Art, BumpArena, RawAllocator, Recycler};

const BATCH: usize = 256;

fn bench_alloc_release_cycles(c: &mut Criterion) {
    let mut group = c.benchmark_group("Alloc/Release Cycles");
    group.sample_size(50);

    group.bench_function("BumpArena churn (never reclaims)", |b| {
        let arena = BumpArena::new();
        b.iter(|| {
            for _ in 0..BATCH {
                let p = arena.alloc(64);
                black_box(p);
            }
        });
    });

    group.bench_function("Recycler churn (alloc/release pairs)", |b| {
        let recycler = Recycler::new();
        b.iter(|| {
            for _ in 0..BATCH {
                let p = recycler.alloc(64);
                black_box(p);
                recycler.release(p, 64);
            }
        });
    });
}

fn bench_art_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("ART Insert");
    group.sample_size(20);

    group.bench_function("insert 10k sequential keys (Recycler-backed)", |b| {
        b.iter(|| {
            let recycler = Recycler::new();
            let tree: Art<'_, Recycler, u32> = Art::new(&recycler);
            for i in 0..10_000u32 {
                tree.insert(&i.to_be_bytes(), i);
            }
            black_box(tree.len());
        });
    });

    group.bench_function("insert 10k sequential keys (BumpArena-backed)", |b| {
        b.iter(|| {
            let arena = BumpArena::new();
            let tree: Art<'_, BumpArena, u32> = Art::new(&arena);
            for i in 0..10_000u32 {
                tree.insert(&i.to_be_bytes(), i);
            }
            black_box(tree.len());
        });
    });
}

fn bench_reset_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("Reset + Reuse");
    group.sample_size(20);

    group.bench_function("BumpArena: fill then reset", |b| {
        let mut arena = BumpArena::new();
        b.iter(|| {
            for _ in 0..BATCH {
                black_box(arena.alloc(128));
            }
            arena.reset();
        });
    });

    group.bench_function("Recycler: fill then reset", |b| {
        let mut recycler = Recycler::new();
        b.iter(|| {
            for _ in 0..BATCH {
                black_box(recycler.alloc(128));
            }
            recycler.reset();
        });
    });
}

criterion_group!(benches, bench_alloc_release_cycles, bench_art_insert, bench_reset_reuse);
criterion_main!(benches);
