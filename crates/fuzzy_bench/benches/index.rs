use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fuzzy_bench::random_digests;
use fuzzy_core::{CountingBloom, FuzzyStore};

fn bench_filter(c: &mut Criterion) {
    let digests = random_digests(50_000, 8);
    let mut bf = CountingBloom::with_capacity(100_000, 0.01);
    for d in &digests {
        bf.add(d.pattern());
    }
    c.bench_function("filter_contains", |b| {
        b.iter(|| digests.iter().filter(|d| bf.contains(black_box(d.pattern()))).count())
    });
}

fn bench_index(c: &mut Criterion) {
    let stored = random_digests(20_000, 8);
    let probes = random_digests(1_000, 8);
    let mut store = FuzzyStore::new(100_000, 0.01);
    for d in &stored {
        store.write_at(d, 0);
    }
    c.bench_function("check_hit", |b| {
        b.iter(|| stored[..1_000].iter().filter(|d| store.check(black_box(d))).count())
    });
    c.bench_function("check_miss", |b| {
        b.iter(|| probes.iter().filter(|d| store.check(black_box(d))).count())
    });
}

criterion_group!(benches, bench_filter, bench_index);
criterion_main!(benches);
