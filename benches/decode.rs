use criterion::{criterion_group, criterion_main, Criterion};
use dmg_core::test::{build_test, TestOptions};

fn benchmark_cpu_clock(c: &mut Criterion) {
    let mut gb = build_test(&TestOptions::default());

    c.bench_function("cpu_clock_1m", |b| {
        b.iter(|| {
            for _ in 0..1_000_000 {
                gb.clock();
            }
        })
    });
}

criterion_group!(benches, benchmark_cpu_clock);
criterion_main!(benches);
