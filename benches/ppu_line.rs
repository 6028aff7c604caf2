use criterion::{criterion_group, criterion_main, Criterion};
use dmg_core::consts::LCDC_ADDR;
use dmg_core::test::{build_test, TestOptions};

fn benchmark_frame_render(c: &mut Criterion) {
    let mut gb = build_test(&TestOptions::default());
    gb.cpu_mut().bus_i().write(LCDC_ADDR, 0x91); // LCD + BG on, so frames actually complete

    c.bench_function("next_frame", |b| {
        b.iter(|| {
            gb.next_frame();
        })
    });
}

criterion_group!(benches, benchmark_frame_render);
criterion_main!(benches);
