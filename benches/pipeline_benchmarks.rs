//! Benchmarks for lowering, compiling and running pipelines.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pixelflow::apps::{NlMeans, ScheduleStyle};
use pixelflow::prelude::*;
use std::sync::Arc;

fn blur() -> Func {
    let (x, y) = (Var::new("x"), Var::new("y"));
    let blur_x = Func::new("blur_x");
    blur_x.define(&[x, y], (x - 1 + x + (x + 1)) * y).unwrap();
    let blur_y = Func::new("blur_y");
    blur_y
        .define(&[x, y], blur_x.call([x.into(), y - 1]) + blur_x.call([x, y]) + blur_x.call([x.into(), y + 1]))
        .unwrap();
    blur_x.root();
    blur_y.parallel(y);
    blur_y
}

/// Benchmark lowering a two-stage pipeline.
fn bench_lowering(c: &mut Criterion) {
    let f = blur();
    c.bench_function("lower_blur", |b| b.iter(|| pixelflow::lower::lower(black_box(&f)).unwrap()));
}

/// Benchmark realizing with the cached compiled pipeline.
fn bench_realize(c: &mut Criterion) {
    let f = blur();
    f.compile_jit().unwrap();
    c.bench_function("realize_blur_256", |b| b.iter(|| f.realize(black_box(&[256, 256])).unwrap()));
}

/// Benchmark both denoiser schedules on a small image.
fn bench_nl_means(c: &mut Criterion) {
    let data: Vec<f32> = (0..32 * 32 * 3).map(|i| (i % 17) as f32 / 16.0).collect();
    let input = Arc::new(Buffer::from_vec(data, &[32, 32, 3]).unwrap());
    let mut group = c.benchmark_group("nl_means_32");
    group.sample_size(10);
    for (label, style) in [("manual", ScheduleStyle::Manual), ("auto", ScheduleStyle::Auto)] {
        let pipeline = NlMeans::new(style).unwrap();
        let mut out = Buffer::new(Type::float(32), &[32, 32, 3]);
        group.bench_function(label, |b| {
            b.iter(|| pipeline.run(Arc::clone(&input), 5, 5, 0.12, &mut out).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lowering, bench_realize, bench_nl_means);
criterion_main!(benches);
