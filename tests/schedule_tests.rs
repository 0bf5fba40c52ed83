//! Schedules change how a pipeline runs, never what it computes.

use pixelflow::prelude::*;

/// A three-stage pipeline over a 2D domain with a reduction in the middle.
struct Stages {
    x: Var,
    y: Var,
    input: Func,
    smoothed: Func,
    output: Func,
}

fn build() -> Stages {
    let (x, y) = (Var::new("x"), Var::new("y"));
    let input = Func::new("input");
    input.define(&[x, y], (x * 7 + y * 13) % 17).unwrap();

    let r = RDom::named("k", Range::new(-1, 3));
    let smoothed = Func::new("smoothed");
    smoothed.define(&[x, y], 0).unwrap();
    smoothed.at([x, y]).add_assign(input.call([x + r.x(), y.into()])).unwrap();

    let output = Func::new("output");
    output
        .define(&[x, y], smoothed.call([x, y]) * 2 - smoothed.call([x.into(), y + 1]))
        .unwrap();
    Stages { x, y, input, smoothed, output }
}

fn run(stages: &Stages) -> Vec<i32> {
    stages.output.realize(&[20, 11]).unwrap().to_vec()
}

#[test]
fn test_manual_schedules_agree() {
    let reference = run(&build());

    let s = build();
    let (xo, xi, yo, yi) = (Var::new("xo"), Var::new("xi"), Var::new("yo"), Var::new("yi"));
    s.input.root();
    s.smoothed.chunk(s.y);
    s.output.tile(s.x, s.y, xi, yi, 8, 4).parallel(s.y);
    assert_eq!(run(&s), reference);

    let s = build();
    s.smoothed.root();
    s.output.split(s.y, yo, yi, 3).transpose(s.x, yi).parallel(yo);
    assert_eq!(run(&s), reference);

    let s = build();
    s.input.chunk(s.x);
    s.output.split(s.x, xo, xi, 5).unroll(xi);
    assert_eq!(run(&s), reference);
}

#[test]
fn test_unrolled_lanes_past_extent_fail_at_run_time() {
    let (xo, xi) = (Var::new("xo"), Var::new("xi"));
    let s = build();
    s.output.split(s.x, xo, xi, 5);
    assert!(s.output.realize(&[19, 11]).is_ok());

    s.output.unroll(xi);
    let err = s.output.realize(&[19, 11]).unwrap_err();
    assert_eq!(err.as_runtime().map(|e| e.kind), Some(RuntimeErrorKind::OutOfBounds));
    assert!(s.output.realize(&[20, 11]).is_ok());
}

#[test]
fn test_random_schedules_agree() {
    let reference = run(&build());
    for seed in 0..12u64 {
        let s = build();
        s.input.random(seed);
        s.smoothed.random(seed + 100);
        s.output.random(seed + 200);
        assert_eq!(run(&s), reference, "seed {}", seed);
    }
}

#[test]
fn test_random_schedule_is_deterministic() {
    let a = build();
    a.output.random(7);
    let b = build();
    b.output.random(7);
    assert_eq!(a.output.lower_to_string().unwrap(), b.output.lower_to_string().unwrap());
}

#[test]
fn test_serial_and_threaded_pools_agree() {
    let s = build();
    s.output.parallel(s.y);
    s.output.compile_jit_with(JitConfig::serial()).unwrap();
    let serial = run(&s);
    s.output.compile_jit_with(JitConfig::new().threads(3)).unwrap();
    assert_eq!(run(&s), serial);
}

#[test]
fn test_inline_update_func_is_materialized() {
    let s = build();
    s.smoothed.inline();
    let text = s.output.lower_to_string().unwrap();
    assert!(text.contains("realize smoothed"));
    assert_eq!(run(&s), run(&build()));
}

#[test]
fn test_bad_directive_reported_at_lowering() {
    let s = build();
    let (a, b) = (Var::new("a"), Var::new("b"));
    s.output.split(Var::new("nowhere"), a, b, 4);
    let err = s.output.realize(&[4, 4]).unwrap_err();
    assert_eq!(err.as_compile().map(|e| e.kind), Some(CompileErrorKind::InvalidSchedule));
}
