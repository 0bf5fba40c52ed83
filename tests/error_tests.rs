//! Error reporting across the three tiers: compile, internal and runtime.

use pixelflow::ir::expr::BinOp;
use pixelflow::lower::lower;
use pixelflow::prelude::*;

fn compile_kind(err: &FlowError) -> Option<CompileErrorKind> {
    err.as_compile().map(|e| e.kind)
}

#[test]
fn test_failed_accumulate_leaves_func_pure() {
    let x = Var::new("x");
    let f = Func::new("f");
    f.define(&[x], x + 3).unwrap();
    assert!(!f.has_update_definition());

    assert!(f.at([x]).add_assign(1.3f32).is_err());
    assert!(!f.has_update_definition());

    f.at([x]).add_assign(1).unwrap();
    assert!(f.has_update_definition());
    assert_eq!(f.num_update_definitions(), 1);
}

#[test]
fn test_scaled_argument_in_update_rejected() {
    let x = Var::new("x");
    let f = Func::new("f");
    f.define(&[x], x + 3).unwrap();
    let err = f.at([x / 3.0f32]).add_assign(1).unwrap_err();
    assert!(err.is_compile());
    assert!(!f.has_update_definition());
    // The pure definition still works.
    assert_eq!(f.realize(&[3]).unwrap().to_vec::<i32>(), vec![3, 4, 5]);
}

#[test]
fn test_tuple_index_on_scalar_func() {
    let x = Var::new("x");
    let f = Func::new("f");
    f.define(&[x], x).unwrap();
    let g = Func::new("g");
    let err = g.define(&[x], f.at([x]).index(1)).unwrap_err();
    assert_eq!(compile_kind(&err), Some(CompileErrorKind::BadTupleIndex));
    assert!(!g.defined());
}

#[test]
fn test_accumulate_float_into_int() {
    let x = Var::new("x");
    let f = Func::new("f");
    f.define(&[x], x).unwrap();
    let err = f.at([x]).add_assign(1.3f32).unwrap_err();
    assert!(err.is_compile());
    assert_eq!(compile_kind(&err), Some(CompileErrorKind::TypeMismatch));
}

#[test]
fn test_undefined_update_value() {
    let x = Var::new("x");
    let f = Func::new("f");
    f.define(&[x], x).unwrap();
    let err = f.update([x], Expr::undefined()).unwrap_err();
    assert_eq!(compile_kind(&err), Some(CompileErrorKind::UndefinedExpr));
    assert!(!f.has_update_definition());
}

#[test]
fn test_unbound_param_then_bound_from_another_pipeline() {
    let x = Var::new("x");
    let p = Param::new("p", Type::float(32));
    let g = Func::new("g");
    g.define(&[x], &p * x).unwrap();

    let err = g.realize(&[10]).unwrap_err();
    assert_eq!(compile_kind(&err), Some(CompileErrorKind::UnboundParameter));

    let h = Func::new("h");
    h.define(&[x], x * 7).unwrap();
    let mut sequence = Buffer::new(Type::int(32), &[10]);
    h.realize_into(&mut sequence).unwrap();
    let fourteen = sequence.get::<i32>(&[2]).unwrap();
    p.set(fourteen as f32);

    let out = g.realize(&[10]).unwrap();
    for i in 0..10 {
        assert_eq!(out.get::<f32>(&[i]), Some(i as f32 * 14.0));
    }
}

#[test]
fn test_unbound_image_then_bound_to_lambda_output() {
    let x = Var::new("x");
    let sequence = ImageParam::new("sequence", Type::float(32), 1);
    let g = Func::new("g");
    g.define(&[x], sequence.at([x]) * 2.0f32).unwrap();

    let err = g.realize(&[10]).unwrap_err();
    assert!(err.is_compile());
    assert_eq!(compile_kind(&err), Some(CompileErrorKind::UnboundParameter));

    let h = lambda(&[x], x * 7.0f32).unwrap();
    sequence.set(h.realize(&[10]).unwrap());

    let out = g.realize(&[10]).unwrap();
    for i in 0..10 {
        assert_eq!(out.get::<f32>(&[i]), Some(i as f32 * 14.0));
    }
}

#[test]
fn test_undefined_operands_are_internal_errors() {
    let err = Expr::binary(BinOp::Add, Expr::undefined(), Expr::undefined()).unwrap_err();
    assert!(err.is_internal());
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[test]
fn test_uneven_vectorize_fails_only_at_run_time() {
    let x = Var::new("x");
    let f = Func::new("f");
    f.define(&[x], x * 2).unwrap();
    f.vectorize_by(x, 4);

    assert!(lower(&f).is_ok());
    assert!(f.compile_jit().is_ok());

    let err = f.realize(&[10]).unwrap_err();
    assert!(err.is_runtime());
    assert_eq!(err.as_runtime().map(|e| e.kind), Some(RuntimeErrorKind::OutOfBounds));

    // Extents that are a multiple of the factor are fine.
    assert_eq!(f.realize(&[8]).unwrap().get::<i32>(&[7]), Some(14));
}

#[test]
fn test_param_outside_range() {
    let x = Var::new("x");
    let p = Param::new("offset", Type::int(32));
    p.set_range(-3, 5);
    let f = Func::new("f");
    f.define(&[x], x + &p).unwrap();

    p.set(-4);
    let err = f.realize(&[4]).unwrap_err();
    assert_eq!(err.as_runtime().map(|e| e.kind), Some(RuntimeErrorKind::ParamOutOfRange));

    p.set(5);
    assert_eq!(f.realize(&[2]).unwrap().to_vec::<i32>(), vec![5, 6]);
}

#[test]
fn test_errors_name_the_func() {
    let x = Var::new("x");
    let f = Func::new("named_output");
    f.define(&[x], x).unwrap();
    f.vectorize_by(x, 8);
    let err = f.realize(&[3]).unwrap_err();
    assert!(err.as_runtime().and_then(|e| e.subject.clone()).is_some());
    assert!(err.to_string().starts_with("Runtime error"));
}

#[test]
fn test_wrong_output_buffer_type() {
    let x = Var::new("x");
    let f = Func::new("f");
    f.define(&[x], x).unwrap();
    let mut out = Buffer::new(Type::float(32), &[4]);
    let err = f.realize_into(&mut out).unwrap_err();
    assert_eq!(err.as_runtime().map(|e| e.kind), Some(RuntimeErrorKind::BadBuffer));
}
