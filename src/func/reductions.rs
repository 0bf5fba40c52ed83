//! Inline reductions and anonymous Funcs.
//!
//! `sum(e)` and friends define an anonymous Func over the free Vars of `e`,
//! initialised to the reduction's identity and updated once per point of
//! the reduction domain `e` uses, and return a call to that Func.

use crate::func::Func;
use crate::ir::expr::{self, Expr};
use crate::ir::types::{Type, TypeCode, Value};
use crate::ir::var::Var;
use crate::utils::errors::{compile_error, CompileErrorKind, FlowResult};

#[derive(Debug, Clone, Copy)]
enum Reduction {
    Sum,
    Product,
    Maximum,
    Minimum,
}

impl Reduction {
    fn name(self) -> &'static str {
        match self {
            Reduction::Sum => "sum",
            Reduction::Product => "product",
            Reduction::Maximum => "maximum",
            Reduction::Minimum => "minimum",
        }
    }

    fn identity(self, ty: Type) -> Expr {
        let value = match (self, ty.code) {
            (Reduction::Sum, _) => ty.zero(),
            (Reduction::Product, TypeCode::Float) => Value::Float(1.0),
            (Reduction::Product, TypeCode::UInt) => Value::UInt(1),
            (Reduction::Product, _) => Value::Int(1),
            (Reduction::Maximum, TypeCode::Float) => Value::Float(f64::NEG_INFINITY),
            (Reduction::Maximum, TypeCode::UInt) => Value::UInt(0),
            (Reduction::Maximum, TypeCode::Bool) => Value::Bool(false),
            (Reduction::Maximum, TypeCode::Int) => Value::Int(signed_min(ty.bits)),
            (Reduction::Minimum, TypeCode::Float) => Value::Float(f64::INFINITY),
            (Reduction::Minimum, TypeCode::UInt) => Value::UInt(unsigned_max(ty.bits)),
            (Reduction::Minimum, TypeCode::Bool) => Value::Bool(true),
            (Reduction::Minimum, TypeCode::Int) => Value::Int(signed_max(ty.bits)),
        };
        Expr::constant(ty, value)
    }

    fn combine(self, current: Expr, value: Expr) -> Expr {
        match self {
            Reduction::Sum => current + value,
            Reduction::Product => current * value,
            Reduction::Maximum => expr::max(current, value),
            Reduction::Minimum => expr::min(current, value),
        }
    }
}

fn signed_min(bits: u8) -> i64 {
    if bits >= 64 {
        i64::MIN
    } else {
        -(1i64 << (bits - 1))
    }
}

fn signed_max(bits: u8) -> i64 {
    if bits >= 64 {
        i64::MAX
    } else {
        (1i64 << (bits - 1)) - 1
    }
}

fn unsigned_max(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn inline_reduction(kind: Reduction, e: Expr) -> FlowResult<Expr> {
    let ty = e.ty().ok_or_else(|| {
        compile_error(
            CompileErrorKind::UndefinedExpr,
            format!("Argument of {} is undefined", kind.name()),
        )
    })?;
    if e.reduction_vars().is_empty() {
        return Err(compile_error(
            CompileErrorKind::BadReductionDomain,
            format!("Argument of {} uses no reduction variables: {}", kind.name(), e),
        ));
    }
    let vars = e.free_vars();
    let f = Func::anonymous();
    f.define(&vars, kind.identity(ty))?;
    let at = f.at(vars.clone());
    at.assign(kind.combine(at.read(), e))?;
    Ok(f.call(vars))
}

/// Sum of `e` over its reduction domain.
pub fn sum(e: impl Into<Expr>) -> FlowResult<Expr> {
    inline_reduction(Reduction::Sum, e.into())
}

pub fn product(e: impl Into<Expr>) -> FlowResult<Expr> {
    inline_reduction(Reduction::Product, e.into())
}

pub fn maximum(e: impl Into<Expr>) -> FlowResult<Expr> {
    inline_reduction(Reduction::Maximum, e.into())
}

pub fn minimum(e: impl Into<Expr>) -> FlowResult<Expr> {
    inline_reduction(Reduction::Minimum, e.into())
}

/// An anonymous pure Func `f(vars) = e`.
pub fn lambda(vars: &[Var], e: impl Into<Expr>) -> FlowResult<Func> {
    let f = Func::anonymous();
    f.define(vars, e)?;
    Ok(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::var::{RDom, Range};

    #[test]
    fn test_sum_builds_anonymous_update() {
        let x = Var::new("x");
        let r = RDom::new(Range::new(0, 5));
        let s = sum(x + r.x()).unwrap();
        let call = s.calls();
        assert_eq!(call.len(), 1);
        let f = call[0].func().unwrap();
        assert_eq!(f.args(), vec![x]);
        assert!(f.has_update_definition());
    }

    #[test]
    fn test_sum_requires_reduction_vars() {
        let x = Var::new("x");
        let err = sum(x + 1).unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn test_identities() {
        assert_eq!(Reduction::Maximum.identity(Type::int(8)).as_int(), Some(-128));
        assert_eq!(Reduction::Minimum.identity(Type::uint(8)).as_int(), Some(255));
        assert_eq!(Reduction::Product.identity(Type::float(32)).as_float(), Some(1.0));
    }

    #[test]
    fn test_lambda() {
        let x = Var::new("x");
        let f = lambda(&[x], x * x).unwrap();
        assert!(f.defined());
        assert_eq!(f.dimensions(), 1);
    }
}
