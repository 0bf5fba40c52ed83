//! Modulus-remainder analysis of integer expressions.
//!
//! Every integer expression is summarized as `modulus * k + remainder`
//! for some unknown integer `k`. A modulus of zero means the expression
//! is the constant `remainder`; a modulus of one means nothing is known.
//!
//! ```text
//! 4*x + 6          ->  (4, 2)
//! 4*x + 6*y        ->  (2, 0)
//! (8*x + 3) / 2    ->  (4, 1)
//! ```

use crate::ir::expr::{BinOp, Expr, ExprKind};
use crate::ir::plan::{PExpr, PNode};
use crate::ir::types::Value;
use crate::utils::errors::{internal_error, FlowResult};
use num_integer::Integer;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModulusRemainder {
    pub modulus: i64,
    pub remainder: i64,
}

impl ModulusRemainder {
    pub fn new(modulus: i64, remainder: i64) -> Self {
        let modulus = modulus.abs();
        let remainder = if modulus == 0 { remainder } else { remainder.mod_floor(&modulus) };
        Self { modulus, remainder }
    }

    pub fn constant(v: i64) -> Self {
        Self::new(0, v)
    }

    /// No information.
    pub fn unknown() -> Self {
        Self::new(1, 0)
    }

    pub fn as_constant(&self) -> Option<i64> {
        (self.modulus == 0).then_some(self.remainder)
    }

    /// Whether every value of the expression is a multiple of `factor`.
    pub fn is_multiple_of(&self, factor: i64) -> bool {
        factor != 0 && self.remainder.mod_floor(&factor) == 0 && self.modulus.mod_floor(&factor) == 0
    }

    fn add(a: Self, b: Self) -> Self {
        Self::new(a.modulus.gcd(&b.modulus), a.remainder.wrapping_add(b.remainder))
    }

    fn sub(a: Self, b: Self) -> Self {
        Self::new(a.modulus.gcd(&b.modulus), a.remainder.wrapping_sub(b.remainder))
    }

    fn mul(a: Self, b: Self) -> Self {
        match (a.as_constant(), b.as_constant()) {
            (Some(c), _) => Self::new(b.modulus.wrapping_mul(c), b.remainder.wrapping_mul(c)),
            (_, Some(c)) => Self::new(a.modulus.wrapping_mul(c), a.remainder.wrapping_mul(c)),
            _ => {
                let m = (a.modulus * b.modulus)
                    .gcd(&(a.modulus * b.remainder))
                    .gcd(&(a.remainder * b.modulus));
                Self::new(m, a.remainder.wrapping_mul(b.remainder))
            }
        }
    }

    fn div(a: Self, b: Self) -> Self {
        match b.as_constant() {
            Some(0) => Self::constant(0),
            Some(c) if a.modulus == 0 => Self::constant(a.remainder.wrapping_div_euclid(c)),
            Some(c) if c > 0 && a.modulus % c == 0 => {
                Self::new(a.modulus / c, a.remainder.wrapping_div_euclid(c))
            }
            _ => Self::unknown(),
        }
    }

    fn rem(a: Self, b: Self) -> Self {
        match b.as_constant() {
            Some(0) => Self::constant(0),
            Some(c) => Self::new(a.modulus.gcd(&c), a.remainder),
            None => Self::unknown(),
        }
    }

    /// The weakest summary covering both `a` and `b`.
    fn unify(a: Self, b: Self) -> Self {
        let m = a.modulus.gcd(&b.modulus).gcd(&(a.remainder - b.remainder));
        Self::new(m, a.remainder)
    }

    fn binary(op: BinOp, a: Self, b: Self) -> Self {
        match op {
            BinOp::Add => Self::add(a, b),
            BinOp::Sub => Self::sub(a, b),
            BinOp::Mul => Self::mul(a, b),
            BinOp::Div => Self::div(a, b),
            BinOp::Mod => Self::rem(a, b),
            BinOp::Min | BinOp::Max => Self::unify(a, b),
        }
    }
}

impl fmt::Display for ModulusRemainder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}k + {}", self.modulus, self.remainder)
    }
}

/// Analyze an integer-typed expression.
///
/// Returns an internal error for undefined or non-integer expressions.
pub fn modulus_remainder(e: &Expr) -> FlowResult<ModulusRemainder> {
    let ty = e
        .ty()
        .ok_or_else(|| internal_error("modulus_remainder of an undefined expression"))?;
    if !ty.is_integer() {
        return Err(internal_error(format!("modulus_remainder of non-integer expression {}", e)));
    }
    Ok(analyze_expr(e))
}

fn analyze_expr(e: &Expr) -> ModulusRemainder {
    let Some(kind) = e.kind() else {
        return ModulusRemainder::unknown();
    };
    match kind {
        ExprKind::IntImm(v) => ModulusRemainder::constant(*v),
        ExprKind::UIntImm(v) => i64::try_from(*v).map_or(ModulusRemainder::unknown(), ModulusRemainder::constant),
        ExprKind::Cast(a) if a.ty().map_or(false, |t| t.is_integer()) => analyze_expr(a),
        ExprKind::Binary(op, a, b) => ModulusRemainder::binary(*op, analyze_expr(a), analyze_expr(b)),
        ExprKind::Select(_, t, f) => ModulusRemainder::unify(analyze_expr(t), analyze_expr(f)),
        _ => ModulusRemainder::unknown(),
    }
}

/// Analyze a plan expression, with known facts about named variables.
pub fn modulus_remainder_plan(e: &PExpr, facts: &HashMap<String, ModulusRemainder>) -> ModulusRemainder {
    if !e.ty.is_integer() {
        return ModulusRemainder::unknown();
    }
    match &e.node {
        PNode::Const(Value::Int(v)) => ModulusRemainder::constant(*v),
        PNode::Const(Value::UInt(v)) => i64::try_from(*v).map_or(ModulusRemainder::unknown(), ModulusRemainder::constant),
        PNode::Var(name) => facts.get(name).copied().unwrap_or_else(ModulusRemainder::unknown),
        PNode::Cast(a) => modulus_remainder_plan(a, facts),
        PNode::Binary(op, a, b) => ModulusRemainder::binary(
            *op,
            modulus_remainder_plan(a, facts),
            modulus_remainder_plan(b, facts),
        ),
        PNode::Select(_, t, f) => {
            ModulusRemainder::unify(modulus_remainder_plan(t, facts), modulus_remainder_plan(f, facts))
        }
        PNode::Let { name, value, body } => {
            let mut inner = facts.clone();
            inner.insert(name.clone(), modulus_remainder_plan(value, facts));
            modulus_remainder_plan(body, &inner)
        }
        _ => ModulusRemainder::unknown(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Type;
    use crate::ir::var::Var;

    #[test]
    fn test_linear_forms() {
        let x = Var::new("x");
        let y = Var::new("y");
        assert_eq!(modulus_remainder(&(x * 4 + 6)).unwrap(), ModulusRemainder::new(4, 2));
        assert_eq!(modulus_remainder(&(x * 4 + y * 6)).unwrap(), ModulusRemainder::new(2, 0));
        assert_eq!(modulus_remainder(&((x * 8 + 3) / 2)).unwrap(), ModulusRemainder::new(4, 1));
        assert_eq!(modulus_remainder(&((x * 6 + 5) % 4)).unwrap(), ModulusRemainder::new(2, 1));
    }

    #[test]
    fn test_constants() {
        let e = Expr::from(3) * 4 - 2;
        assert_eq!(modulus_remainder(&e).unwrap().as_constant(), Some(10));
        assert!(ModulusRemainder::constant(12).is_multiple_of(4));
        assert!(!ModulusRemainder::new(4, 2).is_multiple_of(4));
    }

    #[test]
    fn test_constant_division_matches_evaluation() {
        let c = ModulusRemainder::constant;
        assert_eq!(ModulusRemainder::div(c(7), c(-2)), c(-3));
        assert_eq!(ModulusRemainder::div(c(-7), c(2)), c(-4));
        assert_eq!(ModulusRemainder::div(ModulusRemainder::new(6, 5), c(3)), ModulusRemainder::new(2, 1));
    }

    #[test]
    fn test_rejects_non_integer() {
        let e = Expr::from(1.5f32) + Var::new("x");
        assert!(modulus_remainder(&e).unwrap_err().is_internal());
        assert!(modulus_remainder(&Expr::undefined()).unwrap_err().is_internal());
    }

    #[test]
    fn test_plan_facts() {
        let mut facts = HashMap::new();
        facts.insert("n".to_string(), ModulusRemainder::new(8, 0));
        let e = PExpr::add(PExpr::int_var("n"), PExpr::int(4));
        assert_eq!(modulus_remainder_plan(&e, &facts), ModulusRemainder::new(8, 4));
        let f = PExpr::var("t", Type::float(32));
        assert_eq!(modulus_remainder_plan(&f, &facts), ModulusRemainder::unknown());
    }
}
