//! Symbolic interval analysis over the lowered plan.
//!
//! Intervals have plan expressions as endpoints, so a region can be
//! described in terms of values only known at run time (output extents,
//! parameter values). A missing endpoint means the expression is
//! unbounded in that direction.

use crate::ir::expr::{BinOp, MathFn};
use crate::ir::plan::{PExpr, PNode, Stmt};
use crate::ir::types::{Type, TypeCode, Value};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub min: Option<PExpr>,
    pub max: Option<PExpr>,
}

/// Intervals of the variables in scope.
pub type Scope = HashMap<String, Interval>;

const MAX_LET_BOUND_NODES: usize = 256;

impl Interval {
    pub fn new(min: PExpr, max: PExpr) -> Self {
        Self { min: Some(min), max: Some(max) }
    }

    pub fn point(e: PExpr) -> Self {
        Self { min: Some(e.clone()), max: Some(e) }
    }

    pub fn everything() -> Self {
        Self { min: None, max: None }
    }

    pub fn is_bounded(&self) -> bool {
        self.min.is_some() && self.max.is_some()
    }

    /// The smallest interval containing both.
    pub fn union(&self, other: &Interval) -> Interval {
        Interval {
            min: both(&self.min, &other.min, PExpr::min),
            max: both(&self.max, &other.max, PExpr::max),
        }
    }

    /// Extent of a bounded integer interval: `max - min + 1`.
    pub fn extent(&self) -> Option<PExpr> {
        match (&self.min, &self.max) {
            (Some(lo), Some(hi)) => Some(PExpr::add(PExpr::sub(hi.clone(), lo.clone()), PExpr::int(1))),
            _ => None,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = |e: &Option<PExpr>, inf: &str| e.as_ref().map_or(inf.to_string(), |e| e.to_string());
        write!(f, "[{}, {}]", end(&self.min, "-inf"), end(&self.max, "+inf"))
    }
}

fn both(a: &Option<PExpr>, b: &Option<PExpr>, f: fn(PExpr, PExpr) -> PExpr) -> Option<PExpr> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a.clone(), b.clone())),
        _ => None,
    }
}

/// `min(a, b)` bounded above by whichever operand is bounded above.
fn either(a: &Option<PExpr>, b: &Option<PExpr>, f: fn(PExpr, PExpr) -> PExpr) -> Option<PExpr> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a.clone(), b.clone())),
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    }
}

fn constant(ty: Type, v: Value) -> PExpr {
    PExpr::constant(ty, v)
}

/// The full range of small integer and boolean types.
fn type_bounds(ty: Type) -> Option<Interval> {
    match ty.code {
        TypeCode::Bool => Some(Interval::new(PExpr::boolean(false), PExpr::boolean(true))),
        TypeCode::Int if ty.bits <= 16 => {
            let half = 1i64 << (ty.bits - 1);
            Some(Interval::new(constant(ty, Value::Int(-half)), constant(ty, Value::Int(half - 1))))
        }
        TypeCode::UInt if ty.bits <= 16 => Some(Interval::new(
            constant(ty, Value::UInt(0)),
            constant(ty, Value::UInt((1u64 << ty.bits) - 1)),
        )),
        _ => None,
    }
}

fn sign_of(e: &PExpr) -> Option<f64> {
    e.as_const().map(|v| v.as_f64())
}

fn scale(a: &Interval, c: &PExpr, op: BinOp) -> Interval {
    let apply = |e: &Option<PExpr>| e.as_ref().map(|e| PExpr::binary(op, e.clone(), c.clone()));
    match sign_of(c) {
        Some(s) if s < 0.0 => Interval { min: apply(&a.max), max: apply(&a.min) },
        _ => Interval { min: apply(&a.min), max: apply(&a.max) },
    }
}

fn bounds_of_binary(op: BinOp, ty: Type, a: &Interval, b: &Interval) -> Interval {
    match op {
        BinOp::Add => Interval { min: both(&a.min, &b.min, PExpr::add), max: both(&a.max, &b.max, PExpr::add) },
        BinOp::Sub => Interval { min: both(&a.min, &b.max, PExpr::sub), max: both(&a.max, &b.min, PExpr::sub) },
        BinOp::Min => Interval { min: both(&a.min, &b.min, PExpr::min), max: either(&a.max, &b.max, PExpr::min) },
        BinOp::Max => Interval { min: either(&a.min, &b.min, PExpr::max), max: both(&a.max, &b.max, PExpr::max) },
        BinOp::Mul => {
            if let Some(c) = constant_point(b) {
                return scale(a, &c, BinOp::Mul);
            }
            if let Some(c) = constant_point(a) {
                return scale(b, &c, BinOp::Mul);
            }
            match (&a.min, &a.max, &b.min, &b.max) {
                (Some(a0), Some(a1), Some(b0), Some(b1)) => {
                    let corners = [
                        PExpr::mul(a0.clone(), b0.clone()),
                        PExpr::mul(a0.clone(), b1.clone()),
                        PExpr::mul(a1.clone(), b0.clone()),
                        PExpr::mul(a1.clone(), b1.clone()),
                    ];
                    let lo = corners.iter().cloned().reduce(PExpr::min);
                    let hi = corners.iter().cloned().reduce(PExpr::max);
                    Interval { min: lo, max: hi }
                }
                _ => Interval::everything(),
            }
        }
        BinOp::Div => match constant_point(b) {
            Some(c) if sign_of(&c) == Some(0.0) => Interval::point(constant(ty, ty.zero())),
            Some(c) => scale(a, &c, BinOp::Div),
            None => Interval::everything(),
        },
        BinOp::Mod => {
            if !ty.is_integer() {
                return Interval::everything();
            }
            let zero = constant(ty, ty.zero());
            let one = constant(ty, Value::Int(1));
            match (&b.min, &b.max) {
                (Some(lo), Some(hi)) => {
                    let magnitude = PExpr::max(hi.clone(), PExpr::sub(zero.clone(), lo.clone()));
                    Interval::new(zero, PExpr::sub(magnitude, one))
                }
                _ => Interval::everything(),
            }
        }
    }
}

fn constant_point(i: &Interval) -> Option<PExpr> {
    match (&i.min, &i.max) {
        (Some(lo), Some(hi)) if lo == hi && lo.is_const() => Some(lo.clone()),
        _ => None,
    }
}

/// Bounds of `e` given the intervals of the variables in `scope`.
/// Variables not in scope are treated as fixed symbols.
pub fn bounds_of(e: &PExpr, scope: &Scope) -> Interval {
    match &e.node {
        PNode::Const(_) => Interval::point(e.clone()),
        PNode::Var(name) => scope.get(name).cloned().unwrap_or_else(|| Interval::point(e.clone())),
        PNode::Cast(a) => {
            let from = a.ty;
            let narrowing = e.ty.is_integer() && from.is_integer() && e.ty.bits < from.bits;
            if narrowing || e.ty.is_bool() {
                return type_bounds(e.ty).unwrap_or_else(Interval::everything);
            }
            let inner = bounds_of(a, scope);
            Interval {
                min: inner.min.map(|m| PExpr::cast(e.ty, m)),
                max: inner.max.map(|m| PExpr::cast(e.ty, m)),
            }
        }
        PNode::Binary(op, a, b) => bounds_of_binary(*op, e.ty, &bounds_of(a, scope), &bounds_of(b, scope)),
        PNode::Compare(..) | PNode::And(..) | PNode::Or(..) | PNode::Not(_) => {
            Interval::new(PExpr::boolean(false), PExpr::boolean(true))
        }
        PNode::Select(_, t, f) => bounds_of(t, scope).union(&bounds_of(f, scope)),
        PNode::Math(func, args) => {
            let a = match args.first() {
                Some(a) => bounds_of(a, scope),
                None => return Interval::everything(),
            };
            match func {
                MathFn::Floor | MathFn::Ceil | MathFn::Round | MathFn::Sqrt | MathFn::Exp | MathFn::Log => Interval {
                    min: a.min.map(|m| PExpr::math(*func, e.ty, vec![m])),
                    max: a.max.map(|m| PExpr::math(*func, e.ty, vec![m])),
                },
                MathFn::Sin | MathFn::Cos => {
                    Interval::new(constant(e.ty, Value::Float(-1.0)), constant(e.ty, Value::Float(1.0)))
                }
                MathFn::Abs => match (a.min, a.max) {
                    (Some(lo), Some(hi)) => Interval::new(
                        constant(e.ty, e.ty.zero()),
                        PExpr::max(PExpr::math(MathFn::Abs, e.ty, vec![lo]), PExpr::math(MathFn::Abs, e.ty, vec![hi])),
                    ),
                    _ => Interval { min: Some(constant(e.ty, e.ty.zero())), max: None },
                },
                MathFn::Pow => Interval::everything(),
            }
        }
        PNode::Load { .. } => type_bounds(e.ty).unwrap_or_else(Interval::everything),
        PNode::Let { name, value, body } => {
            let mut inner = scope.clone();
            inner.insert(name.clone(), let_bounds(value, scope));
            bounds_of(body, &inner)
        }
    }
}

/// Bounds of a let-bound value. Chains of lets that each use the
/// previous one several times would otherwise double the interval
/// expressions at every link, so oversized ones are dropped.
fn let_bounds(value: &PExpr, scope: &Scope) -> Interval {
    let bounds = bounds_of(value, scope);
    let small = |e: &Option<PExpr>| e.as_ref().map_or(true, |e| e.node_count() <= MAX_LET_BOUND_NODES);
    if small(&bounds.min) && small(&bounds.max) {
        bounds
    } else {
        Interval::everything()
    }
}

/// Which accesses count toward a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accesses {
    Loads,
    LoadsAndStores,
}

struct RegionCollector<'a> {
    buffers: &'a [String],
    accesses: Accesses,
    region: Option<Vec<Interval>>,
}

impl RegionCollector<'_> {
    fn touch(&mut self, args: &[PExpr], scope: &Scope) {
        let dims: Vec<Interval> = args.iter().map(|a| bounds_of(a, scope)).collect();
        self.region = Some(match self.region.take() {
            None => dims,
            Some(prev) => prev.iter().zip(&dims).map(|(a, b)| a.union(b)).collect(),
        });
    }

    fn expr(&mut self, e: &PExpr, scope: &Scope) {
        match &e.node {
            PNode::Let { name, value, body } => {
                self.expr(value, scope);
                let mut inner = scope.clone();
                inner.insert(name.clone(), let_bounds(value, scope));
                self.expr(body, &inner);
            }
            PNode::Load { buffer, args } => {
                if self.buffers.contains(buffer) {
                    self.touch(args, scope);
                }
                for a in args {
                    self.expr(a, scope);
                }
            }
            PNode::Const(_) | PNode::Var(_) => {}
            PNode::Cast(a) | PNode::Not(a) => self.expr(a, scope),
            PNode::Binary(_, a, b) | PNode::Compare(_, a, b) | PNode::And(a, b) | PNode::Or(a, b) => {
                self.expr(a, scope);
                self.expr(b, scope);
            }
            PNode::Select(c, t, f) => {
                self.expr(c, scope);
                self.expr(t, scope);
                self.expr(f, scope);
            }
            PNode::Math(_, args) => {
                for a in args {
                    self.expr(a, scope);
                }
            }
        }
    }

    fn stmt(&mut self, s: &Stmt, scope: &Scope) {
        match s {
            Stmt::For { name, min, extent, body, .. } => {
                self.expr(min, scope);
                self.expr(extent, scope);
                let last = PExpr::sub(PExpr::add(min.clone(), extent.clone()), PExpr::int(1));
                let range = Interval { min: bounds_of(min, scope).min, max: bounds_of(&last, scope).max };
                let mut inner = scope.clone();
                inner.insert(name.clone(), range);
                self.stmt(body, &inner);
            }
            Stmt::LetStmt { name, value, body } => {
                self.expr(value, scope);
                let mut inner = scope.clone();
                inner.insert(name.clone(), bounds_of(value, scope));
                self.stmt(body, &inner);
            }
            Stmt::Store { buffer, args, value, .. } => {
                for a in args {
                    self.expr(a, scope);
                }
                self.expr(value, scope);
                if self.accesses == Accesses::LoadsAndStores && self.buffers.contains(buffer) {
                    self.touch(args, scope);
                }
            }
            Stmt::Realize { bounds, body, .. } => {
                for (lo, extent) in bounds {
                    self.expr(lo, scope);
                    self.expr(extent, scope);
                }
                self.stmt(body, scope);
            }
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.stmt(s, scope);
                }
            }
            Stmt::IfThenElse { condition, then_case } => {
                self.expr(condition, scope);
                self.stmt(then_case, scope);
            }
            Stmt::Assert { condition, values, .. } => {
                self.expr(condition, scope);
                for v in values {
                    self.expr(v, scope);
                }
            }
        }
    }
}

/// The region of `buffers` that `stmt` reads, one interval per
/// dimension, or `None` if it never reads them.
pub fn region_required(stmt: &Stmt, buffers: &[String], scope: &Scope) -> Option<Vec<Interval>> {
    let mut collector = RegionCollector { buffers, accesses: Accesses::Loads, region: None };
    collector.stmt(stmt, scope);
    collector.region
}

/// Like `region_required`, counting stores as well as loads.
pub fn region_accessed(stmt: &Stmt, buffers: &[String], scope: &Scope) -> Option<Vec<Interval>> {
    let mut collector = RegionCollector { buffers, accesses: Accesses::LoadsAndStores, region: None };
    collector.stmt(stmt, scope);
    collector.region
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::plan::ForKind;

    fn v(name: &str) -> PExpr {
        PExpr::int_var(name)
    }

    #[test]
    fn test_linear_bounds() {
        let mut scope = Scope::new();
        scope.insert("x".into(), Interval::new(PExpr::int(0), PExpr::int(9)));
        let e = PExpr::add(PExpr::mul(v("x"), PExpr::int(2)), PExpr::int(1));
        let b = bounds_of(&e, &scope);
        assert_eq!(b.min.and_then(|m| m.as_int()), Some(1));
        assert_eq!(b.max.and_then(|m| m.as_int()), Some(19));

        let neg = PExpr::mul(v("x"), PExpr::int(-1));
        let b = bounds_of(&neg, &scope);
        assert_eq!(b.min.and_then(|m| m.as_int()), Some(-9));
    }

    #[test]
    fn test_clamped_load_is_bounded() {
        let load = PExpr::load("lut", Type::int(32), vec![v("x")]);
        assert!(!bounds_of(&load, &Scope::new()).is_bounded());
        let clamped = PExpr::max(PExpr::min(load, PExpr::int(255)), PExpr::int(0));
        let b = bounds_of(&clamped, &Scope::new());
        assert_eq!(b.min.and_then(|m| m.as_int()), Some(0));
        assert_eq!(b.max.and_then(|m| m.as_int()), Some(255));

        let byte = PExpr::cast(Type::int(32), PExpr::load("img", Type::uint(8), vec![v("x")]));
        assert_eq!(bounds_of(&byte, &Scope::new()).max.and_then(|m| m.as_int()), Some(255));
    }

    #[test]
    fn test_region_of_stencil() {
        let body = Stmt::Store {
            buffer: "out".into(),
            args: vec![v("x")],
            value: PExpr::add(
                PExpr::load("in", Type::int(32), vec![PExpr::sub(v("x"), PExpr::int(1))]),
                PExpr::load("in", Type::int(32), vec![PExpr::add(v("x"), PExpr::int(1))]),
            ),
            trace: false,
        };
        let nest = Stmt::For {
            name: "x".into(),
            min: v("out.min.0"),
            extent: v("out.extent.0"),
            kind: ForKind::Serial,
            body: Box::new(body),
        };
        let region = region_required(&nest, &["in".to_string()], &Scope::new()).unwrap();
        assert_eq!(region.len(), 1);
        assert!(region[0].is_bounded());
        assert_eq!(region[0].min.as_ref().map(|m| m.to_string()).as_deref(), Some("(out.min.0 - 1)"));

        assert!(region_required(&nest, &["other".to_string()], &Scope::new()).is_none());
        let written = region_accessed(&nest, &["out".to_string()], &Scope::new()).unwrap();
        assert!(written[0].is_bounded());
    }
}
