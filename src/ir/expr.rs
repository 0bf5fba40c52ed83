//! Scalar expressions in the embedded language.
//!
//! An `Expr` is an immutable, reference-counted tree (in practice a DAG,
//! since subexpressions are shared freely). The default `Expr` is the
//! undefined sentinel. Arithmetic operators never fail: an undefined
//! operand makes the result undefined, and the error surfaces when the
//! Expr reaches a definition. The fallible constructors (`Expr::binary`
//! and friends) report the same situation as an internal error.

use crate::func::{Func, FuncPtr, FuncRef};
use crate::ir::ops::eval_cast;
use crate::ir::param::{ImageParam, Param};
use crate::ir::types::{Type, Value};
use crate::ir::var::{RDom, RVar, Var};
use crate::utils::errors::{internal_error, FlowResult};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Not, Rem, Sub};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Min,
    Max,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Min => "min",
            BinOp::Max => "max",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Floating-point intrinsics (plus `Abs`, which keeps integer types).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MathFn {
    Sqrt,
    Exp,
    Log,
    Pow,
    Sin,
    Cos,
    Floor,
    Ceil,
    Round,
    Abs,
}

impl MathFn {
    pub fn name(&self) -> &'static str {
        match self {
            MathFn::Sqrt => "sqrt",
            MathFn::Exp => "exp",
            MathFn::Log => "log",
            MathFn::Pow => "pow",
            MathFn::Sin => "sin",
            MathFn::Cos => "cos",
            MathFn::Floor => "floor",
            MathFn::Ceil => "ceil",
            MathFn::Round => "round",
            MathFn::Abs => "abs",
        }
    }
}

/// A read of one output of a Func.
#[derive(Clone)]
pub struct Call {
    pub(crate) target: FuncPtr,
    pub(crate) func_id: u64,
    pub(crate) name: String,
    pub(crate) args: Vec<Expr>,
    pub(crate) value_index: usize,
    /// Whether the caller selected a tuple element explicitly.
    pub(crate) explicit_index: bool,
}

impl Call {
    pub fn func(&self) -> Option<Func> {
        self.target.upgrade()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Expr] {
        &self.args
    }

    pub fn value_index(&self) -> usize {
        self.value_index
    }
}

#[derive(Clone)]
pub enum ExprKind {
    IntImm(i64),
    UIntImm(u64),
    FloatImm(f64),
    BoolImm(bool),
    Var(Var),
    RVar(RVar),
    Param(Param),
    Cast(Expr),
    Binary(BinOp, Expr, Expr),
    Compare(CmpOp, Expr, Expr),
    And(Expr, Expr),
    Or(Expr, Expr),
    Not(Expr),
    Select(Expr, Expr, Expr),
    Math(MathFn, Vec<Expr>),
    Call(Call),
    ImageLoad { image: ImageParam, args: Vec<Expr> },
    /// `min` selects the minimum coordinate instead of the extent.
    ImageExtent { image: ImageParam, dim: usize, min: bool },
}

impl ExprKind {
    pub(crate) fn children(&self) -> Vec<&Expr> {
        match self {
            ExprKind::IntImm(_)
            | ExprKind::UIntImm(_)
            | ExprKind::FloatImm(_)
            | ExprKind::BoolImm(_)
            | ExprKind::Var(_)
            | ExprKind::RVar(_)
            | ExprKind::Param(_)
            | ExprKind::ImageExtent { .. } => Vec::new(),
            ExprKind::Cast(a) | ExprKind::Not(a) => vec![a],
            ExprKind::Binary(_, a, b)
            | ExprKind::Compare(_, a, b)
            | ExprKind::And(a, b)
            | ExprKind::Or(a, b) => vec![a, b],
            ExprKind::Select(c, t, f) => vec![c, t, f],
            ExprKind::Math(_, args) => args.iter().collect(),
            ExprKind::Call(call) => call.args.iter().collect(),
            ExprKind::ImageLoad { args, .. } => args.iter().collect(),
        }
    }

    /// Same node shape with the children replaced, in `children()` order.
    fn rebuild(&self, children: Vec<Expr>) -> ExprKind {
        let mut it = children.into_iter();
        let mut next = move || it.next().unwrap_or_default();
        match self {
            ExprKind::Cast(_) => ExprKind::Cast(next()),
            ExprKind::Not(_) => ExprKind::Not(next()),
            ExprKind::Binary(op, _, _) => ExprKind::Binary(*op, next(), next()),
            ExprKind::Compare(op, _, _) => ExprKind::Compare(*op, next(), next()),
            ExprKind::And(_, _) => ExprKind::And(next(), next()),
            ExprKind::Or(_, _) => ExprKind::Or(next(), next()),
            ExprKind::Select(_, _, _) => ExprKind::Select(next(), next(), next()),
            ExprKind::Math(f, args) => ExprKind::Math(*f, args.iter().map(|_| next()).collect()),
            ExprKind::Call(call) => {
                let mut call = call.clone();
                call.args = call.args.iter().map(|_| next()).collect();
                ExprKind::Call(call)
            }
            ExprKind::ImageLoad { image, args } => ExprKind::ImageLoad {
                image: image.clone(),
                args: args.iter().map(|_| next()).collect(),
            },
            leaf => leaf.clone(),
        }
    }
}

pub struct ExprNode {
    pub ty: Type,
    pub kind: ExprKind,
}

/// A typed scalar expression, or the undefined sentinel.
#[derive(Clone, Default)]
pub struct Expr(Option<Rc<ExprNode>>);

impl Expr {
    pub(crate) fn new(ty: Type, kind: ExprKind) -> Self {
        Expr(Some(Rc::new(ExprNode { ty, kind })))
    }

    pub fn undefined() -> Self {
        Expr(None)
    }

    pub fn defined(&self) -> bool {
        self.0.is_some()
    }

    pub fn ty(&self) -> Option<Type> {
        self.0.as_ref().map(|n| n.ty)
    }

    pub fn kind(&self) -> Option<&ExprKind> {
        self.0.as_ref().map(|n| &n.kind)
    }

    pub(crate) fn node_ptr(&self) -> *const ExprNode {
        match &self.0 {
            Some(n) => Rc::as_ptr(n),
            None => std::ptr::null(),
        }
    }

    /// Pointer identity.
    pub fn same_as(&self, other: &Expr) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// A constant of the given type.
    pub fn constant(ty: Type, value: Value) -> Self {
        let kind = match ty.normalize(value) {
            Value::Int(v) => ExprKind::IntImm(v),
            Value::UInt(v) => ExprKind::UIntImm(v),
            Value::Float(v) => ExprKind::FloatImm(v),
            Value::Bool(v) => ExprKind::BoolImm(v),
        };
        Expr::new(ty, kind)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.kind()? {
            ExprKind::IntImm(v) => Some(*v),
            ExprKind::UIntImm(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.kind()? {
            ExprKind::FloatImm(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<Value> {
        match self.kind()? {
            ExprKind::IntImm(v) => Some(Value::Int(*v)),
            ExprKind::UIntImm(v) => Some(Value::UInt(*v)),
            ExprKind::FloatImm(v) => Some(Value::Float(*v)),
            ExprKind::BoolImm(v) => Some(Value::Bool(*v)),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        self.as_value().is_some()
    }

    pub fn as_var(&self) -> Option<Var> {
        match self.kind()? {
            ExprKind::Var(v) => Some(*v),
            _ => None,
        }
    }

    fn require_defined(&self, what: &str) -> FlowResult<Type> {
        self.ty().ok_or_else(|| internal_error(format!("{} built on an undefined operand", what)))
    }

    pub fn cast(ty: Type, e: Expr) -> FlowResult<Expr> {
        let from = e.require_defined("cast")?;
        if from == ty {
            return Ok(e);
        }
        if let Some(v) = e.as_value() {
            return Ok(Expr::constant(ty, eval_cast(ty, v)));
        }
        Ok(Expr::new(ty, ExprKind::Cast(e)))
    }

    pub fn binary(op: BinOp, a: Expr, b: Expr) -> FlowResult<Expr> {
        let what = format!("binary operator {}", op.symbol());
        a.require_defined(&what)?;
        b.require_defined(&what)?;
        let (a, b) = match_types(a, b)?;
        let ty = a.ty().unwrap_or(Type::int(32));
        Ok(Expr::new(ty, ExprKind::Binary(op, a, b)))
    }

    pub fn compare(op: CmpOp, a: Expr, b: Expr) -> FlowResult<Expr> {
        let what = format!("comparison {}", op.symbol());
        a.require_defined(&what)?;
        b.require_defined(&what)?;
        let (a, b) = match_types(a, b)?;
        Ok(Expr::new(Type::bool(), ExprKind::Compare(op, a, b)))
    }

    pub fn and(a: Expr, b: Expr) -> FlowResult<Expr> {
        let a = to_bool(a, "logical and")?;
        let b = to_bool(b, "logical and")?;
        Ok(Expr::new(Type::bool(), ExprKind::And(a, b)))
    }

    pub fn or(a: Expr, b: Expr) -> FlowResult<Expr> {
        let a = to_bool(a, "logical or")?;
        let b = to_bool(b, "logical or")?;
        Ok(Expr::new(Type::bool(), ExprKind::Or(a, b)))
    }

    pub fn not(a: Expr) -> FlowResult<Expr> {
        let a = to_bool(a, "logical not")?;
        Ok(Expr::new(Type::bool(), ExprKind::Not(a)))
    }

    pub fn select(cond: Expr, t: Expr, f: Expr) -> FlowResult<Expr> {
        let cond = to_bool(cond, "select")?;
        t.require_defined("select")?;
        f.require_defined("select")?;
        let (t, f) = match_types(t, f)?;
        let ty = t.ty().unwrap_or(Type::int(32));
        Ok(Expr::new(ty, ExprKind::Select(cond, t, f)))
    }

    pub fn math(func: MathFn, args: Vec<Expr>) -> FlowResult<Expr> {
        for a in &args {
            a.require_defined(func.name())?;
        }
        if func == MathFn::Abs {
            let a = args.into_iter().next().ok_or_else(|| internal_error("abs takes one argument"))?;
            let ty = a.require_defined("abs")?;
            return Ok(Expr::new(ty, ExprKind::Math(func, vec![a])));
        }
        // Everything else computes in floating point; pow coerces its pair.
        let args = match (func, args.as_slice()) {
            (MathFn::Pow, [a, b]) => {
                let (a, b) = match_types(a.clone(), b.clone())?;
                vec![a, b]
            }
            (MathFn::Pow, _) => return Err(internal_error("pow takes two arguments")),
            (_, [a]) => vec![a.clone()],
            _ => return Err(internal_error(format!("{} takes one argument", func.name()))),
        };
        let ty = match args[0].ty() {
            Some(t) if t.is_float() => t,
            _ => Type::float(32),
        };
        let args = args.into_iter().map(|a| Expr::cast(ty, a)).collect::<FlowResult<Vec<_>>>()?;
        Ok(Expr::new(ty, ExprKind::Math(func, args)))
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Expr {
        Expr::compare(CmpOp::Lt, self, rhs.into()).unwrap_or_default()
    }

    pub fn le(self, rhs: impl Into<Expr>) -> Expr {
        Expr::compare(CmpOp::Le, self, rhs.into()).unwrap_or_default()
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Expr {
        Expr::compare(CmpOp::Gt, self, rhs.into()).unwrap_or_default()
    }

    pub fn ge(self, rhs: impl Into<Expr>) -> Expr {
        Expr::compare(CmpOp::Ge, self, rhs.into()).unwrap_or_default()
    }

    pub fn equal(self, rhs: impl Into<Expr>) -> Expr {
        Expr::compare(CmpOp::Eq, self, rhs.into()).unwrap_or_default()
    }

    pub fn not_equal(self, rhs: impl Into<Expr>) -> Expr {
        Expr::compare(CmpOp::Ne, self, rhs.into()).unwrap_or_default()
    }

    pub fn and_also(self, rhs: impl Into<Expr>) -> Expr {
        Expr::and(self, rhs.into()).unwrap_or_default()
    }

    pub fn or_else(self, rhs: impl Into<Expr>) -> Expr {
        Expr::or(self, rhs.into()).unwrap_or_default()
    }

    /// Visit every distinct node once, parents before children.
    ///
    /// The callback returns whether to descend into the node's children.
    pub(crate) fn visit(&self, f: &mut dyn FnMut(&Expr) -> bool) {
        let mut seen = HashSet::new();
        self.visit_inner(f, &mut seen);
    }

    fn visit_inner(&self, f: &mut dyn FnMut(&Expr) -> bool, seen: &mut HashSet<*const ExprNode>) {
        let node = match &self.0 {
            Some(n) => n,
            None => return,
        };
        if !seen.insert(Rc::as_ptr(node)) {
            return;
        }
        if f(self) {
            for child in node.kind.children() {
                child.visit_inner(f, seen);
            }
        }
    }

    /// Rebuild the Expr bottom-up. Nodes for which `f` returns a
    /// replacement are swapped out; untouched subtrees are shared.
    pub(crate) fn rewrite(&self, f: &mut dyn FnMut(&Expr) -> Option<Expr>) -> Expr {
        let mut memo = HashMap::new();
        self.rewrite_inner(f, &mut memo)
    }

    fn rewrite_inner(
        &self,
        f: &mut dyn FnMut(&Expr) -> Option<Expr>,
        memo: &mut HashMap<*const ExprNode, Expr>,
    ) -> Expr {
        let node = match &self.0 {
            Some(n) => n,
            None => return Expr::undefined(),
        };
        if let Some(done) = memo.get(&Rc::as_ptr(node)) {
            return done.clone();
        }
        let result = match f(self) {
            Some(replacement) => replacement,
            None => {
                let old = node.kind.children();
                let new: Vec<Expr> = old.iter().map(|c| c.rewrite_inner(f, memo)).collect();
                if old.iter().zip(&new).all(|(a, b)| a.same_as(b)) {
                    self.clone()
                } else {
                    Expr::new(node.ty, node.kind.rebuild(new))
                }
            }
        };
        memo.insert(Rc::as_ptr(node), result.clone());
        result
    }

    /// Pure Vars referenced by this Expr, in order of first appearance.
    pub fn free_vars(&self) -> Vec<Var> {
        let mut vars = Vec::new();
        self.visit(&mut |e| {
            if let Some(ExprKind::Var(v)) = e.kind() {
                if !vars.contains(v) {
                    vars.push(*v);
                }
            }
            true
        });
        vars
    }

    /// Reduction variables referenced by this Expr, in order of first appearance.
    pub fn reduction_vars(&self) -> Vec<RVar> {
        let mut rvars: Vec<RVar> = Vec::new();
        self.visit(&mut |e| {
            if let Some(ExprKind::RVar(r)) = e.kind() {
                if !rvars.contains(r) {
                    rvars.push(r.clone());
                }
            }
            true
        });
        rvars
    }

    /// Calls to Funcs made anywhere in this Expr.
    pub(crate) fn calls(&self) -> Vec<Call> {
        let mut calls = Vec::new();
        self.visit(&mut |e| {
            if let Some(ExprKind::Call(c)) = e.kind() {
                calls.push(c.clone());
            }
            true
        });
        calls
    }
}

fn to_bool(e: Expr, what: &str) -> FlowResult<Expr> {
    let ty = e.require_defined(what)?;
    if ty.is_bool() {
        return Ok(e);
    }
    let zero = Expr::constant(ty, ty.zero());
    Ok(Expr::new(Type::bool(), ExprKind::Compare(CmpOp::Ne, e, zero)))
}

fn const_adopts(c: &Expr, other: Type) -> bool {
    match c.kind() {
        Some(ExprKind::IntImm(_)) | Some(ExprKind::UIntImm(_)) => !other.is_bool(),
        Some(ExprKind::FloatImm(_)) => other.is_float(),
        _ => false,
    }
}

/// Coerce two operands to a common type.
///
/// A constant adopts the type of a non-constant partner when it can; an
/// integer mixed with a float becomes that float; otherwise the narrower
/// operand widens to the wider one.
pub(crate) fn match_types(a: Expr, b: Expr) -> FlowResult<(Expr, Expr)> {
    let ta = a.require_defined("type coercion")?;
    let tb = b.require_defined("type coercion")?;
    if ta == tb {
        return Ok((a, b));
    }
    if a.is_const() && !b.is_const() && const_adopts(&a, tb) {
        return Ok((Expr::cast(tb, a)?, b));
    }
    if b.is_const() && !a.is_const() && const_adopts(&b, ta) {
        return Ok((a, Expr::cast(ta, b)?));
    }
    let target = if ta.is_float() || tb.is_float() {
        match (ta.is_float(), tb.is_float()) {
            (true, true) => Type::float(ta.bits.max(tb.bits)),
            (true, false) => ta,
            _ => tb,
        }
    } else if ta.is_bool() {
        tb
    } else if tb.is_bool() {
        ta
    } else {
        let bits = ta.bits.max(tb.bits);
        if ta.is_int() || tb.is_int() {
            Type::int(bits)
        } else {
            Type::uint(bits)
        }
    };
    Ok((Expr::cast(target, a)?, Expr::cast(target, b)?))
}

impl From<i32> for Expr {
    fn from(v: i32) -> Expr {
        Expr::new(Type::int(32), ExprKind::IntImm(v as i64))
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Expr {
        Expr::new(Type::int(64), ExprKind::IntImm(v))
    }
}

impl From<u8> for Expr {
    fn from(v: u8) -> Expr {
        Expr::new(Type::uint(8), ExprKind::UIntImm(v as u64))
    }
}

impl From<u16> for Expr {
    fn from(v: u16) -> Expr {
        Expr::new(Type::uint(16), ExprKind::UIntImm(v as u64))
    }
}

impl From<u32> for Expr {
    fn from(v: u32) -> Expr {
        Expr::new(Type::uint(32), ExprKind::UIntImm(v as u64))
    }
}

impl From<f32> for Expr {
    fn from(v: f32) -> Expr {
        Expr::new(Type::float(32), ExprKind::FloatImm(v as f64))
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Expr {
        Expr::new(Type::float(64), ExprKind::FloatImm(v))
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Expr {
        Expr::new(Type::bool(), ExprKind::BoolImm(v))
    }
}

impl From<Var> for Expr {
    fn from(v: Var) -> Expr {
        Expr::new(Type::int(32), ExprKind::Var(v))
    }
}

impl From<&Var> for Expr {
    fn from(v: &Var) -> Expr {
        Expr::from(*v)
    }
}

impl From<RVar> for Expr {
    fn from(r: RVar) -> Expr {
        Expr::new(Type::int(32), ExprKind::RVar(r))
    }
}

impl From<&RVar> for Expr {
    fn from(r: &RVar) -> Expr {
        Expr::from(r.clone())
    }
}

/// A one-dimensional `RDom` stands for its only variable.
impl From<&RDom> for Expr {
    fn from(r: &RDom) -> Expr {
        Expr::from(r.x())
    }
}

impl From<RDom> for Expr {
    fn from(r: RDom) -> Expr {
        Expr::from(r.x())
    }
}

impl From<&Expr> for Expr {
    fn from(e: &Expr) -> Expr {
        e.clone()
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expr>> $trait<T> for Expr {
            type Output = Expr;
            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self, rhs.into()).unwrap_or_default()
            }
        }

        impl<T: Into<Expr>> $trait<T> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self.clone(), rhs.into()).unwrap_or_default()
            }
        }

        impl<T: Into<Expr>> $trait<T> for Var {
            type Output = Expr;
            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, Expr::from(self), rhs.into()).unwrap_or_default()
            }
        }

        impl<T: Into<Expr>> $trait<T> for RVar {
            type Output = Expr;
            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, Expr::from(self), rhs.into()).unwrap_or_default()
            }
        }

        impl<T: Into<Expr>> $trait<T> for &Param {
            type Output = Expr;
            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, Expr::from(self), rhs.into()).unwrap_or_default()
            }
        }

        impl<T: Into<Expr>> $trait<T> for FuncRef {
            type Output = Expr;
            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self.read(), rhs.into()).unwrap_or_default()
            }
        }

        impl_binary_op!(@literal $trait, $method, $op, i32, f32, f64);
    };
    (@literal $trait:ident, $method:ident, $op:expr, $($lit:ty),*) => {
        $(
            impl $trait<Expr> for $lit {
                type Output = Expr;
                fn $method(self, rhs: Expr) -> Expr {
                    Expr::binary($op, Expr::from(self), rhs).unwrap_or_default()
                }
            }

            impl $trait<&Expr> for $lit {
                type Output = Expr;
                fn $method(self, rhs: &Expr) -> Expr {
                    Expr::binary($op, Expr::from(self), rhs.clone()).unwrap_or_default()
                }
            }

            impl $trait<Var> for $lit {
                type Output = Expr;
                fn $method(self, rhs: Var) -> Expr {
                    Expr::binary($op, Expr::from(self), Expr::from(rhs)).unwrap_or_default()
                }
            }

            impl $trait<RVar> for $lit {
                type Output = Expr;
                fn $method(self, rhs: RVar) -> Expr {
                    Expr::binary($op, Expr::from(self), Expr::from(rhs)).unwrap_or_default()
                }
            }

            impl $trait<FuncRef> for $lit {
                type Output = Expr;
                fn $method(self, rhs: FuncRef) -> Expr {
                    Expr::binary($op, Expr::from(self), rhs.read()).unwrap_or_default()
                }
            }
        )*
    };
}

impl_binary_op!(Add, add, BinOp::Add);
impl_binary_op!(Sub, sub, BinOp::Sub);
impl_binary_op!(Mul, mul, BinOp::Mul);
impl_binary_op!(Div, div, BinOp::Div);
impl_binary_op!(Rem, rem, BinOp::Mod);

impl Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        match self.ty() {
            Some(ty) => {
                let zero = Expr::constant(ty, ty.zero());
                Expr::binary(BinOp::Sub, zero, self).unwrap_or_default()
            }
            None => Expr::undefined(),
        }
    }
}

impl Neg for Var {
    type Output = Expr;
    fn neg(self) -> Expr {
        -Expr::from(self)
    }
}

impl Not for Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        Expr::not(self).unwrap_or_default()
    }
}

pub fn select(cond: impl Into<Expr>, t: impl Into<Expr>, f: impl Into<Expr>) -> Expr {
    Expr::select(cond.into(), t.into(), f.into()).unwrap_or_default()
}

pub fn min(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::binary(BinOp::Min, a.into(), b.into()).unwrap_or_default()
}

pub fn max(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::binary(BinOp::Max, a.into(), b.into()).unwrap_or_default()
}

/// `min(max(e, lo), hi)`
pub fn clamp(e: impl Into<Expr>, lo: impl Into<Expr>, hi: impl Into<Expr>) -> Expr {
    min(max(e, lo), hi)
}

pub fn cast(ty: Type, e: impl Into<Expr>) -> Expr {
    Expr::cast(ty, e.into()).unwrap_or_default()
}

pub fn abs(e: impl Into<Expr>) -> Expr {
    Expr::math(MathFn::Abs, vec![e.into()]).unwrap_or_default()
}

pub fn pow(a: impl Into<Expr>, b: impl Into<Expr>) -> Expr {
    Expr::math(MathFn::Pow, vec![a.into(), b.into()]).unwrap_or_default()
}

macro_rules! unary_math {
    ($($name:ident => $f:expr),*) => {
        $(
            pub fn $name(e: impl Into<Expr>) -> Expr {
                Expr::math($f, vec![e.into()]).unwrap_or_default()
            }
        )*
    };
}

unary_math!(
    sqrt => MathFn::Sqrt,
    exp => MathFn::Exp,
    log => MathFn::Log,
    sin => MathFn::Sin,
    cos => MathFn::Cos,
    floor => MathFn::Floor,
    ceil => MathFn::Ceil,
    round => MathFn::Round
);

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = match &self.0 {
            Some(n) => n,
            None => return write!(f, "<undefined>"),
        };
        match &node.kind {
            ExprKind::IntImm(v) => write!(f, "{}", v),
            ExprKind::UIntImm(v) => write!(f, "{}u", v),
            ExprKind::FloatImm(v) => write!(f, "{:?}f", v),
            ExprKind::BoolImm(v) => write!(f, "{}", v),
            ExprKind::Var(v) => write!(f, "{}", v),
            ExprKind::RVar(r) => write!(f, "{}", r.name()),
            ExprKind::Param(p) => write!(f, "{}", p.name()),
            ExprKind::Cast(a) => write!(f, "{}({})", node.ty, a),
            ExprKind::Binary(op @ (BinOp::Min | BinOp::Max), a, b) => {
                write!(f, "{}({}, {})", op.symbol(), a, b)
            }
            ExprKind::Binary(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            ExprKind::Compare(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            ExprKind::And(a, b) => write!(f, "({} && {})", a, b),
            ExprKind::Or(a, b) => write!(f, "({} || {})", a, b),
            ExprKind::Not(a) => write!(f, "!{}", a),
            ExprKind::Select(c, t, e) => write!(f, "select({}, {}, {})", c, t, e),
            ExprKind::Math(func, args) => {
                write!(f, "{}(", func.name())?;
                write_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::Call(call) => {
                write!(f, "{}(", call.name)?;
                write_list(f, &call.args)?;
                write!(f, ")")?;
                if call.explicit_index {
                    write!(f, "[{}]", call.value_index)?;
                }
                Ok(())
            }
            ExprKind::ImageLoad { image, args } => {
                write!(f, "{}(", image.name())?;
                write_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::ImageExtent { image, dim, min } => {
                let what = if *min { "min" } else { "extent" };
                write!(f, "{}.{}.{}", image.name(), what, dim)
            }
        }
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty() {
            Some(ty) => write!(f, "Expr<{}>({})", ty, self),
            None => write!(f, "Expr(<undefined>)"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_coercion() {
        let x = Var::new("x");
        let e = x + 1;
        assert_eq!(e.ty(), Some(Type::int(32)));

        let f = Expr::from(x) * 0.5f32;
        assert_eq!(f.ty(), Some(Type::float(32)));

        let g = cast(Type::float(32), x) + 2.0;
        assert_eq!(g.ty(), Some(Type::float(32)));

        let h = cast(Type::uint(8), x) + 3;
        assert_eq!(h.ty(), Some(Type::uint(8)));
    }

    #[test]
    fn test_widening() {
        let x = Var::new("x");
        let a = cast(Type::int(16), x) + cast(Type::int(32), x);
        assert_eq!(a.ty(), Some(Type::int(32)));
        let b = cast(Type::float(32), x) + cast(Type::float(64), x);
        assert_eq!(b.ty(), Some(Type::float(64)));
        let c = Expr::from(x) / 3.0;
        assert_eq!(c.ty(), Some(Type::float(64)));
    }

    #[test]
    fn test_undefined_propagation() {
        let x = Var::new("x");
        let e = x + Expr::undefined();
        assert!(!e.defined());
        assert!(!(e * 2).defined());
        assert!(!select(Expr::undefined(), 1, 2).defined());
    }

    #[test]
    fn test_fallible_constructor_reports_internal_error() {
        let err = Expr::binary(BinOp::Add, Expr::undefined(), Expr::from(1)).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_free_vars_in_order() {
        let x = Var::new("x");
        let y = Var::new("y");
        let e = (y + x) * y;
        assert_eq!(e.free_vars(), vec![y, x]);
    }

    #[test]
    fn test_rewrite_shares_untouched_subtrees() {
        let x = Var::new("x");
        let y = Var::new("y");
        let left = Expr::from(x) + 1;
        let e = &left * y;
        let rewritten = e.rewrite(&mut |n| match n.as_var() {
            Some(v) if v == y => Some(Expr::from(7)),
            _ => None,
        });
        match rewritten.kind() {
            Some(ExprKind::Binary(BinOp::Mul, a, b)) => {
                assert!(a.same_as(&left));
                assert_eq!(b.as_int(), Some(7));
            }
            _ => panic!("unexpected shape"),
        }
    }

    #[test]
    fn test_display() {
        let x = Var::new("x");
        let e = min(x + 1, 10);
        assert_eq!(e.to_string(), "min((x + 1), 10)");
    }

    #[test]
    fn test_math_promotes_to_float() {
        let x = Var::new("x");
        assert_eq!(sqrt(x).ty(), Some(Type::float(32)));
        assert_eq!(abs(x).ty(), Some(Type::int(32)));
        assert_eq!(exp(cast(Type::float(64), x)).ty(), Some(Type::float(64)));
    }
}
