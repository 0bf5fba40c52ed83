//! The lowered, fully explicit executable plan.
//!
//! Unlike `Expr`, plan expressions are plain owned trees: every Func call
//! has been inlined or turned into a buffer load, every Var into a named
//! loop variable or let binding.

use crate::ir::expr::{BinOp, CmpOp, MathFn};
use crate::ir::ops::{eval_binary, eval_cast, eval_compare, eval_math};
use crate::ir::types::{Type, Value};
use crate::utils::pretty::CodeFormatter;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum PNode {
    Const(Value),
    Var(String),
    Cast(Box<PExpr>),
    Binary(BinOp, Box<PExpr>, Box<PExpr>),
    Compare(CmpOp, Box<PExpr>, Box<PExpr>),
    And(Box<PExpr>, Box<PExpr>),
    Or(Box<PExpr>, Box<PExpr>),
    Not(Box<PExpr>),
    Select(Box<PExpr>, Box<PExpr>, Box<PExpr>),
    Math(MathFn, Vec<PExpr>),
    Load { buffer: String, args: Vec<PExpr> },
    Let { name: String, value: Box<PExpr>, body: Box<PExpr> },
}

/// A typed plan expression.
#[derive(Debug, Clone, PartialEq)]
pub struct PExpr {
    pub ty: Type,
    pub node: PNode,
}

impl PExpr {
    pub fn constant(ty: Type, value: Value) -> Self {
        PExpr { ty, node: PNode::Const(ty.normalize(value)) }
    }

    /// A 32-bit integer constant.
    pub fn int(v: i64) -> Self {
        Self::constant(Type::int(32), Value::Int(v))
    }

    pub fn boolean(b: bool) -> Self {
        Self::constant(Type::bool(), Value::Bool(b))
    }

    pub fn var(name: impl Into<String>, ty: Type) -> Self {
        PExpr { ty, node: PNode::Var(name.into()) }
    }

    /// A 32-bit integer variable.
    pub fn int_var(name: impl Into<String>) -> Self {
        Self::var(name, Type::int(32))
    }

    pub fn as_const(&self) -> Option<Value> {
        match &self.node {
            PNode::Const(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match (&self.node, self.ty.is_integer()) {
            (PNode::Const(v), true) => Some(v.as_i64()),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self.node, PNode::Const(_))
    }

    pub fn cast(ty: Type, a: PExpr) -> PExpr {
        if a.ty == ty {
            return a;
        }
        if let Some(v) = a.as_const() {
            return PExpr::constant(ty, eval_cast(ty, v));
        }
        PExpr { ty, node: PNode::Cast(Box::new(a)) }
    }

    /// Build `a op b`, folding constants and trivial identities.
    /// Both operands must already share a type.
    pub fn binary(op: BinOp, a: PExpr, b: PExpr) -> PExpr {
        let ty = a.ty;
        if let (Some(x), Some(y)) = (a.as_const(), b.as_const()) {
            return PExpr::constant(ty, eval_binary(op, ty, x, y));
        }
        if ty.is_integer() {
            let (ca, cb) = (a.as_int(), b.as_int());
            match (op, ca, cb) {
                (BinOp::Add, Some(0), _) => return b,
                (BinOp::Add | BinOp::Sub, _, Some(0)) => return a,
                (BinOp::Mul, Some(1), _) => return b,
                (BinOp::Mul | BinOp::Div, _, Some(1)) => return a,
                (BinOp::Mul, Some(0), _) | (BinOp::Mul, _, Some(0)) => return PExpr::constant(ty, ty.zero()),
                (BinOp::Min | BinOp::Max, _, _) if a == b => return a,
                (BinOp::Sub, _, _) if a == b => return PExpr::constant(ty, ty.zero()),
                _ => {}
            }
            // (e + c1) + c2 => e + (c1 + c2)
            if let (BinOp::Add | BinOp::Sub, Some(c2)) = (op, cb) {
                if let PNode::Binary(BinOp::Add, inner, c1) = &a.node {
                    if let Some(c1) = c1.as_int() {
                        let c = if op == BinOp::Add { c1.wrapping_add(c2) } else { c1.wrapping_sub(c2) };
                        return PExpr::binary(BinOp::Add, (**inner).clone(), PExpr::constant(ty, Value::Int(c)));
                    }
                }
            }
            // min(e + c1, e + c2) => e + min(c1, c2)
            if let BinOp::Min | BinOp::Max = op {
                let (base_a, off_a) = a.split_offset();
                let (base_b, off_b) = b.split_offset();
                if base_a == base_b {
                    let pick_a = if op == BinOp::Min { off_a <= off_b } else { off_a >= off_b };
                    return if pick_a { a } else { b };
                }
            }
            // (e + c) - e => c
            if op == BinOp::Sub {
                if let PNode::Binary(BinOp::Add, inner, c) = &a.node {
                    if **inner == b && c.is_const() {
                        return (**c).clone();
                    }
                }
            }
        }
        PExpr { ty, node: PNode::Binary(op, Box::new(a), Box::new(b)) }
    }

    /// `e + c` as `(e, c)`; anything else as `(self, 0)`.
    fn split_offset(&self) -> (&PExpr, i64) {
        if let PNode::Binary(op @ (BinOp::Add | BinOp::Sub), e, c) = &self.node {
            if let Some(c) = c.as_int() {
                return (e, if *op == BinOp::Add { c } else { c.wrapping_neg() });
            }
        }
        (self, 0)
    }

    pub fn add(a: PExpr, b: PExpr) -> PExpr {
        PExpr::binary(BinOp::Add, a, b)
    }

    pub fn sub(a: PExpr, b: PExpr) -> PExpr {
        PExpr::binary(BinOp::Sub, a, b)
    }

    pub fn mul(a: PExpr, b: PExpr) -> PExpr {
        PExpr::binary(BinOp::Mul, a, b)
    }

    pub fn div(a: PExpr, b: PExpr) -> PExpr {
        PExpr::binary(BinOp::Div, a, b)
    }

    pub fn min(a: PExpr, b: PExpr) -> PExpr {
        PExpr::binary(BinOp::Min, a, b)
    }

    pub fn max(a: PExpr, b: PExpr) -> PExpr {
        PExpr::binary(BinOp::Max, a, b)
    }

    pub fn compare(op: CmpOp, a: PExpr, b: PExpr) -> PExpr {
        if let (Some(x), Some(y)) = (a.as_const(), b.as_const()) {
            return PExpr::boolean(eval_compare(op, a.ty, x, y));
        }
        PExpr { ty: Type::bool(), node: PNode::Compare(op, Box::new(a), Box::new(b)) }
    }

    pub fn and(a: PExpr, b: PExpr) -> PExpr {
        match (a.as_const(), b.as_const()) {
            (Some(x), _) if x.as_bool() => b,
            (Some(_), _) => PExpr::boolean(false),
            (_, Some(y)) if y.as_bool() => a,
            _ => PExpr { ty: Type::bool(), node: PNode::And(Box::new(a), Box::new(b)) },
        }
    }

    pub fn or(a: PExpr, b: PExpr) -> PExpr {
        match (a.as_const(), b.as_const()) {
            (Some(x), _) if x.as_bool() => PExpr::boolean(true),
            (Some(_), _) => b,
            (_, Some(y)) if !y.as_bool() => a,
            _ => PExpr { ty: Type::bool(), node: PNode::Or(Box::new(a), Box::new(b)) },
        }
    }

    pub fn not(a: PExpr) -> PExpr {
        match a.as_const() {
            Some(v) => PExpr::boolean(!v.as_bool()),
            None => PExpr { ty: Type::bool(), node: PNode::Not(Box::new(a)) },
        }
    }

    pub fn select(c: PExpr, t: PExpr, f: PExpr) -> PExpr {
        match c.as_const() {
            Some(v) if v.as_bool() => t,
            Some(_) => f,
            None => PExpr { ty: t.ty, node: PNode::Select(Box::new(c), Box::new(t), Box::new(f)) },
        }
    }

    pub fn math(func: MathFn, ty: Type, args: Vec<PExpr>) -> PExpr {
        let consts: Option<Vec<Value>> = args.iter().map(PExpr::as_const).collect();
        match consts {
            Some(values) => PExpr::constant(ty, eval_math(func, ty, &values)),
            None => PExpr { ty, node: PNode::Math(func, args) },
        }
    }

    pub fn load(buffer: impl Into<String>, ty: Type, args: Vec<PExpr>) -> PExpr {
        PExpr { ty, node: PNode::Load { buffer: buffer.into(), args } }
    }

    pub fn let_in(name: impl Into<String>, value: PExpr, body: PExpr) -> PExpr {
        PExpr {
            ty: body.ty,
            node: PNode::Let { name: name.into(), value: Box::new(value), body: Box::new(body) },
        }
    }

    /// Call `f` on every sub-expression, parents first.
    pub fn for_each(&self, f: &mut dyn FnMut(&PExpr)) {
        f(self);
        match &self.node {
            PNode::Const(_) | PNode::Var(_) => {}
            PNode::Cast(a) | PNode::Not(a) => a.for_each(f),
            PNode::Binary(_, a, b) | PNode::Compare(_, a, b) | PNode::And(a, b) | PNode::Or(a, b) => {
                a.for_each(f);
                b.for_each(f);
            }
            PNode::Select(c, t, e) => {
                c.for_each(f);
                t.for_each(f);
                e.for_each(f);
            }
            PNode::Math(_, args) | PNode::Load { args, .. } => args.iter().for_each(|a| a.for_each(f)),
            PNode::Let { value, body, .. } => {
                value.for_each(f);
                body.for_each(f);
            }
        }
    }

    pub fn node_count(&self) -> usize {
        let mut n = 0;
        self.for_each(&mut |_| n += 1);
        n
    }

    /// Whether the expression reads any of the named buffers.
    pub fn loads_from(&self, buffers: &[String]) -> bool {
        let mut found = false;
        self.for_each(&mut |e| {
            if let PNode::Load { buffer, .. } = &e.node {
                found |= buffers.contains(buffer);
            }
        });
        found
    }
}

impl fmt::Display for PExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            PNode::Const(Value::Float(v)) => write!(f, "{:?}f", v),
            PNode::Const(v) => write!(f, "{}", v),
            PNode::Var(name) => write!(f, "{}", name),
            PNode::Cast(a) => write!(f, "{}({})", self.ty, a),
            PNode::Binary(op @ (BinOp::Min | BinOp::Max), a, b) => write!(f, "{}({}, {})", op.symbol(), a, b),
            PNode::Binary(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            PNode::Compare(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            PNode::And(a, b) => write!(f, "({} && {})", a, b),
            PNode::Or(a, b) => write!(f, "({} || {})", a, b),
            PNode::Not(a) => write!(f, "!{}", a),
            PNode::Select(c, t, e) => write!(f, "select({}, {}, {})", c, t, e),
            PNode::Math(func, args) => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", func.name(), args.join(", "))
            }
            PNode::Load { buffer, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}[{}]", buffer, args.join(", "))
            }
            PNode::Let { name, value, body } => write!(f, "(let {} = {} in {})", name, value, body),
        }
    }
}

/// How a loop is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForKind {
    Serial,
    Parallel,
    Vectorized,
    Unrolled,
}

impl fmt::Display for ForKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForKind::Serial => write!(f, "for"),
            ForKind::Parallel => write!(f, "parallel"),
            ForKind::Vectorized => write!(f, "vectorized"),
            ForKind::Unrolled => write!(f, "unrolled"),
        }
    }
}

/// What a failing assertion reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertKind {
    ParamRange,
    Generic,
}

/// A buffer allocated by a `Realize`.
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedBuffer {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    For {
        name: String,
        min: PExpr,
        extent: PExpr,
        kind: ForKind,
        body: Box<Stmt>,
    },
    LetStmt {
        name: String,
        value: PExpr,
        body: Box<Stmt>,
    },
    Store {
        buffer: String,
        args: Vec<PExpr>,
        value: PExpr,
        trace: bool,
    },
    /// Allocate buffers covering `bounds` (min, extent per dimension)
    /// for the duration of `body`.
    Realize {
        buffers: Vec<RealizedBuffer>,
        bounds: Vec<(PExpr, PExpr)>,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    IfThenElse {
        condition: PExpr,
        then_case: Box<Stmt>,
    },
    /// Fail at run time unless `condition` holds. `values` are printed
    /// alongside `message`.
    Assert {
        condition: PExpr,
        message: String,
        values: Vec<PExpr>,
        kind: AssertKind,
    },
}

impl Stmt {
    pub fn let_stmt(name: impl Into<String>, value: PExpr, body: Stmt) -> Stmt {
        Stmt::LetStmt { name: name.into(), value, body: Box::new(body) }
    }

    /// Flatten nested blocks and drop empty ones.
    pub fn block(stmts: Vec<Stmt>) -> Stmt {
        let mut flat = Vec::new();
        for s in stmts {
            match s {
                Stmt::Block(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            Stmt::Block(flat)
        }
    }

    pub fn if_then(condition: PExpr, then_case: Stmt) -> Stmt {
        match condition.as_const() {
            Some(v) if v.as_bool() => then_case,
            _ => Stmt::IfThenElse { condition, then_case: Box::new(then_case) },
        }
    }

    /// Call `f` on every statement, parents first.
    pub fn for_each_stmt(&self, f: &mut dyn FnMut(&Stmt)) {
        f(self);
        match self {
            Stmt::For { body, .. } | Stmt::LetStmt { body, .. } | Stmt::Realize { body, .. } => body.for_each_stmt(f),
            Stmt::IfThenElse { then_case, .. } => then_case.for_each_stmt(f),
            Stmt::Block(stmts) => stmts.iter().for_each(|s| s.for_each_stmt(f)),
            Stmt::Store { .. } | Stmt::Assert { .. } => {}
        }
    }

    /// Call `f` on every expression directly held by a statement.
    pub fn for_each_expr(&self, f: &mut dyn FnMut(&PExpr)) {
        self.for_each_stmt(&mut |s| match s {
            Stmt::For { min, extent, .. } => {
                f(min);
                f(extent);
            }
            Stmt::LetStmt { value, .. } => f(value),
            Stmt::Store { args, value, .. } => {
                args.iter().for_each(&mut *f);
                f(value);
            }
            Stmt::Realize { bounds, .. } => {
                for (min, extent) in bounds {
                    f(min);
                    f(extent);
                }
            }
            Stmt::IfThenElse { condition, .. } => f(condition),
            Stmt::Assert { condition, values, .. } => {
                f(condition);
                values.iter().for_each(&mut *f);
            }
            Stmt::Block(_) => {}
        });
    }

    /// Whether any expression in this statement reads one of `buffers`.
    pub fn loads_from(&self, buffers: &[String]) -> bool {
        let mut found = false;
        self.for_each_expr(&mut |e| found |= e.loads_from(buffers));
        found
    }

    /// Names of all loops in this statement, outermost first.
    pub fn loop_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.for_each_stmt(&mut |s| {
            if let Stmt::For { name, .. } = s {
                names.push(name.clone());
            }
        });
        names
    }

    fn pretty(&self, out: &mut CodeFormatter) {
        match self {
            Stmt::For { name, min, extent, kind, body } => {
                out.block(&format!("{} ({}, {}, {})", kind, name, min, extent), |out| body.pretty(out));
            }
            Stmt::LetStmt { name, value, body } => {
                out.writeln(&format!("let {} = {}", name, value));
                body.pretty(out);
            }
            Stmt::Store { buffer, args, value, trace } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                let marker = if *trace { " (traced)" } else { "" };
                out.writeln(&format!("{}[{}] = {}{}", buffer, args.join(", "), value, marker));
            }
            Stmt::Realize { buffers, bounds, body } => {
                let names: Vec<String> = buffers.iter().map(|b| format!("{}: {}", b.name, b.ty)).collect();
                let bounds: Vec<String> = bounds.iter().map(|(m, e)| format!("[{}, {}]", m, e)).collect();
                out.block(&format!("realize {} over {}", names.join(", "), bounds.join(" x ")), |out| {
                    body.pretty(out)
                });
            }
            Stmt::Block(stmts) => stmts.iter().for_each(|s| s.pretty(out)),
            Stmt::IfThenElse { condition, then_case } => {
                out.block(&format!("if {}", condition), |out| then_case.pretty(out));
            }
            Stmt::Assert { condition, message, .. } => {
                out.writeln(&format!("assert({}, \"{}\")", condition, message));
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = CodeFormatter::default_indent();
        self.pretty(&mut out);
        write!(f, "{}", out.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_folding() {
        let e = PExpr::add(PExpr::int(2), PExpr::int(3));
        assert_eq!(e.as_int(), Some(5));
        let x = PExpr::int_var("x");
        assert_eq!(PExpr::add(x.clone(), PExpr::int(0)), x);
        assert_eq!(PExpr::mul(PExpr::int(1), x.clone()), x);
    }

    #[test]
    fn test_offsets_combine() {
        let x = PExpr::int_var("x");
        let e = PExpr::add(PExpr::add(x.clone(), PExpr::int(2)), PExpr::int(3));
        assert_eq!(e.to_string(), "(x + 5)");
        let back = PExpr::sub(e, x);
        assert_eq!(back.as_int(), Some(5));
    }

    #[test]
    fn test_block_flattening() {
        let store = Stmt::Store {
            buffer: "f".into(),
            args: vec![PExpr::int_var("x")],
            value: PExpr::int(1),
            trace: false,
        };
        let b = Stmt::block(vec![Stmt::Block(vec![store.clone()]), Stmt::Block(vec![])]);
        assert_eq!(b, store);
    }

    #[test]
    fn test_stmt_display() {
        let body = Stmt::Store {
            buffer: "f".into(),
            args: vec![PExpr::int_var("f.s0.x")],
            value: PExpr::int_var("f.s0.x"),
            trace: false,
        };
        let s = Stmt::For {
            name: "f.s0.x".into(),
            min: PExpr::int(0),
            extent: PExpr::int(8),
            kind: ForKind::Parallel,
            body: Box::new(body),
        };
        let text = s.to_string();
        assert!(text.starts_with("parallel (f.s0.x, 0, 8) {"));
        assert!(text.contains("  f[f.s0.x] = f.s0.x"));
    }
}
