//! Lowering user Exprs to plan expressions.
//!
//! Calls to inlined Funcs are replaced by the callee's value with its
//! arguments let-bound; calls to materialized Funcs become buffer loads.

use crate::func::Func;
use crate::ir::expr::{Expr, ExprKind, ExprNode};
use crate::ir::plan::{PExpr, PNode};
use crate::ir::types::{Type, Value};
use crate::utils::errors::{compile_error, internal_error, CompileErrorKind, FlowResult};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

/// Name of the buffer holding output `index` of `func`.
pub fn buffer_name(func: &Func, index: usize) -> String {
    if func.outputs() <= 1 {
        func.name()
    } else {
        format!("{}.{}", func.name(), index)
    }
}

/// All buffer names of `func`.
pub fn buffer_names(func: &Func) -> Vec<String> {
    (0..func.outputs().max(1)).map(|i| buffer_name(func, i)).collect()
}

/// Plan expressions that Vars and RVars stand for, keyed by name.
pub type Bindings = HashMap<String, PExpr>;

pub struct ExprLowering {
    inline: HashSet<u64>,
    /// Count of shared-term lets made so far, for naming them.
    lets: Cell<usize>,
}

impl ExprLowering {
    pub fn new(inline: HashSet<u64>) -> Self {
        Self { inline, lets: Cell::new(0) }
    }

    pub fn is_inline(&self, func: &Func) -> bool {
        self.inline.contains(&func.id())
    }

    /// Lower `e`. Sub-expressions the DAG shares are computed once and
    /// let-bound around the result.
    pub fn lower(&self, e: &Expr, bindings: &Bindings) -> FlowResult<PExpr> {
        let mut state = LowerState { memo: HashMap::new(), shared: shared_nodes(e), lets: Vec::new() };
        let body = self.lower_memo(e, bindings, &mut state)?;
        Ok(state
            .lets
            .into_iter()
            .rev()
            .fold(body, |body, (name, value)| PExpr::let_in(name, value, body)))
    }

    fn lower_memo(&self, e: &Expr, bindings: &Bindings, state: &mut LowerState) -> FlowResult<PExpr> {
        let (ty, kind) = match (e.ty(), e.kind()) {
            (Some(ty), Some(kind)) => (ty, kind),
            _ => return Err(internal_error("Lowering reached an undefined Expr")),
        };
        if let Some(done) = state.memo.get(&e.node_ptr()) {
            return Ok(done.clone());
        }
        let mut sub = |x: &Expr| self.lower_memo(x, bindings, state);
        let lowered = match kind {
            ExprKind::IntImm(v) => PExpr::constant(ty, Value::Int(*v)),
            ExprKind::UIntImm(v) => PExpr::constant(ty, Value::UInt(*v)),
            ExprKind::FloatImm(v) => PExpr::constant(ty, Value::Float(*v)),
            ExprKind::BoolImm(b) => PExpr::boolean(*b),
            ExprKind::Var(v) => lookup(bindings, &v.name())?,
            ExprKind::RVar(r) => lookup(bindings, &r.name())?,
            ExprKind::Param(p) => PExpr::var(p.name(), p.ty()),
            ExprKind::Cast(a) => PExpr::cast(ty, sub(a)?),
            ExprKind::Binary(op, a, b) => PExpr::binary(*op, sub(a)?, sub(b)?),
            ExprKind::Compare(op, a, b) => PExpr::compare(*op, sub(a)?, sub(b)?),
            ExprKind::And(a, b) => PExpr::and(sub(a)?, sub(b)?),
            ExprKind::Or(a, b) => PExpr::or(sub(a)?, sub(b)?),
            ExprKind::Not(a) => PExpr::not(sub(a)?),
            ExprKind::Select(c, t, f) => PExpr::select(sub(c)?, sub(t)?, sub(f)?),
            ExprKind::Math(func, args) => {
                let args = args.iter().map(&mut sub).collect::<FlowResult<Vec<_>>>()?;
                PExpr::math(*func, ty, args)
            }
            ExprKind::ImageLoad { image, args } => {
                let args = args.iter().map(&mut sub).collect::<FlowResult<Vec<_>>>()?;
                PExpr::load(image.name(), ty, args)
            }
            ExprKind::ImageExtent { image, dim, min } => {
                let what = if *min { "min" } else { "extent" };
                PExpr::int_var(format!("{}.{}.{}", image.name(), what, dim))
            }
            ExprKind::Call(call) => {
                let func = call
                    .func()
                    .ok_or_else(|| internal_error(format!("Call to {}, which no longer exists", call.name())))?;
                let args = call.args().iter().map(&mut sub).collect::<FlowResult<Vec<_>>>()?;
                if self.is_inline(&func) {
                    self.inline_call(&func, call.value_index(), args)?
                } else {
                    PExpr::load(buffer_name(&func, call.value_index()), ty, args)
                }
            }
        };
        let lowered = match lowered.node {
            PNode::Const(_) | PNode::Var(_) => lowered,
            _ if state.shared.contains(&e.node_ptr()) => {
                let name = format!("cse${}", self.lets.get());
                self.lets.set(self.lets.get() + 1);
                let var = PExpr::var(name.clone(), lowered.ty);
                state.lets.push((name, lowered));
                var
            }
            _ => lowered,
        };
        state.memo.insert(e.node_ptr(), lowered.clone());
        Ok(lowered)
    }

    fn inline_call(&self, func: &Func, index: usize, args: Vec<PExpr>) -> FlowResult<PExpr> {
        let value = func.values().get(index).cloned().ok_or_else(|| {
            internal_error(format!("{} has no output {}", func.name(), index))
        })?;
        let mut bindings = Bindings::new();
        let mut lets = Vec::new();
        for (var, arg) in func.args().iter().zip(args) {
            let arg = PExpr::cast(Type::int(32), arg);
            if arg.is_const() || matches!(arg.node, PNode::Var(_)) {
                bindings.insert(var.name(), arg);
            } else {
                let name = format!("{}.{}", func.name(), var.name());
                bindings.insert(var.name(), PExpr::int_var(name.clone()));
                lets.push((name, arg));
            }
        }
        let body = self.lower(&value, &bindings)?;
        Ok(lets
            .into_iter()
            .rev()
            .fold(body, |body, (name, value)| PExpr::let_in(name, value, body)))
    }
}

struct LowerState {
    memo: HashMap<*const ExprNode, PExpr>,
    shared: HashSet<*const ExprNode>,
    /// Bindings for shared nodes, each after the ones it depends on.
    lets: Vec<(String, PExpr)>,
}

/// Nodes with more than one parent that can be evaluated up front.
///
/// A node reached only through a select branch or the right side of a
/// logical operator is evaluated lazily, so it is only hoisted when it
/// cannot read out of bounds.
fn shared_nodes(root: &Expr) -> HashSet<*const ExprNode> {
    let mut parents: HashMap<*const ExprNode, usize> = HashMap::new();
    root.visit(&mut |e| {
        if let Some(kind) = e.kind() {
            for child in kind.children() {
                *parents.entry(child.node_ptr()).or_default() += 1;
            }
        }
        true
    });
    let mut eager = HashSet::new();
    mark_eager(root, &mut eager);
    let mut reads = HashMap::new();
    let mut shared = HashSet::new();
    root.visit(&mut |e| {
        let ptr = e.node_ptr();
        let is_leaf = e.kind().map_or(true, |k| k.children().is_empty());
        let reused = parents.get(&ptr).map_or(false, |&n| n > 1);
        if !is_leaf && reused && (eager.contains(&ptr) || !reads_memory(e, &mut reads)) {
            shared.insert(ptr);
        }
        true
    });
    shared
}

fn mark_eager(e: &Expr, eager: &mut HashSet<*const ExprNode>) {
    if !eager.insert(e.node_ptr()) {
        return;
    }
    match e.kind() {
        Some(ExprKind::Select(c, _, _)) => mark_eager(c, eager),
        Some(ExprKind::And(a, _)) | Some(ExprKind::Or(a, _)) => mark_eager(a, eager),
        Some(kind) => kind.children().into_iter().for_each(|c| mark_eager(c, eager)),
        None => {}
    }
}

fn reads_memory(e: &Expr, memo: &mut HashMap<*const ExprNode, bool>) -> bool {
    if let Some(&known) = memo.get(&e.node_ptr()) {
        return known;
    }
    let reads = match e.kind() {
        Some(ExprKind::Call(_)) | Some(ExprKind::ImageLoad { .. }) => true,
        Some(kind) => kind.children().into_iter().any(|c| reads_memory(c, memo)),
        None => false,
    };
    memo.insert(e.node_ptr(), reads);
    reads
}

fn lookup(bindings: &Bindings, name: &str) -> FlowResult<PExpr> {
    bindings.get(name).cloned().ok_or_else(|| {
        compile_error(
            CompileErrorKind::UnboundVar,
            format!("Variable {} is not bound at this point of the pipeline", name),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::var::Var;

    #[test]
    fn test_inline_substitutes_value() {
        let x = Var::new("x");
        let g = Func::new("g");
        g.define(&[x], x * 2).unwrap();
        let f = Func::new("f");
        f.define(&[x], g.call([Expr::from(x) + 1]) + g.call([x])).unwrap();

        let lowering = ExprLowering::new([g.id()].into_iter().collect());
        let mut bindings = Bindings::new();
        bindings.insert("x".into(), PExpr::int_var("f.s0.x"));
        let e = lowering.lower(&f.value(), &bindings).unwrap();
        let text = e.to_string();
        assert!(text.contains("let g.x = (f.s0.x + 1)"));
        assert!(text.contains("(f.s0.x * 2)"));
        assert!(!text.contains("g["));
    }

    #[test]
    fn test_materialized_call_is_load() {
        let x = Var::new("x");
        let g = Func::new("g");
        g.define_tuple(&[x], [Expr::from(x), Expr::from(x) * 3]).unwrap();
        let f = Func::new("f");
        f.define(&[x], g.at([x]).index(1)).unwrap();
        let lowering = ExprLowering::new(HashSet::new());
        let mut bindings = Bindings::new();
        bindings.insert("x".into(), PExpr::int_var("f.s0.x"));
        let e = lowering.lower(&f.value(), &bindings).unwrap();
        assert_eq!(e.to_string(), "g.1[f.s0.x]");
    }

    fn bound_x() -> Bindings {
        let mut bindings = Bindings::new();
        bindings.insert("x".into(), PExpr::int_var("f.s0.x"));
        bindings
    }

    #[test]
    fn test_shared_terms_bound_once() {
        let x = Var::new("x");
        let shared = Expr::from(x) + 1;
        let e = shared.clone() * shared;
        let lowering = ExprLowering::new(HashSet::new());
        let text = lowering.lower(&e, &bound_x()).unwrap().to_string();
        assert_eq!(text.matches("(f.s0.x + 1)").count(), 1);
        assert!(text.starts_with("(let cse$"));
    }

    #[test]
    fn test_lazily_evaluated_loads_stay_in_place() {
        let x = Var::new("x");
        let g = Func::new("g");
        g.define(&[x], x).unwrap();
        let read = g.call([x]);
        let e = crate::ir::expr::select(Expr::from(x).lt(3), read.clone() + read, 0);
        let lowering = ExprLowering::new(HashSet::new());
        let text = lowering.lower(&e, &bound_x()).unwrap().to_string();
        assert!(!text.contains("let"));
        assert_eq!(text.matches("g[f.s0.x]").count(), 2);
    }

    #[test]
    fn test_unbound_var() {
        let x = Var::new("x");
        let lowering = ExprLowering::new(HashSet::new());
        let err = lowering.lower(&(x + 1), &Bindings::new()).unwrap_err();
        assert!(err.is_compile());
    }
}
