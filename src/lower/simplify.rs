//! A small cleanup pass over the finished plan.
//!
//! Constant lets are substituted into their bodies and everything is
//! refolded, which turns most split bookkeeping into literal loop
//! bounds. Guards that became trivially true disappear.

use crate::ir::plan::{PExpr, PNode, Stmt};
use std::collections::HashMap;

type Constants = HashMap<String, PExpr>;

fn expr(e: &PExpr, consts: &Constants) -> PExpr {
    let ty = e.ty;
    match &e.node {
        PNode::Const(_) => e.clone(),
        PNode::Var(name) => consts.get(name).cloned().unwrap_or_else(|| e.clone()),
        PNode::Cast(a) => PExpr::cast(ty, expr(a, consts)),
        PNode::Binary(op, a, b) => PExpr::binary(*op, expr(a, consts), expr(b, consts)),
        PNode::Compare(op, a, b) => PExpr::compare(*op, expr(a, consts), expr(b, consts)),
        PNode::And(a, b) => PExpr::and(expr(a, consts), expr(b, consts)),
        PNode::Or(a, b) => PExpr::or(expr(a, consts), expr(b, consts)),
        PNode::Not(a) => PExpr::not(expr(a, consts)),
        PNode::Select(c, t, f) => PExpr::select(expr(c, consts), expr(t, consts), expr(f, consts)),
        PNode::Math(func, args) => PExpr::math(*func, ty, args.iter().map(|a| expr(a, consts)).collect()),
        PNode::Load { buffer, args } => PExpr::load(buffer.clone(), ty, args.iter().map(|a| expr(a, consts)).collect()),
        PNode::Let { name, value, body } => {
            let value = expr(value, consts);
            let mut inner = consts.clone();
            if value.is_const() {
                inner.insert(name.clone(), value);
                return expr(body, &inner);
            }
            inner.remove(name);
            PExpr::let_in(name.clone(), value, expr(body, &inner))
        }
    }
}

fn stmt(s: Stmt, consts: &Constants) -> Stmt {
    match s {
        Stmt::For { name, min, extent, kind, body } => {
            let extent = expr(&extent, consts);
            if extent.as_int().map_or(false, |n| n <= 0) {
                return Stmt::Block(Vec::new());
            }
            let mut inner = consts.clone();
            inner.remove(&name);
            Stmt::For { min: expr(&min, consts), extent, kind, body: Box::new(stmt(*body, &inner)), name }
        }
        Stmt::LetStmt { name, value, body } => {
            let value = expr(&value, consts);
            let mut inner = consts.clone();
            if value.is_const() {
                inner.insert(name, value);
                return stmt(*body, &inner);
            }
            inner.remove(&name);
            Stmt::let_stmt(name, value, stmt(*body, &inner))
        }
        Stmt::Store { buffer, args, value, trace } => Stmt::Store {
            buffer,
            args: args.iter().map(|a| expr(a, consts)).collect(),
            value: expr(&value, consts),
            trace,
        },
        Stmt::Realize { buffers, bounds, body } => Stmt::Realize {
            buffers,
            bounds: bounds.iter().map(|(m, e)| (expr(m, consts), expr(e, consts))).collect(),
            body: Box::new(stmt(*body, consts)),
        },
        Stmt::Block(stmts) => Stmt::block(stmts.into_iter().map(|s| stmt(s, consts)).collect()),
        Stmt::IfThenElse { condition, then_case } => {
            let condition = expr(&condition, consts);
            match condition.as_const() {
                Some(v) if !v.as_bool() => Stmt::Block(Vec::new()),
                _ => Stmt::if_then(condition, stmt(*then_case, consts)),
            }
        }
        Stmt::Assert { condition, message, values, kind } => Stmt::Assert {
            condition: expr(&condition, consts),
            message,
            values: values.iter().map(|v| expr(v, consts)).collect(),
            kind,
        },
    }
}

pub fn simplify(s: Stmt) -> Stmt {
    stmt(s, &Constants::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::CmpOp;
    use crate::ir::plan::ForKind;

    #[test]
    fn test_constant_lets_fold_into_loops() {
        let body = Stmt::Store {
            buffer: "f".into(),
            args: vec![PExpr::int_var("i")],
            value: PExpr::int(0),
            trace: false,
        };
        let s = Stmt::let_stmt(
            "i.loop_extent",
            PExpr::mul(PExpr::int(2), PExpr::int(4)),
            Stmt::For {
                name: "i".into(),
                min: PExpr::int(0),
                extent: PExpr::int_var("i.loop_extent"),
                kind: ForKind::Serial,
                body: Box::new(body),
            },
        );
        match simplify(s) {
            Stmt::For { extent, .. } => assert_eq!(extent.as_int(), Some(8)),
            other => panic!("expected a loop, got {}", other),
        }
    }

    #[test]
    fn test_true_guard_removed() {
        let store = Stmt::Store { buffer: "f".into(), args: vec![], value: PExpr::int(1), trace: false };
        let guarded = Stmt::let_stmt(
            "n",
            PExpr::int(3),
            Stmt::IfThenElse {
                condition: PExpr::compare(CmpOp::Lt, PExpr::int_var("n"), PExpr::int(4)),
                then_case: Box::new(store.clone()),
            },
        );
        assert_eq!(simplify(guarded), store);
    }
}
