//! Building the loop nests that compute one Func.
//!
//! Every stage `k` of a Func `f` (the pure definition is stage 0) gets
//! loops named `f.sk.<dim>`. Loop bounds are let-bound once, outside
//! the nest, as `f.sk.<dim>.loop_min` and `f.sk.<dim>.loop_extent`.
//! The pure stage iterates over `[f.min.i, f.min.i + f.extent.i)` in
//! each dimension; whoever places the nest binds those names.

use crate::analysis::modulus::{modulus_remainder_plan, ModulusRemainder};
use crate::func::{Func, UpdateDefinition};
use crate::ir::expr::{CmpOp, ExprKind};
use crate::ir::plan::{ForKind, PExpr, Stmt};
use crate::ir::types::Type;
use crate::lower::expr::{buffer_name, Bindings, ExprLowering};
use crate::transform::schedule::Schedule;
use crate::utils::errors::{compile_error, CompileErrorKind, FlowResult};
use log::trace;
use std::collections::HashMap;

pub fn min_name(func: &Func, dim: usize) -> String {
    format!("{}.min.{}", func.name(), dim)
}

pub fn extent_name(func: &Func, dim: usize) -> String {
    format!("{}.extent.{}", func.name(), dim)
}

pub fn stage_prefix(func: &Func, stage: usize) -> String {
    format!("{}.s{}.", func.name(), stage)
}

/// One loop of a stage, before it is wrapped around the body.
struct LoopDim {
    name: String,
    kind: ForKind,
}

/// Let-bound loop bounds, outermost first, with divisibility facts.
#[derive(Default)]
struct BoundLets {
    lets: Vec<(String, PExpr)>,
    facts: HashMap<String, ModulusRemainder>,
}

impl BoundLets {
    fn push(&mut self, name: String, value: PExpr) {
        let mr = modulus_remainder_plan(&value, &self.facts);
        self.facts.insert(name.clone(), mr);
        self.lets.push((name, value));
    }

    fn wrap(self, body: Stmt) -> Stmt {
        self.lets
            .into_iter()
            .rev()
            .fold(body, |body, (name, value)| Stmt::let_stmt(name, value, body))
    }
}

fn wrap_loops(prefix: &str, dims: &[LoopDim], body: Stmt) -> Stmt {
    dims.iter().fold(body, |body, d| {
        let name = format!("{}{}", prefix, d.name);
        Stmt::For {
            min: PExpr::int_var(format!("{}.loop_min", name)),
            extent: PExpr::int_var(format!("{}.loop_extent", name)),
            name,
            kind: d.kind,
            body: Box::new(body),
        }
    })
}

/// Stores of `values` at `args`, reading every value before writing any.
fn stores(func: &Func, prefix: &str, args: Vec<PExpr>, values: Vec<PExpr>) -> Stmt {
    let trace = func.is_tracing();
    if let [value] = values.as_slice() {
        return Stmt::Store { buffer: buffer_name(func, 0), args, value: value.clone(), trace };
    }
    let names: Vec<String> = (0..values.len()).map(|i| format!("{}value.{}", prefix, i)).collect();
    let writes = values
        .iter()
        .enumerate()
        .map(|(i, v)| Stmt::Store {
            buffer: buffer_name(func, i),
            args: args.clone(),
            value: PExpr::var(names[i].clone(), v.ty),
            trace,
        })
        .collect();
    names
        .into_iter()
        .zip(values)
        .rev()
        .fold(Stmt::block(writes), |body, (name, value)| Stmt::let_stmt(name, value, body))
}

/// The pure stage of `func`, following its schedule.
pub fn build_pure_stage(func: &Func, schedule: &Schedule, lowering: &ExprLowering) -> FlowResult<Stmt> {
    let prefix = stage_prefix(func, 0);
    let var = |name: &str| PExpr::int_var(format!("{}{}", prefix, name));

    let mut bindings = Bindings::new();
    for arg in &schedule.pure_args {
        bindings.insert(arg.clone(), var(arg));
    }
    let values = func
        .values()
        .0
        .iter()
        .map(|v| lowering.lower(v, &bindings))
        .collect::<FlowResult<Vec<_>>>()?;
    let args: Vec<PExpr> = schedule.pure_args.iter().map(|a| var(a)).collect();

    let mut bounds = BoundLets::default();
    for (i, arg) in schedule.pure_args.iter().enumerate() {
        bounds.push(format!("{}{}.loop_min", prefix, arg), PExpr::int_var(min_name(func, i)));
        bounds.push(format!("{}{}.loop_extent", prefix, arg), PExpr::int_var(extent_name(func, i)));
    }
    for split in &schedule.splits {
        let old_extent = PExpr::int_var(format!("{}{}.loop_extent", prefix, split.old));
        let factor = PExpr::int(split.factor);
        let outer_extent = PExpr::div(
            PExpr::add(old_extent, PExpr::int(split.factor - 1)),
            factor.clone(),
        );
        bounds.push(format!("{}{}.loop_min", prefix, split.outer), PExpr::int(0));
        bounds.push(format!("{}{}.loop_extent", prefix, split.outer), outer_extent);
        bounds.push(format!("{}{}.loop_min", prefix, split.inner), PExpr::int(0));
        bounds.push(format!("{}{}.loop_extent", prefix, split.inner), factor);
    }

    let mut body = stores(func, &prefix, args, values);

    let mut guards = Vec::new();
    for split in &schedule.splits {
        let extent_name = format!("{}{}.loop_extent", prefix, split.old);
        let divisible = bounds
            .facts
            .get(&extent_name)
            .map_or(false, |mr| mr.is_multiple_of(split.factor));
        if divisible || schedule.is_unguarded_lane(&split.inner) {
            trace!("{}: no guard needed for split of {}", func.name(), split.old);
            continue;
        }
        let last = PExpr::sub(
            PExpr::add(
                PExpr::int_var(format!("{}{}.loop_min", prefix, split.old)),
                PExpr::int_var(extent_name),
            ),
            PExpr::int(1),
        );
        guards.push(PExpr::compare(CmpOp::Le, var(&split.old), last));
    }
    if let Some(condition) = guards.into_iter().reduce(PExpr::and) {
        body = Stmt::if_then(condition, body);
    }

    for split in &schedule.splits {
        let value = PExpr::add(
            PExpr::add(PExpr::mul(var(&split.outer), PExpr::int(split.factor)), var(&split.inner)),
            PExpr::int_var(format!("{}{}.loop_min", prefix, split.old)),
        );
        body = Stmt::let_stmt(format!("{}{}", prefix, split.old), value, body);
    }

    let dims: Vec<LoopDim> = schedule
        .dims
        .iter()
        .map(|d| LoopDim { name: d.name.clone(), kind: d.kind })
        .collect();
    Ok(bounds.wrap(wrap_loops(&prefix, &dims, body)))
}

/// Update stage `stage` (one-based) of `func`. Reduction loops run
/// innermost in domain order, then the pure dimensions in argument order.
pub fn build_update_stage(
    func: &Func,
    stage: usize,
    update: &UpdateDefinition,
    lowering: &ExprLowering,
) -> FlowResult<Stmt> {
    let prefix = stage_prefix(func, stage);
    let mut bindings = Bindings::new();
    let mut bounds = BoundLets::default();
    let mut dims = Vec::new();

    if let Some(domain) = &update.domain {
        for rv in domain.vars() {
            let (min, extent) = match (rv.min.defined(), rv.extent.defined()) {
                (true, true) => (&rv.min, &rv.extent),
                _ => {
                    return Err(compile_error(
                        CompileErrorKind::BadReductionDomain,
                        format!("Reduction variable {} has undefined bounds", rv.name),
                    )
                    .with_subject(func.name()))
                }
            };
            let integral = |e: &crate::ir::expr::Expr| e.ty().map_or(false, |t| t.is_integer());
            if !integral(min) || !integral(extent) {
                return Err(compile_error(
                    CompileErrorKind::BadReductionDomain,
                    format!("Bounds of reduction variable {} must be integers", rv.name),
                )
                .with_subject(func.name()));
            }
            let min = PExpr::cast(Type::int(32), lowering.lower(min, &Bindings::new())?);
            let extent = PExpr::cast(Type::int(32), lowering.lower(extent, &Bindings::new())?);
            bounds.push(format!("{}{}.loop_min", prefix, rv.name), min);
            bounds.push(format!("{}{}.loop_extent", prefix, rv.name), extent);
            bindings.insert(rv.name.clone(), PExpr::int_var(format!("{}{}", prefix, rv.name)));
            dims.push(LoopDim { name: rv.name.clone(), kind: ForKind::Serial });
        }
    }

    for (i, arg) in update.args.iter().enumerate() {
        if let Some(ExprKind::Var(v)) = arg.kind() {
            let name = v.name();
            if bindings.contains_key(&name) {
                continue;
            }
            bounds.push(format!("{}{}.loop_min", prefix, name), PExpr::int_var(min_name(func, i)));
            bounds.push(format!("{}{}.loop_extent", prefix, name), PExpr::int_var(extent_name(func, i)));
            bindings.insert(name.clone(), PExpr::int_var(format!("{}{}", prefix, name)));
            dims.push(LoopDim { name, kind: ForKind::Serial });
        }
    }

    let args = update
        .args
        .iter()
        .map(|a| lowering.lower(a, &bindings))
        .collect::<FlowResult<Vec<_>>>()?;
    let values = update
        .values
        .iter()
        .map(|v| lowering.lower(v, &bindings))
        .collect::<FlowResult<Vec<_>>>()?;
    let body = stores(func, &prefix, args, values);
    Ok(bounds.wrap(wrap_loops(&prefix, &dims, body)))
}

/// All stages of `func`, in order.
pub fn build_produce(func: &Func, schedule: &Schedule, lowering: &ExprLowering) -> FlowResult<Stmt> {
    let mut stages = vec![build_pure_stage(func, schedule, lowering)?];
    for (k, update) in func.update_definitions().iter().enumerate() {
        stages.push(build_update_stage(func, k + 1, update, lowering)?);
    }
    Ok(Stmt::block(stages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::var::{RDom, Var};
    use crate::transform::Scheduler;
    use std::collections::HashSet;

    fn produce(f: &Func) -> Stmt {
        let schedule = Scheduler::new().resolve(f).unwrap();
        build_produce(f, &schedule, &ExprLowering::new(HashSet::new())).unwrap()
    }

    #[test]
    fn test_default_nest() {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let f = Func::new("f");
        f.define(&[x, y], x + y).unwrap();
        let names = produce(&f).loop_names();
        assert_eq!(names, vec!["f.s0.y", "f.s0.x"]);
    }

    #[test]
    fn test_split_guard() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.define(&[x], x * 2).unwrap();
        f.split(x, x, Var::new("xi"), 4);
        let text = produce(&f).to_string();
        assert!(text.contains("f.s0.x.1"));
        assert!(text.contains("if ("));
    }

    #[test]
    fn test_nested_split_is_unguarded() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.define(&[x], x).unwrap();
        f.split(x, x, Var::new("xi"), 8).split(Var::new("xi"), Var::new("xi"), Var::new("xii"), 2);
        let s = produce(&f);
        let mut guards = 0;
        s.for_each_stmt(&mut |st| {
            if matches!(st, Stmt::IfThenElse { .. }) {
                guards += 1;
            }
        });
        assert_eq!(guards, 1);
    }

    #[test]
    fn test_vectorized_has_no_guard() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.define(&[x], x).unwrap();
        f.vectorize_by(x, 4);
        let text = produce(&f).to_string();
        assert!(!text.contains("if ("));
        assert!(text.contains("vectorized"));
    }

    #[test]
    fn test_update_loops() {
        let x = Var::new("x");
        let r = RDom::named("r", crate::ir::var::Range::new(0, 10));
        let f = Func::new("hist");
        f.define(&[x], 0).unwrap();
        f.at([r.x()]).add_assign(1).unwrap();
        let names = produce(&f).loop_names();
        assert_eq!(names, vec!["hist.s0.x", "hist.s1.r.x"]);
    }
}
