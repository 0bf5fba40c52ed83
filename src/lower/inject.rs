//! Placing the computation of materialized Funcs.
//!
//! Funcs are visited consumers first. A root Func is realized around the
//! whole statement built so far; a chunked Func is realized inside the
//! body of the consumer loop over its chunk Var. Either way the region
//! computed is the region its consumers read, grown to cover what its
//! own update stages touch.

use crate::analysis::bounds::{region_accessed, region_required, Interval, Scope};
use crate::func::Func;
use crate::ir::plan::{PExpr, RealizedBuffer, Stmt};
use crate::ir::var::Var;
use crate::lower::expr::buffer_names;
use crate::lower::loop_nest::{extent_name, min_name, stage_prefix};
use crate::transform::schedule::Schedule;
use crate::utils::errors::{compile_error, CompileErrorKind, FlowResult};
use log::debug;
use std::collections::HashMap;

fn unbounded(func: &Func, dim: usize, what: &str) -> crate::utils::errors::FlowError {
    compile_error(
        CompileErrorKind::UnboundedAccess,
        format!("Can't bound the region of dimension {} {}", dim, what),
    )
    .with_subject(func.name())
}

fn bounded(func: &Func, region: Vec<Interval>, what: &str) -> FlowResult<Vec<(PExpr, PExpr)>> {
    region
        .into_iter()
        .enumerate()
        .map(|(i, interval)| match (interval.min.clone(), interval.extent()) {
            (Some(min), Some(extent)) => Ok((min, extent)),
            _ => Err(unbounded(func, i, what)),
        })
        .collect()
}

fn bind_region(func: &Func, region: &[(PExpr, PExpr)], body: Stmt) -> Stmt {
    region.iter().enumerate().rev().fold(body, |body, (i, (min, extent))| {
        Stmt::let_stmt(
            min_name(func, i),
            min.clone(),
            Stmt::let_stmt(extent_name(func, i), extent.clone(), body),
        )
    })
}

/// Realize `func` around `consumer`, computing `produce` first.
///
/// Returns `consumer` unchanged if it never reads `func`.
pub fn realize_around(func: &Func, produce: Stmt, consumer: Stmt) -> FlowResult<Stmt> {
    let buffers = buffer_names(func);
    let required = match region_required(&consumer, &buffers, &Scope::new()) {
        Some(region) => region,
        None => {
            debug!("{} is never read, skipping its realization", func.name());
            return Ok(consumer);
        }
    };
    let required = bounded(func, required, "read by its consumers")?;

    let mut region = required.clone();
    if func.has_update_definition() {
        let bound = bind_region(func, &required, produce.clone());
        if let Some(touched) = region_accessed(&bound, &buffers, &Scope::new()) {
            let touched = bounded(func, touched, "touched by its update definitions")?;
            region = required
                .iter()
                .zip(touched)
                .map(|((min, extent), (tmin, textent))| {
                    let last = |m: &PExpr, e: &PExpr| PExpr::sub(PExpr::add(m.clone(), e.clone()), PExpr::int(1));
                    let lo = PExpr::min(min.clone(), tmin.clone());
                    let hi = PExpr::max(last(min, extent), last(&tmin, &textent));
                    let extent = PExpr::add(PExpr::sub(hi, lo.clone()), PExpr::int(1));
                    (lo, extent)
                })
                .collect();
        }
    }

    let bounds = (0..region.len())
        .map(|i| (PExpr::int_var(min_name(func, i)), PExpr::int_var(extent_name(func, i))))
        .collect();
    let realized = buffers
        .iter()
        .zip(func.output_types())
        .map(|(name, ty)| RealizedBuffer { name: name.clone(), ty })
        .collect();
    let realize = Stmt::Realize {
        buffers: realized,
        bounds,
        body: Box::new(Stmt::block(vec![produce, consumer])),
    };
    Ok(bind_region(func, &region, realize))
}

fn count_loads(stmt: &Stmt, buffers: &[String]) -> usize {
    let mut n = 0;
    stmt.for_each_expr(&mut |e| {
        e.for_each(&mut |sub| {
            if let crate::ir::plan::PNode::Load { buffer, .. } = &sub.node {
                if buffers.contains(buffer) {
                    n += 1;
                }
            }
        })
    });
    n
}

/// Outermost loop among `names` whose body reads `buffers`.
fn find_chunk_loop(stmt: &Stmt, names: &[String], buffers: &[String]) -> Option<String> {
    let mut found = None;
    stmt.for_each_stmt(&mut |s| {
        if found.is_some() {
            return;
        }
        if let Stmt::For { name, body, .. } = s {
            if names.contains(name) && body.loads_from(buffers) {
                found = Some(name.clone());
            }
        }
    });
    found
}

/// Apply `f` to the body of the loop called `name`.
fn rewrite_loop_body(stmt: Stmt, name: &str, f: &mut dyn FnMut(Stmt) -> FlowResult<Stmt>) -> FlowResult<Stmt> {
    Ok(match stmt {
        Stmt::For { name: n, min, extent, kind, body } => {
            let body = if n == name { f(*body)? } else { rewrite_loop_body(*body, name, f)? };
            Stmt::For { name: n, min, extent, kind, body: Box::new(body) }
        }
        Stmt::LetStmt { name: n, value, body } => Stmt::LetStmt { name: n, value, body: Box::new(rewrite_loop_body(*body, name, f)?) },
        Stmt::Realize { buffers, bounds, body } => {
            Stmt::Realize { buffers, bounds, body: Box::new(rewrite_loop_body(*body, name, f)?) }
        }
        Stmt::IfThenElse { condition, then_case } => {
            Stmt::IfThenElse { condition, then_case: Box::new(rewrite_loop_body(*then_case, name, f)?) }
        }
        Stmt::Block(stmts) => Stmt::Block(
            stmts
                .into_iter()
                .map(|s| rewrite_loop_body(s, name, f))
                .collect::<FlowResult<Vec<_>>>()?,
        ),
        other => other,
    })
}

/// Realize `func` inside the consumer loop over `var`.
///
/// `schedules` maps the ids of the materialized Funcs to their schedules;
/// their stage loops are the candidates.
pub fn realize_in_chunk(
    func: &Func,
    var: Var,
    produce: Stmt,
    stmt: Stmt,
    consumers: &[Func],
    schedules: &HashMap<u64, Schedule>,
) -> FlowResult<Stmt> {
    let buffers = buffer_names(func);
    let mut candidates = Vec::new();
    for consumer in consumers {
        let internal = schedules
            .get(&consumer.id())
            .and_then(|s| s.internal_name(&var.name()).map(str::to_string))
            .unwrap_or_else(|| var.name());
        for stage in 0..=consumer.num_update_definitions() {
            candidates.push(format!("{}{}", stage_prefix(consumer, stage), internal));
        }
    }
    let name = find_chunk_loop(&stmt, &candidates, &buffers).ok_or_else(|| {
        compile_error(
            CompileErrorKind::InvalidSchedule,
            format!("chunk({}): no consumer loop over {} reads this Func", var, var),
        )
        .with_subject(func.name())
    })?;

    let total = count_loads(&stmt, &buffers);
    let mut inside = 0;
    let mut produce = Some(produce);
    let rewritten = rewrite_loop_body(stmt, &name, &mut |body| {
        inside = count_loads(&body, &buffers);
        match produce.take() {
            Some(p) => realize_around(func, p, body),
            None => Ok(body),
        }
    })?;
    if inside != total {
        return Err(compile_error(
            CompileErrorKind::InvalidSchedule,
            format!("chunk({}): the Func is also read outside loop {}", var, name),
        )
        .with_subject(func.name()));
    }
    debug!("{} computed per iteration of {}", func.name(), name);
    Ok(rewritten)
}
