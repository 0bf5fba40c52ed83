//! Lowering a Func graph and its schedules into an executable plan.
//!
//! ```text
//! Environment::discover   which Funcs, Params and images are involved
//! Scheduler::resolve      each Func's loop structure
//! build_produce           loop nests, output Func first
//! realize_around / _in_chunk  producers placed around or inside consumers
//! simplify                constant propagation
//! ```

pub mod expr;
pub mod loop_nest;
pub mod inject;
pub mod simplify;

pub use expr::{buffer_name, buffer_names};

use crate::analysis::environment::{CacheKey, Environment};
use crate::func::Func;
use crate::ir::expr::CmpOp;
use crate::ir::plan::{AssertKind, PExpr, Stmt};
use crate::ir::types::Type;
use crate::transform::schedule::{ComputeLevel, Schedule};
use crate::transform::Scheduler;
use crate::utils::errors::{compile_error, CompileErrorKind, FlowResult};
use expr::{Bindings, ExprLowering};
use inject::{realize_around, realize_in_chunk};
use log::{debug, info, warn};
use loop_nest::build_produce;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A buffer crossing the execution boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub name: String,
    pub ty: Type,
    pub dims: usize,
}

/// A scalar parameter crossing the execution boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarInfo {
    pub name: String,
    pub ty: Type,
}

/// The complete plan for one output Func.
#[derive(Debug, Clone)]
pub struct Lowered {
    pub name: String,
    pub body: Stmt,
    pub outputs: Vec<BufferInfo>,
    pub images: Vec<BufferInfo>,
    pub params: Vec<ScalarInfo>,
    pub key: CacheKey,
}

impl fmt::Display for Lowered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outputs: Vec<String> = self.outputs.iter().map(|b| format!("{}: {}", b.name, b.ty)).collect();
        writeln!(f, "pipeline {} -> {}", self.name, outputs.join(", "))?;
        write!(f, "{}", self.body)
    }
}

/// Lower `output` and everything it depends on.
pub fn lower(output: &Func) -> FlowResult<Lowered> {
    let env = Environment::discover(output)?;
    lower_env(&env)
}

pub fn lower_env(env: &Environment) -> FlowResult<Lowered> {
    let output = env.output();
    let scheduler = Scheduler::new().with_step_logging(log::log_enabled!(log::Level::Trace));
    let mut schedules: HashMap<u64, Schedule> = HashMap::new();
    for func in env.funcs() {
        schedules.insert(func.id(), scheduler.resolve(func)?);
    }

    let mut inline = HashSet::new();
    for func in env.funcs() {
        if func.id() == output.id() {
            continue;
        }
        let Some(schedule) = schedules.get_mut(&func.id()) else { continue };
        if schedule.compute == ComputeLevel::Inline {
            if func.has_update_definition() {
                warn!("{} has update definitions and can't be inlined; computing it at root", func.name());
                schedule.compute = ComputeLevel::Root;
            } else {
                inline.insert(func.id());
            }
        }
    }
    let lowering = ExprLowering::new(inline);

    let output_schedule = schedules.get(&output.id()).cloned().unwrap_or_else(|| Schedule::new(&output.args()));
    if output_schedule.compute != ComputeLevel::Inline {
        debug!("{} is the output; ignoring its compute level", output.name());
    }
    let mut stmt = build_produce(output, &output_schedule, &lowering)?;

    let materialized: Vec<Func> = env
        .funcs()
        .iter()
        .filter(|f| !lowering.is_inline(f))
        .cloned()
        .collect();
    for func in env.funcs().iter().rev() {
        if func.id() == output.id() || lowering.is_inline(func) {
            continue;
        }
        let Some(schedule) = schedules.get(&func.id()) else { continue };
        let produce = build_produce(func, schedule, &lowering)?;
        stmt = match &schedule.compute {
            ComputeLevel::Chunk(var) => {
                let consumers: Vec<Func> = materialized.iter().filter(|f| f.id() != func.id()).cloned().collect();
                realize_in_chunk(func, *var, produce, stmt, &consumers, &schedules)?
            }
            _ => realize_around(func, produce, stmt)?,
        };
    }

    let mut body = param_asserts(env, &lowering)?;
    body.push(stmt);
    let body = simplify::simplify(Stmt::block(body));

    let lowered = Lowered {
        name: output.name(),
        body,
        outputs: buffer_names(output)
            .into_iter()
            .zip(output.output_types())
            .map(|(name, ty)| BufferInfo { name, ty, dims: output.dimensions() })
            .collect(),
        images: env
            .images()
            .iter()
            .map(|i| BufferInfo { name: i.name(), ty: i.ty(), dims: i.dimensions() })
            .collect(),
        params: env.params().iter().map(|p| ScalarInfo { name: p.name(), ty: p.ty() }).collect(),
        key: env.cache_key(),
    };
    info!("lowered {} ({} funcs, {} inlined)", lowered.name, env.funcs().len(), env.funcs().len() - materialized.len());
    debug!("plan for {}:\n{}", lowered.name, lowered.body);
    Ok(lowered)
}

/// Runtime checks that every ranged Param lies within its range.
fn param_asserts(env: &Environment, lowering: &ExprLowering) -> FlowResult<Vec<Stmt>> {
    let mut asserts = Vec::new();
    for p in env.params() {
        let (lo, hi) = (p.min(), p.max());
        if !lo.defined() && !hi.defined() {
            continue;
        }
        let value = PExpr::var(p.name(), p.ty());
        let mut conditions = Vec::new();
        let mut values = vec![value.clone()];
        for (bound, op) in [(&lo, CmpOp::Ge), (&hi, CmpOp::Le)] {
            if bound.defined() {
                let bound = PExpr::cast(p.ty(), lowering.lower(bound, &Bindings::new())?);
                conditions.push(PExpr::compare(op, value.clone(), bound.clone()));
                values.push(bound);
            }
        }
        if let Some(condition) = conditions.into_iter().reduce(PExpr::and) {
            asserts.push(Stmt::Assert {
                condition,
                message: format!("Parameter {} is out of range", p.name()),
                values,
                kind: AssertKind::ParamRange,
            });
        }
    }
    Ok(asserts)
}

/// Every Param must have a value and every ImageParam a buffer before
/// the pipeline can run.
pub fn check_bindings(env: &Environment) -> FlowResult<()> {
    for p in env.params() {
        if p.value().is_none() {
            return Err(compile_error(
                CompileErrorKind::UnboundParameter,
                format!("Parameter {} has no value", p.name()),
            )
            .with_subject(p.name()));
        }
    }
    for image in env.images() {
        if image.buffer().is_none() {
            return Err(compile_error(
                CompileErrorKind::UnboundParameter,
                format!("ImageParam {} has no buffer bound", image.name()),
            )
            .with_subject(image.name()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::Expr;
    use crate::ir::param::Param;
    use crate::ir::var::Var;

    #[test]
    fn test_inline_producer_disappears() {
        let x = Var::new("x");
        let g = Func::new("g");
        g.define(&[x], x * 2).unwrap();
        let f = Func::new("f");
        f.define(&[x], g.call([x]) + 1).unwrap();
        let lowered = lower(&f).unwrap();
        let text = lowered.body.to_string();
        assert!(!text.contains("realize"));
        assert!(text.contains("((f.s0.x * 2) + 1)"));
    }

    #[test]
    fn test_root_producer_is_realized() {
        let x = Var::new("x");
        let g = Func::new("g");
        g.define(&[x], x * 2).unwrap();
        g.root();
        let f = Func::new("f");
        f.define(&[x], g.call([Expr::from(x) - 1]) + g.call([Expr::from(x) + 1])).unwrap();
        let lowered = lower(&f).unwrap();
        let text = lowered.body.to_string();
        assert!(text.contains("realize g"));
        assert!(text.contains("let g.min.0 = (f.min.0 - 1)"));
        assert_eq!(lowered.body.loop_names(), vec!["g.s0.x", "f.s0.x"]);
    }

    #[test]
    fn test_chunk_inside_consumer_loop() {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let g = Func::new("g");
        g.define(&[x, y], x + y).unwrap();
        g.chunk(y);
        let f = Func::new("f");
        f.define(&[x, y], g.call([x, y]) * 2).unwrap();
        let lowered = lower(&f).unwrap();
        assert_eq!(lowered.body.loop_names(), vec!["f.s0.y", "g.s0.y", "g.s0.x", "f.s0.x"]);
    }

    #[test]
    fn test_chunk_without_consumer_loop() {
        let x = Var::new("x");
        let g = Func::new("g");
        g.define(&[x], x).unwrap();
        g.chunk(Var::new("nope"));
        let f = Func::new("f");
        f.define(&[x], g.call([x])).unwrap();
        let err = lower(&f).unwrap_err();
        assert!(matches!(err.as_compile().map(|e| e.kind), Some(CompileErrorKind::InvalidSchedule)));
    }

    #[test]
    fn test_param_range_assert() {
        let x = Var::new("x");
        let p = Param::new("p", Type::int(32));
        p.set_range(-3, 5);
        let f = Func::new("f");
        f.define(&[x], x + &p).unwrap();
        let lowered = lower(&f).unwrap();
        assert!(lowered.body.to_string().contains("Parameter p is out of range"));
        assert_eq!(lowered.params.len(), 1);
    }

    #[test]
    fn test_unbound_param_reported() {
        let x = Var::new("x");
        let p = Param::new("scale", Type::float(32));
        let f = Func::new("f");
        f.define(&[x], Expr::from(x) * &p).unwrap();
        let env = Environment::discover(&f).unwrap();
        let err = check_bindings(&env).unwrap_err();
        assert!(matches!(err.as_compile().map(|e| e.kind), Some(CompileErrorKind::UnboundParameter)));
        p.set(2.0f32);
        assert!(check_bindings(&env).is_ok());
    }
}
