//! Schedule directives as recorded on a Func.
//!
//! Directives are stored in the order they were issued and replayed by
//! the scheduler each time the Func is lowered.

use crate::analysis::modulus::modulus_remainder;
use crate::ir::expr::Expr;
use crate::ir::var::Var;
use crate::transform::interchange::Transpose;
use crate::transform::random::RandomSchedule;
use crate::transform::scheduler::{ComputeAt, Parallel};
use crate::transform::schedule::{ComputeLevel, Schedule};
use crate::transform::tiling::{Split, Tile};
use crate::transform::unrolling::{Unroll, Vectorize};
use crate::transform::Transform;
use crate::utils::errors::{compile_error, CompileErrorKind, FlowResult};
use std::fmt;

#[derive(Debug, Clone)]
pub enum ScheduleDirective {
    Split { old: Var, outer: Var, inner: Var, factor: Expr },
    Tile { x: Var, y: Var, xi: Var, yi: Var, x_factor: Expr, y_factor: Expr },
    Vectorize { var: Var, factor: Option<Expr> },
    Unroll { var: Var, factor: Option<Expr> },
    Parallel { var: Var },
    Transpose { a: Var, b: Var },
    Chunk { var: Var },
    Root,
    Inline,
    Random { seed: u64 },
}

impl ScheduleDirective {
    /// Build the transformation this directive stands for.
    pub fn to_transform(&self) -> FlowResult<Box<dyn Transform>> {
        Ok(match self {
            ScheduleDirective::Split { old, outer, inner, factor } => Box::new(Split::new(
                &old.name(),
                &outer.name(),
                &inner.name(),
                constant_factor(factor)?,
            )),
            ScheduleDirective::Tile { x, y, xi, yi, x_factor, y_factor } => Box::new(Tile {
                x: x.name(),
                y: y.name(),
                xi: xi.name(),
                yi: yi.name(),
                x_factor: constant_factor(x_factor)?,
                y_factor: constant_factor(y_factor)?,
            }),
            ScheduleDirective::Vectorize { var, factor } => {
                Box::new(Vectorize { var: var.name(), factor: factor.as_ref().map(constant_factor).transpose()? })
            }
            ScheduleDirective::Unroll { var, factor } => {
                Box::new(Unroll { var: var.name(), factor: factor.as_ref().map(constant_factor).transpose()? })
            }
            ScheduleDirective::Parallel { var } => Box::new(Parallel { var: var.name() }),
            ScheduleDirective::Transpose { a, b } => Box::new(Transpose { a: a.name(), b: b.name() }),
            ScheduleDirective::Chunk { var } => Box::new(ComputeAt(ComputeLevel::Chunk(*var))),
            ScheduleDirective::Root => Box::new(ComputeAt(ComputeLevel::Root)),
            ScheduleDirective::Inline => Box::new(ComputeAt(ComputeLevel::Inline)),
            ScheduleDirective::Random { seed } => Box::new(RandomSchedule::new(*seed)),
        })
    }

    pub fn apply(&self, schedule: &mut Schedule) -> FlowResult<()> {
        self.to_transform()?.apply(schedule)
    }
}

/// Split factors must be compile-time positive integer constants.
fn constant_factor(factor: &Expr) -> FlowResult<i64> {
    let mr = modulus_remainder(factor).map_err(|_| {
        compile_error(
            CompileErrorKind::InvalidSchedule,
            format!("Split factor {} is not an integer", factor),
        )
    })?;
    match mr.as_constant() {
        Some(f) if f > 0 => Ok(f),
        Some(f) => Err(compile_error(
            CompileErrorKind::InvalidSchedule,
            format!("Split factor must be positive, got {}", f),
        )),
        None => Err(compile_error(
            CompileErrorKind::InvalidSchedule,
            format!("Split factor {} is not a constant", factor),
        )),
    }
}

impl fmt::Display for ScheduleDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleDirective::Split { old, outer, inner, factor } => {
                write!(f, "split({}, {}, {}, {})", old, outer, inner, factor)
            }
            ScheduleDirective::Tile { x, y, xi, yi, x_factor, y_factor } => {
                write!(f, "tile({}, {}, {}, {}, {}, {})", x, y, xi, yi, x_factor, y_factor)
            }
            ScheduleDirective::Vectorize { var, factor: Some(n) } => write!(f, "vectorize({}, {})", var, n),
            ScheduleDirective::Vectorize { var, factor: None } => write!(f, "vectorize({})", var),
            ScheduleDirective::Unroll { var, factor: Some(n) } => write!(f, "unroll({}, {})", var, n),
            ScheduleDirective::Unroll { var, factor: None } => write!(f, "unroll({})", var),
            ScheduleDirective::Parallel { var } => write!(f, "parallel({})", var),
            ScheduleDirective::Transpose { a, b } => write!(f, "transpose({}, {})", a, b),
            ScheduleDirective::Chunk { var } => write!(f, "chunk({})", var),
            ScheduleDirective::Root => write!(f, "root()"),
            ScheduleDirective::Inline => write!(f, "inline()"),
            ScheduleDirective::Random { seed } => write!(f, "random({})", seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor_must_be_constant() {
        let x = Var::new("x");
        let d = ScheduleDirective::Split {
            old: x,
            outer: Var::new("xo"),
            inner: Var::new("xi"),
            factor: Expr::from(x) + 1,
        };
        let err = d.to_transform().err().unwrap();
        assert!(err.is_compile());
    }

    #[test]
    fn test_factor_folds() {
        let x = Var::new("x");
        let d = ScheduleDirective::Split {
            old: x,
            outer: Var::new("xo"),
            inner: Var::new("xi"),
            factor: Expr::from(2) * 4,
        };
        let mut s = Schedule::new(&[x]);
        d.apply(&mut s).unwrap();
        assert_eq!(s.splits[0].factor, 8);
        assert_eq!(d.to_string(), "split(x, xo, xi, (2 * 4))");
    }

    #[test]
    fn test_negative_factor() {
        let x = Var::new("x");
        let d = ScheduleDirective::Vectorize { var: x, factor: Some(Expr::from(-4)) };
        assert!(d.to_transform().is_err());
    }
}
