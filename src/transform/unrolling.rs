//! Vectorization and unrolling.
//!
//! Both mark a loop whose lanes run without a bounds guard. Given a
//! factor, the loop is first split and the new inner loop is marked:
//! ```text
//! for x in [0, W):
//!   f[x] = ...
//! ```
//! after `vectorize(x, 4)`:
//! ```text
//! for x in [0, (W + 3) / 4):
//!   vectorized x$v in [0, 4):
//!     f[x * 4 + x$v] = ...
//! ```
//! The last lanes may then touch points past `W`; the output buffer
//! must be sized for that.

use crate::ir::plan::ForKind;
use crate::transform::schedule::Schedule;
use crate::transform::Transform;
use crate::utils::errors::FlowResult;

/// Mark `var`, or the inner loop of a split of it by `factor`, as `kind`.
fn mark(schedule: &mut Schedule, var: &str, factor: Option<i64>, suffix: &str, kind: ForKind) -> FlowResult<()> {
    let target = schedule.resolve(var)?;
    let target = match factor {
        Some(factor) => {
            let (_, inner) = schedule.split_dim(&target, var, &format!("{}${}", var, suffix), factor)?;
            inner
        }
        None => target,
    };
    schedule.set_kind(&target, kind)
}

/// Run the lanes of a loop as one vector.
#[derive(Debug, Clone)]
pub struct Vectorize {
    /// The loop to vectorize
    pub var: String,
    /// Vector width. With `None` the whole loop is vectorized in place
    pub factor: Option<i64>,
}

impl Transform for Vectorize {
    fn apply(&self, schedule: &mut Schedule) -> FlowResult<()> {
        mark(schedule, &self.var, self.factor, "v", ForKind::Vectorized)
    }

    fn name(&self) -> &str {
        "vectorize"
    }
}

/// Replicate the body of a loop once per iteration.
#[derive(Debug, Clone)]
pub struct Unroll {
    /// The loop to unroll
    pub var: String,
    /// Unroll count. With `None` the whole loop is unrolled in place
    pub factor: Option<i64>,
}

impl Transform for Unroll {
    fn apply(&self, schedule: &mut Schedule) -> FlowResult<()> {
        mark(schedule, &self.var, self.factor, "u", ForKind::Unrolled)
    }

    fn name(&self) -> &str {
        "unroll"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::var::Var;

    #[test]
    fn test_vectorize_with_factor() {
        let mut s = Schedule::new(&[Var::new("x")]);
        Vectorize { var: "x".into(), factor: Some(4) }.apply(&mut s).unwrap();
        assert_eq!(s.dims[0].name, "x$v");
        assert_eq!(s.dims[0].kind, ForKind::Vectorized);
        assert_eq!(s.dims[1].kind, ForKind::Serial);
        assert!(s.is_unguarded_lane("x$v"));
    }

    #[test]
    fn test_unroll_in_place() {
        let mut s = Schedule::new(&[Var::new("x"), Var::new("y")]);
        Unroll { var: "y".into(), factor: None }.apply(&mut s).unwrap();
        assert_eq!(s.dims.len(), 2);
        assert_eq!(s.dims[1].kind, ForKind::Unrolled);
    }
}
