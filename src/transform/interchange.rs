//! Loop interchange.
//!
//! ```text
//! for y:
//!   for x:
//!     f[x, y] = ...
//! ```
//! becomes, after `transpose(x, y)`:
//! ```text
//! for x:
//!   for y:
//!     f[x, y] = ...
//! ```
//! Pure definitions carry no loop-carried dependences, so any order is
//! legal.

use crate::transform::schedule::Schedule;
use crate::transform::Transform;
use crate::utils::errors::FlowResult;

#[derive(Debug, Clone)]
pub struct Transpose {
    pub a: String,
    pub b: String,
}

impl Transpose {
    pub fn new(a: &str, b: &str) -> Self {
        Self { a: a.to_string(), b: b.to_string() }
    }
}

impl Transform for Transpose {
    fn apply(&self, schedule: &mut Schedule) -> FlowResult<()> {
        let a = schedule.resolve(&self.a)?;
        let b = schedule.resolve(&self.b)?;
        schedule.swap(&a, &b)
    }

    fn name(&self) -> &str {
        "transpose"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::var::Var;
    use crate::transform::tiling::Split;

    #[test]
    fn test_transpose_swaps_positions() {
        let mut s = Schedule::new(&[Var::new("x"), Var::new("y"), Var::new("c")]);
        Transpose::new("x", "c").apply(&mut s).unwrap();
        let names: Vec<&str> = s.dims.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["c", "y", "x"]);
    }

    #[test]
    fn test_transpose_after_split() {
        let mut s = Schedule::new(&[Var::new("x"), Var::new("y")]);
        Split::new("x", "x", "xi", 2).apply(&mut s).unwrap();
        Transpose::new("xi", "y").apply(&mut s).unwrap();
        assert_eq!(s.dims[0].name, "y");
        assert_eq!(s.dims[2].name, "xi");
    }
}
