//! Splitting and tiling.
//!
//! Splitting replaces one loop by two nested loops whose combined
//! iteration space covers the original one, rounded up to a multiple of
//! the factor:
//! ```text
//! for x in [0, W):
//!   f[x] = ...
//! ```
//! becomes, after `split(x, xo, xi, 4)`:
//! ```text
//! for xo in [0, (W + 3) / 4):
//!   for xi in [0, 4):
//!     x = xo * 4 + xi
//!     if x < W: f[x] = ...
//! ```
//! Tiling splits two loops and moves both inner loops inside both outer
//! ones.

use crate::transform::schedule::Schedule;
use crate::transform::Transform;
use crate::utils::errors::FlowResult;

/// Split one loop into an outer and an inner loop.
#[derive(Debug, Clone)]
pub struct Split {
    /// The loop being split
    pub old: String,
    /// Name of the new outer loop, which may reuse `old`
    pub outer: String,
    /// Name of the new inner loop
    pub inner: String,
    /// Extent of the inner loop
    pub factor: i64,
}

impl Split {
    /// Create a split of `old` by `factor`.
    ///
    /// `factor` must be positive; this is checked when the split is
    /// applied, not here.
    pub fn new(old: &str, outer: &str, inner: &str, factor: i64) -> Self {
        Self {
            old: old.to_string(),
            outer: outer.to_string(),
            inner: inner.to_string(),
            factor,
        }
    }
}

impl Transform for Split {
    fn apply(&self, schedule: &mut Schedule) -> FlowResult<()> {
        let old = schedule.resolve(&self.old)?;
        schedule.split_dim(&old, &self.outer, &self.inner, self.factor)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "split"
    }
}

/// Two splits, reordered to `[xi, yi, x, y]` (innermost first).
#[derive(Debug, Clone)]
pub struct Tile {
    /// The first loop, which keeps its name as the outer tile loop
    pub x: String,
    /// The second loop, which keeps its name as the outer tile loop
    pub y: String,
    /// Name of the inner loop over `x`
    pub xi: String,
    /// Name of the inner loop over `y`
    pub yi: String,
    /// Tile width
    pub x_factor: i64,
    /// Tile height
    pub y_factor: i64,
}

impl Tile {
    /// Create an `x_factor` by `y_factor` tiling of `x` and `y`.
    pub fn new(x: &str, y: &str, xi: &str, yi: &str, x_factor: i64, y_factor: i64) -> Self {
        Self {
            x: x.to_string(),
            y: y.to_string(),
            xi: xi.to_string(),
            yi: yi.to_string(),
            x_factor,
            y_factor,
        }
    }
}

impl Transform for Tile {
    fn apply(&self, schedule: &mut Schedule) -> FlowResult<()> {
        let x = schedule.resolve(&self.x)?;
        let y = schedule.resolve(&self.y)?;
        let (_, xi) = schedule.split_dim(&x, &self.x, &self.xi, self.x_factor)?;
        let (_, yi) = schedule.split_dim(&y, &self.y, &self.yi, self.y_factor)?;
        schedule.move_outside_of(&yi, &xi)
    }

    fn name(&self) -> &str {
        "tile"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::var::Var;

    fn loop_names(s: &Schedule) -> Vec<&str> {
        s.dims.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_split_order() {
        let mut s = Schedule::new(&[Var::new("x"), Var::new("y")]);
        Split::new("x", "xo", "xi", 4).apply(&mut s).unwrap();
        assert_eq!(loop_names(&s), vec!["xi", "xo", "y"]);
        assert_eq!(s.splits[0].old, "x");
    }

    #[test]
    fn test_split_twice() {
        let mut s = Schedule::new(&[Var::new("x")]);
        Split::new("x", "x", "xi", 8).apply(&mut s).unwrap();
        Split::new("xi", "xi", "xii", 2).apply(&mut s).unwrap();
        assert_eq!(loop_names(&s), vec!["xii", "xi.1", "x.1"]);
        assert_eq!(s.splits[1].old, "xi");
    }

    #[test]
    fn test_tile_layout() {
        let mut s = Schedule::new(&[Var::new("x"), Var::new("y")]);
        Tile::new("x", "y", "xi", "yi", 4, 4).apply(&mut s).unwrap();
        assert_eq!(loop_names(&s), vec!["xi", "yi", "x.1", "y.1"]);
        assert_eq!(s.resolve("y").unwrap(), "y.1");
    }

    #[test]
    fn test_split_unknown_var() {
        let mut s = Schedule::new(&[Var::new("x")]);
        let err = Split::new("q", "qo", "qi", 2).apply(&mut s).unwrap_err();
        assert!(err.is_compile());
    }
}
