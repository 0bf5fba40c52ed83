//! Index variables and reduction domains.

use crate::ir::expr::Expr;
use crate::utils::intern::{intern, unique_name, Symbol};
use std::fmt;
use std::ops::Mul;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A named index dimension.
///
/// Two Vars are the same Var exactly when they have the same name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(Symbol);

impl Var {
    pub fn new(name: &str) -> Self {
        Var(intern(name))
    }

    /// A Var with a fresh, process-unique name.
    pub fn fresh() -> Self {
        Var(intern(&unique_name("v")))
    }

    pub fn name(&self) -> String {
        self.0.as_string()
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Var({})", self.name())
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An ordered list of `(min, extent)` intervals.
///
/// `a * b` concatenates the dimensions of `a` and `b`.
#[derive(Clone, Default)]
pub struct Range {
    pub dims: Vec<(Expr, Expr)>,
}

impl Range {
    pub fn new(min: impl Into<Expr>, extent: impl Into<Expr>) -> Self {
        Self { dims: vec![(min.into(), extent.into())] }
    }

    pub fn len(&self) -> usize {
        self.dims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }
}

impl Mul for Range {
    type Output = Range;

    fn mul(mut self, rhs: Range) -> Range {
        self.dims.extend(rhs.dims);
        self
    }
}

impl Mul<&Range> for &Range {
    type Output = Range;

    fn mul(self, rhs: &Range) -> Range {
        self.clone() * rhs.clone()
    }
}

static DOMAIN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One dimension of a reduction domain.
#[derive(Clone)]
pub(crate) struct ReductionVariable {
    pub name: String,
    pub min: Expr,
    pub extent: Expr,
}

pub(crate) struct ReductionDomain {
    pub id: u64,
    pub name: String,
    pub vars: Vec<ReductionVariable>,
}

/// A multi-dimensional reduction domain.
#[derive(Clone)]
pub struct RDom {
    pub(crate) domain: Rc<ReductionDomain>,
}

const DIM_NAMES: [&str; 4] = ["x", "y", "z", "w"];

impl RDom {
    pub fn new(range: Range) -> Self {
        Self::named(&unique_name("r"), range)
    }

    pub fn named(name: &str, range: Range) -> Self {
        let vars = range
            .dims
            .into_iter()
            .enumerate()
            .map(|(i, (min, extent))| ReductionVariable {
                name: match DIM_NAMES.get(i) {
                    Some(d) => format!("{}.{}", name, d),
                    None => format!("{}.{}", name, i),
                },
                min,
                extent,
            })
            .collect();
        let id = DOMAIN_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            domain: Rc::new(ReductionDomain { id, name: name.to_string(), vars }),
        }
    }

    /// One-dimensional domain `[min, min + extent)`.
    pub fn range(min: impl Into<Expr>, extent: impl Into<Expr>) -> Self {
        Self::new(Range::new(min, extent))
    }

    pub fn name(&self) -> &str {
        &self.domain.name
    }

    pub fn dimensions(&self) -> usize {
        self.domain.vars.len()
    }

    pub fn id(&self) -> u64 {
        self.domain.id
    }

    /// The reduction variable for dimension `i`.
    pub fn dim(&self, i: usize) -> RVar {
        RVar { domain: self.clone(), index: i }
    }

    pub fn x(&self) -> RVar {
        self.dim(0)
    }

    pub fn y(&self) -> RVar {
        self.dim(1)
    }

    pub fn z(&self) -> RVar {
        self.dim(2)
    }

    pub fn w(&self) -> RVar {
        self.dim(3)
    }

    pub(crate) fn vars(&self) -> &[ReductionVariable] {
        &self.domain.vars
    }
}

impl fmt::Debug for RDom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RDom({}, {} dims)", self.domain.name, self.domain.vars.len())
    }
}

/// A single dimension of an `RDom`.
#[derive(Clone)]
pub struct RVar {
    pub(crate) domain: RDom,
    pub(crate) index: usize,
}

impl RVar {
    pub fn name(&self) -> String {
        match self.domain.vars().get(self.index) {
            Some(v) => v.name.clone(),
            None => format!("{}.{}", self.domain.name(), self.index),
        }
    }

    pub fn domain(&self) -> &RDom {
        &self.domain
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn min(&self) -> Expr {
        self.domain.vars().get(self.index).map(|v| v.min.clone()).unwrap_or_default()
    }

    pub fn extent(&self) -> Expr {
        self.domain.vars().get(self.index).map(|v| v.extent.clone()).unwrap_or_default()
    }
}

impl PartialEq for RVar {
    fn eq(&self, other: &Self) -> bool {
        self.domain.id() == other.domain.id() && self.index == other.index
    }
}

impl Eq for RVar {}

impl fmt::Debug for RVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RVar({})", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_identity() {
        let a = Var::new("x");
        let b = Var::new("x");
        let c = Var::new("y");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(Var::fresh(), Var::fresh());
    }

    #[test]
    fn test_range_composition() {
        let r = Range::new(0, 10) * Range::new(2, 5) * Range::new(0, 3);
        assert_eq!(r.len(), 3);
        assert_eq!(r.dims[1].0.as_int(), Some(2));
        assert_eq!(r.dims[2].1.as_int(), Some(3));
    }

    #[test]
    fn test_rdom_vars() {
        let r = RDom::named("r", Range::new(0, 10) * Range::new(0, 4));
        assert_eq!(r.dimensions(), 2);
        assert_eq!(r.x().name(), "r.x");
        assert_eq!(r.y().name(), "r.y");
        assert_eq!(r.y().extent().as_int(), Some(4));
        assert_eq!(r.x(), r.dim(0));
        assert_ne!(r.x(), r.y());
    }
}
