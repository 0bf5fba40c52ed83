//! The resolved loop structure of one Func's pure definition.
//!
//! A schedule starts as the default nest (first argument innermost, all
//! loops serial, computed inline) and is rewritten by each directive in
//! turn. Dimensions carry internal names that stay unique even when a
//! directive reuses a user-visible name, e.g. `split(x, x, xi, 4)`.

use crate::ir::plan::ForKind;
use crate::ir::var::Var;
use crate::utils::errors::{compile_error, CompileErrorKind, FlowResult};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// One loop of the nest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dim {
    pub name: String,
    pub kind: ForKind,
}

/// `old = outer * factor + inner`, recorded in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRecord {
    pub old: String,
    pub outer: String,
    pub inner: String,
    pub factor: i64,
}

/// Where a Func's values are computed and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputeLevel {
    /// Recomputed at every use site.
    Inline,
    /// Materialized once, in full, before any consumer runs.
    Root,
    /// Materialized per iteration of the consumer loop over the Var.
    Chunk(Var),
}

#[derive(Debug, Clone)]
pub struct Schedule {
    /// Innermost first.
    pub dims: Vec<Dim>,
    pub splits: Vec<SplitRecord>,
    pub compute: ComputeLevel,
    /// Pure argument names, in declaration order.
    pub pure_args: Vec<String>,
    aliases: HashMap<String, String>,
    used: HashSet<String>,
}

impl Schedule {
    /// The default schedule for a Func with the given pure arguments.
    pub fn new(args: &[Var]) -> Self {
        let names: Vec<String> = args.iter().map(|v| v.name()).collect();
        Self {
            dims: names
                .iter()
                .map(|n| Dim { name: n.clone(), kind: ForKind::Serial })
                .collect(),
            splits: Vec::new(),
            compute: ComputeLevel::Inline,
            aliases: names.iter().map(|n| (n.clone(), n.clone())).collect(),
            used: names.iter().cloned().collect(),
            pure_args: names,
        }
    }

    /// The internal dimension a user-visible name currently refers to.
    pub fn resolve(&self, name: &str) -> FlowResult<String> {
        match self.aliases.get(name) {
            Some(internal) if self.position(internal).is_some() => Ok(internal.clone()),
            _ => Err(compile_error(
                CompileErrorKind::InvalidSchedule,
                format!(
                    "No loop dimension named {} (loops are {})",
                    name,
                    self.dims.iter().map(|d| d.name.as_str()).collect::<Vec<_>>().join(", ")
                ),
            )),
        }
    }

    /// The internal name `name` refers to, whether or not it is still a loop.
    pub fn internal_name(&self, name: &str) -> Option<&str> {
        self.aliases.get(name).map(String::as_str)
    }

    pub fn position(&self, internal: &str) -> Option<usize> {
        self.dims.iter().position(|d| d.name == internal)
    }

    pub fn dim_mut(&mut self, internal: &str) -> Option<&mut Dim> {
        self.dims.iter_mut().find(|d| d.name == internal)
    }

    pub fn dim(&self, internal: &str) -> Option<&Dim> {
        self.dims.iter().find(|d| d.name == internal)
    }

    /// Allocate a fresh internal name for the user-visible `name` and
    /// make `name` refer to it.
    fn introduce(&mut self, name: &str) -> String {
        let mut internal = name.to_string();
        let mut n = 0;
        while self.used.contains(&internal) {
            n += 1;
            internal = format!("{}.{}", name, n);
        }
        self.used.insert(internal.clone());
        self.aliases.insert(name.to_string(), internal.clone());
        internal
    }

    /// Replace the loop `old` with `outer` and `inner`, inner directly
    /// inside outer. Returns the internal names of the two new loops.
    pub fn split_dim(&mut self, old: &str, outer: &str, inner: &str, factor: i64) -> FlowResult<(String, String)> {
        let pos = self.position(old).ok_or_else(|| {
            compile_error(CompileErrorKind::InvalidSchedule, format!("Can't split {}: no such loop", old))
        })?;
        if factor <= 0 {
            return Err(compile_error(
                CompileErrorKind::InvalidSchedule,
                format!("Split factor for {} must be positive, got {}", old, factor),
            ));
        }
        if outer == inner {
            return Err(compile_error(
                CompileErrorKind::InvalidSchedule,
                format!("Can't split {} into two loops both named {}", old, outer),
            ));
        }
        for name in [outer, inner] {
            let clashes = self
                .internal_name(name)
                .map_or(false, |internal| internal != old && self.position(internal).is_some());
            if clashes {
                return Err(compile_error(
                    CompileErrorKind::InvalidSchedule,
                    format!("Can't split {}: a loop named {} already exists", old, name),
                ));
            }
        }
        let kind = self.dims[pos].kind;
        let outer = self.introduce(outer);
        let inner = self.introduce(inner);
        self.dims[pos] = Dim { name: outer.clone(), kind };
        self.dims.insert(pos, Dim { name: inner.clone(), kind: ForKind::Serial });
        self.splits.push(SplitRecord { old: old.to_string(), outer: outer.clone(), inner: inner.clone(), factor });
        Ok((outer, inner))
    }

    pub fn set_kind(&mut self, internal: &str, kind: ForKind) -> FlowResult<()> {
        match self.dim_mut(internal) {
            Some(d) => {
                d.kind = kind;
                Ok(())
            }
            None => Err(compile_error(
                CompileErrorKind::InvalidSchedule,
                format!("Can't mark {} as {}: no such loop", internal, kind),
            )),
        }
    }

    /// Exchange the positions of two loops.
    pub fn swap(&mut self, a: &str, b: &str) -> FlowResult<()> {
        match (self.position(a), self.position(b)) {
            (Some(i), Some(j)) => {
                self.dims.swap(i, j);
                Ok(())
            }
            _ => Err(compile_error(
                CompileErrorKind::InvalidSchedule,
                format!("Can't transpose {} and {}: no such loop", a, b),
            )),
        }
    }

    /// Move loop `name` so it sits directly outside loop `inside`.
    pub fn move_outside_of(&mut self, name: &str, inside: &str) -> FlowResult<()> {
        let from = self.position(name).ok_or_else(|| {
            compile_error(CompileErrorKind::InvalidSchedule, format!("No loop named {}", name))
        })?;
        let dim = self.dims.remove(from);
        let to = self.position(inside).ok_or_else(|| {
            compile_error(CompileErrorKind::InvalidSchedule, format!("No loop named {}", inside))
        })?;
        self.dims.insert(to + 1, dim);
        Ok(())
    }

    /// Whether the split producing `inner` needs a bounds guard.
    pub fn is_unguarded_lane(&self, inner: &str) -> bool {
        matches!(self.dim(inner).map(|d| d.kind), Some(ForKind::Vectorized | ForKind::Unrolled))
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self
            .dims
            .iter()
            .rev()
            .map(|d| match d.kind {
                ForKind::Serial => d.name.clone(),
                kind => format!("{} ({})", d.name, kind),
            })
            .collect();
        write!(f, "[{}] {:?}", dims.join(", "), self.compute)
    }
}
