//! Per-compilation dependency discovery.
//!
//! An `Environment` is built fresh for every compilation from the output
//! Func. It lists every Func the output transitively calls, every scalar
//! and image parameter referenced along the way, and the call edges
//! between Funcs. Nothing is registered globally, so nothing outlives the
//! compilation that needed it.

use crate::func::Func;
use crate::ir::expr::{Expr, ExprKind};
use crate::ir::param::{ImageParam, Param};
use crate::utils::errors::{compile_error, internal_error, CompileErrorKind, FlowResult};
use log::debug;
use std::collections::{BTreeSet, HashMap};

/// Identity of everything a compiled artifact depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// (Func id, version), in topological order.
    pub funcs: Vec<(u64, u64)>,
    /// (Param id, range version), in discovery order.
    pub params: Vec<(u64, u64)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

#[derive(Debug, Clone)]
pub struct Environment {
    output: Func,
    /// Producers before consumers; the output is last.
    funcs: Vec<Func>,
    params: Vec<Param>,
    images: Vec<ImageParam>,
    /// Func id to the ids of the other Funcs it calls.
    callees: HashMap<u64, BTreeSet<u64>>,
}

impl Environment {
    /// Discover everything `output` depends on.
    pub fn discover(output: &Func) -> FlowResult<Self> {
        let mut env = Environment {
            output: output.clone(),
            funcs: Vec::new(),
            params: Vec::new(),
            images: Vec::new(),
            callees: HashMap::new(),
        };
        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        env.visit(output, &mut marks, &mut stack)?;
        env.check_names()?;
        debug!(
            "environment of {}: funcs [{}], {} params, {} images",
            output.name(),
            env.funcs.iter().map(|f| f.name()).collect::<Vec<_>>().join(", "),
            env.params.len(),
            env.images.len()
        );
        Ok(env)
    }

    fn visit(&mut self, func: &Func, marks: &mut HashMap<u64, Mark>, stack: &mut Vec<String>) -> FlowResult<()> {
        match marks.get(&func.id()) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                stack.push(func.name());
                return Err(compile_error(
                    CompileErrorKind::CyclicDependency,
                    format!("Funcs depend on each other cyclically: {}", stack.join(" -> ")),
                ));
            }
            None => {}
        }
        if !func.defined() {
            return Err(compile_error(
                CompileErrorKind::UndefinedFunc,
                format!("Func {} has no definition", func.name()),
            ));
        }
        marks.insert(func.id(), Mark::Visiting);
        stack.push(func.name());

        let mut callees = BTreeSet::new();
        for e in definition_exprs(func) {
            for call in e.calls() {
                if call.func_id == func.id() {
                    continue;
                }
                let callee = call.func().ok_or_else(|| {
                    internal_error(format!("{} calls {}, which no longer exists", func.name(), call.name()))
                })?;
                callees.insert(callee.id());
                self.visit(&callee, marks, stack)?;
            }
            self.collect_params(&e);
        }
        self.callees.insert(func.id(), callees);

        stack.pop();
        marks.insert(func.id(), Mark::Done);
        self.funcs.push(func.clone());
        Ok(())
    }

    fn collect_params(&mut self, e: &Expr) {
        let mut found = Vec::new();
        e.visit(&mut |node| {
            match node.kind() {
                Some(ExprKind::Param(p)) => found.push(Found::Param(p.clone())),
                Some(ExprKind::ImageLoad { image, .. }) | Some(ExprKind::ImageExtent { image, .. }) => {
                    found.push(Found::Image(image.clone()))
                }
                _ => {}
            }
            true
        });
        for item in found {
            match item {
                Found::Param(p) => {
                    if self.params.iter().any(|q| q.id() == p.id()) {
                        continue;
                    }
                    let (lo, hi) = (p.min(), p.max());
                    self.params.push(p);
                    self.collect_params(&lo);
                    self.collect_params(&hi);
                }
                Found::Image(image) => {
                    if !self.images.iter().any(|i| i.id() == image.id()) {
                        self.images.push(image);
                    }
                }
            }
        }
    }

    fn check_names(&self) -> FlowResult<()> {
        let mut seen: HashMap<String, (&'static str, u64)> = HashMap::new();
        let named = self
            .funcs
            .iter()
            .map(|f| (f.name(), "Func", f.id()))
            .chain(self.params.iter().map(|p| (p.name(), "Param", p.id())))
            .chain(self.images.iter().map(|i| (i.name(), "ImageParam", i.id())));
        for (name, what, id) in named {
            match seen.get(&name) {
                Some(&(other, other_id)) if other != what || other_id != id => {
                    return Err(compile_error(
                        CompileErrorKind::DuplicateName,
                        format!("{} {} shares its name with a distinct {}", what, name, other),
                    ));
                }
                _ => {
                    seen.insert(name, (what, id));
                }
            }
        }
        Ok(())
    }

    pub fn output(&self) -> &Func {
        &self.output
    }

    pub fn funcs(&self) -> &[Func] {
        &self.funcs
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn images(&self) -> &[ImageParam] {
        &self.images
    }

    pub fn func(&self, id: u64) -> Option<&Func> {
        self.funcs.iter().find(|f| f.id() == id)
    }

    /// Funcs that call `func` directly.
    pub fn consumers(&self, func: &Func) -> Vec<Func> {
        self.funcs
            .iter()
            .filter(|f| self.callees.get(&f.id()).map_or(false, |c| c.contains(&func.id())))
            .cloned()
            .collect()
    }

    pub fn callees(&self, func: &Func) -> Vec<Func> {
        self.callees
            .get(&func.id())
            .map(|ids| ids.iter().filter_map(|id| self.func(*id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            funcs: self.funcs.iter().map(|f| (f.id(), f.version())).collect(),
            params: self.params.iter().map(|p| (p.id(), p.range_version())).collect(),
        }
    }
}

enum Found {
    Param(Param),
    Image(ImageParam),
}

/// Every Expr a Func's definitions contain, reduction bounds included.
fn definition_exprs(func: &Func) -> Vec<Expr> {
    let mut exprs = func.values().0;
    for update in func.update_definitions() {
        exprs.extend(update.args.iter().cloned());
        exprs.extend(update.values.iter().cloned());
        if let Some(dom) = &update.domain {
            for rv in dom.vars() {
                exprs.push(rv.min.clone());
                exprs.push(rv.extent.clone());
            }
        }
    }
    exprs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Type;
    use crate::ir::var::Var;

    #[test]
    fn test_topological_order() {
        let x = Var::new("x");
        let a = Func::new("a");
        a.define(&[x], x * 2).unwrap();
        let b = Func::new("b");
        b.define(&[x], a.call([x]) + 1).unwrap();
        let c = Func::new("c");
        c.define(&[x], a.call([x]) + b.call([x])).unwrap();
        let env = Environment::discover(&c).unwrap();
        let names: Vec<String> = env.funcs().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(env.consumers(&a).len(), 2);
        assert_eq!(env.callees(&c).len(), 2);
    }

    #[test]
    fn test_params_and_images() {
        let x = Var::new("x");
        let p = Param::new("p", Type::float(32));
        let lo = Param::new("lo", Type::float(32));
        p.set_range(&lo, 10.0f32);
        let img = ImageParam::new("img", Type::float(32), 1);
        let f = Func::new("f");
        f.define(&[x], img.at([x]) * &p).unwrap();
        let env = Environment::discover(&f).unwrap();
        assert_eq!(env.params().len(), 2);
        assert_eq!(env.images().len(), 1);
    }

    #[test]
    fn test_duplicate_names() {
        let x = Var::new("x");
        let a1 = Func::new("dup");
        a1.define(&[x], x).unwrap();
        let a2 = Func::new("dup");
        a2.define(&[x], x + 1).unwrap();
        let f = Func::new("f");
        f.define(&[x], a1.call([x]) + a2.call([x])).unwrap();
        let err = Environment::discover(&f).unwrap_err();
        assert!(matches!(err.as_compile().map(|e| e.kind), Some(CompileErrorKind::DuplicateName)));
    }

    #[test]
    fn test_cycle_through_update() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.define(&[x], x).unwrap();
        let g = Func::new("g");
        g.define(&[x], f.call([x]) + 1).unwrap();
        f.update([x], g.call([x])).unwrap();
        let err = Environment::discover(&g).unwrap_err();
        assert!(matches!(err.as_compile().map(|e| e.kind), Some(CompileErrorKind::CyclicDependency)));
    }

    #[test]
    fn test_cache_key_tracks_versions() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.define(&[x], x).unwrap();
        let before = Environment::discover(&f).unwrap().cache_key();
        f.parallel(x);
        let after = Environment::discover(&f).unwrap().cache_key();
        assert_ne!(before, after);
    }
}
