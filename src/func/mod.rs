//! Funcs: named computations with a pure definition, optional update
//! definitions, and a deferred schedule.

pub mod definition;
pub mod func_ref;
pub mod reductions;
pub mod realize;

pub use func_ref::{AccumulateOp, FuncRef};
pub use reductions::{lambda, maximum, minimum, product, sum};
pub use realize::CompiledEntry;

use crate::ir::expr::{Call, Expr, ExprKind};
use crate::ir::types::Type;
use crate::ir::var::{RDom, Var};
use crate::transform::ScheduleDirective;
use crate::utils::config::JitConfig;
use crate::utils::errors::{compile_error, CompileErrorKind, FlowResult};
use crate::utils::intern::unique_name;
use log::debug;
use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

static FUNC_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An ordered group of values produced by one definition.
#[derive(Clone, Default, Debug)]
pub struct Tuple(pub Vec<Expr>);

impl Tuple {
    pub fn new(values: Vec<Expr>) -> Self {
        Tuple(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&Expr> {
        self.0.get(i)
    }
}

impl From<Vec<Expr>> for Tuple {
    fn from(values: Vec<Expr>) -> Self {
        Tuple(values)
    }
}

impl<const N: usize> From<[Expr; N]> for Tuple {
    fn from(values: [Expr; N]) -> Self {
        Tuple(values.to_vec())
    }
}

impl From<Expr> for Tuple {
    fn from(value: Expr) -> Self {
        Tuple(vec![value])
    }
}

/// One update (reduction) step of a Func.
#[derive(Debug, Clone)]
pub struct UpdateDefinition {
    pub args: Vec<Expr>,
    pub values: Vec<Expr>,
    pub domain: Option<RDom>,
}

pub(crate) struct FunctionContents {
    pub id: u64,
    pub name: String,
    pub declared_type: Option<Type>,
    pub args: Vec<Var>,
    /// Empty until the pure definition is installed.
    pub values: Vec<Expr>,
    pub updates: Vec<UpdateDefinition>,
    pub directives: Vec<ScheduleDirective>,
    pub trace: bool,
    /// Bumped on every definition or schedule change.
    pub version: u64,
    pub compiled: Option<CompiledEntry>,
    /// Set by `compile_jit_with`; later realizations reuse it.
    pub jit_config: Option<JitConfig>,
}

impl FunctionContents {
    fn touch(&mut self) {
        self.version += 1;
        self.compiled = None;
    }
}

/// A handle to a named computation.
///
/// Cloning a `Func` yields another handle to the same Func; definitions and
/// schedule directives added through any handle are visible through all.
#[derive(Clone)]
pub struct Func {
    pub(crate) contents: Rc<RefCell<FunctionContents>>,
}

/// How a Call refers to its Func. Calls a Func makes to itself from its
/// update definitions are weak so a Func never keeps itself alive.
#[derive(Clone)]
pub(crate) enum FuncPtr {
    Strong(Func),
    Weak(Weak<RefCell<FunctionContents>>),
}

impl FuncPtr {
    pub fn upgrade(&self) -> Option<Func> {
        match self {
            FuncPtr::Strong(f) => Some(f.clone()),
            FuncPtr::Weak(w) => w.upgrade().map(|contents| Func { contents }),
        }
    }
}

impl Func {
    pub fn new(name: &str) -> Self {
        let id = FUNC_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            contents: Rc::new(RefCell::new(FunctionContents {
                id,
                name: name.to_string(),
                declared_type: None,
                args: Vec::new(),
                values: Vec::new(),
                updates: Vec::new(),
                directives: Vec::new(),
                trace: false,
                version: 0,
                compiled: None,
                jit_config: None,
            })),
        }
    }

    /// A Func whose single output must have type `ty`.
    pub fn with_type(name: &str, ty: Type) -> Self {
        let f = Self::new(name);
        f.contents.borrow_mut().declared_type = Some(ty);
        f
    }

    pub fn anonymous() -> Self {
        Self::new(&unique_name("f"))
    }

    pub(crate) fn contents(&self) -> Ref<'_, FunctionContents> {
        self.contents.borrow()
    }

    pub fn id(&self) -> u64 {
        self.contents.borrow().id
    }

    pub fn name(&self) -> String {
        self.contents.borrow().name.clone()
    }

    pub fn version(&self) -> u64 {
        self.contents.borrow().version
    }

    /// Whether a pure definition has been installed.
    pub fn defined(&self) -> bool {
        !self.contents.borrow().values.is_empty()
    }

    pub fn args(&self) -> Vec<Var> {
        self.contents.borrow().args.clone()
    }

    pub fn dimensions(&self) -> usize {
        self.contents.borrow().args.len()
    }

    /// Number of values each point of the Func holds.
    pub fn outputs(&self) -> usize {
        self.contents.borrow().values.len()
    }

    pub fn output_types(&self) -> Vec<Type> {
        let c = self.contents.borrow();
        if c.values.is_empty() {
            return c.declared_type.into_iter().collect();
        }
        c.values.iter().filter_map(Expr::ty).collect()
    }

    /// The pure definition's single value (undefined for Tuples).
    pub fn value(&self) -> Expr {
        let c = self.contents.borrow();
        match c.values.as_slice() {
            [v] => v.clone(),
            _ => Expr::undefined(),
        }
    }

    pub fn values(&self) -> Tuple {
        Tuple(self.contents.borrow().values.clone())
    }

    pub fn has_update_definition(&self) -> bool {
        !self.contents.borrow().updates.is_empty()
    }

    pub fn num_update_definitions(&self) -> usize {
        self.contents.borrow().updates.len()
    }

    pub fn update_definitions(&self) -> Vec<UpdateDefinition> {
        self.contents.borrow().updates.clone()
    }

    pub fn schedule_directives(&self) -> Vec<ScheduleDirective> {
        self.contents.borrow().directives.clone()
    }

    /// Bind the Func to argument Exprs for a later call or definition.
    pub fn at<I, E>(&self, args: I) -> FuncRef
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        FuncRef::new(self, args.into_iter().map(Into::into).collect())
    }

    /// Read the Func's (single) value at the given arguments.
    pub fn call<I, E>(&self, args: I) -> Expr
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        self.at(args).read()
    }

    pub(crate) fn make_call(&self, args: Vec<Expr>, value_index: usize, explicit_index: bool) -> Expr {
        if args.iter().any(|a| !a.defined()) {
            return Expr::undefined();
        }
        let types = self.output_types();
        let ty = types
            .get(value_index)
            .or_else(|| types.first())
            .copied()
            .unwrap_or(Type::int(32));
        let c = self.contents.borrow();
        Expr::new(
            ty,
            ExprKind::Call(Call {
                target: FuncPtr::Strong(self.clone()),
                func_id: c.id,
                name: c.name.clone(),
                args,
                value_index,
                explicit_index,
            }),
        )
    }

    /// Install the pure definition `self(args) = value`.
    pub fn define(&self, args: &[Var], value: impl Into<Expr>) -> FlowResult<()> {
        self.define_tuple(args, Tuple::from(value.into()))
    }

    pub fn define_tuple(&self, args: &[Var], values: impl Into<Tuple>) -> FlowResult<()> {
        let args: Vec<Expr> = args.iter().map(Expr::from).collect();
        self.install_pure(&args, values.into().0)
    }

    /// Append the update definition `self(args) = value`.
    pub fn update<I, E>(&self, args: I, value: impl Into<Expr>) -> FlowResult<()>
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        self.update_tuple(args, Tuple::from(value.into()))
    }

    pub fn update_tuple<I, E>(&self, args: I, values: impl Into<Tuple>) -> FlowResult<()>
    where
        I: IntoIterator<Item = E>,
        E: Into<Expr>,
    {
        let args: Vec<Expr> = args.into_iter().map(Into::into).collect();
        self.install_update(&args, values.into().0)
    }

    /// Route a FuncRef assignment to a pure or an update definition.
    pub(crate) fn assign(&self, args: &[Expr], values: Vec<Expr>) -> FlowResult<()> {
        if self.defined() {
            self.install_update(args, values)
        } else {
            self.install_pure(args, values)
        }
    }

    fn install_pure(&self, args: &[Expr], values: Vec<Expr>) -> FlowResult<()> {
        if self.defined() {
            return Err(compile_error(
                CompileErrorKind::Redefinition,
                format!("Func {} already has a pure definition", self.name()),
            ));
        }
        let (vars, values) = definition::check_pure(self, args, &values)?;
        let mut c = self.contents.borrow_mut();
        debug!("Defining {}({:?}) with {} value(s)", c.name, vars, values.len());
        c.args = vars;
        c.values = values;
        c.touch();
        Ok(())
    }

    fn install_update(&self, args: &[Expr], values: Vec<Expr>) -> FlowResult<()> {
        if !self.defined() {
            return Err(compile_error(
                CompileErrorKind::UndefinedFunc,
                format!("Can't add an update definition to {} before its pure definition", self.name()),
            ));
        }
        let update = definition::check_update(self, args, &values)?;
        let update = definition::weaken_self_calls(self, update);
        let mut c = self.contents.borrow_mut();
        debug!("Adding update {} to {}", c.updates.len() + 1, c.name);
        c.updates.push(update);
        c.touch();
        Ok(())
    }

    fn push_directive(&self, directive: ScheduleDirective) -> &Self {
        let mut c = self.contents.borrow_mut();
        c.directives.push(directive);
        c.touch();
        self
    }

    /// Split `old` into `outer * factor + inner`.
    pub fn split(&self, old: Var, outer: Var, inner: Var, factor: impl Into<Expr>) -> &Self {
        self.push_directive(ScheduleDirective::Split { old, outer, inner, factor: factor.into() })
    }

    /// Split `x` and `y` and make the two inner dimensions innermost.
    pub fn tile(
        &self,
        x: Var,
        y: Var,
        xi: Var,
        yi: Var,
        x_factor: impl Into<Expr>,
        y_factor: impl Into<Expr>,
    ) -> &Self {
        self.push_directive(ScheduleDirective::Tile {
            x,
            y,
            xi,
            yi,
            x_factor: x_factor.into(),
            y_factor: y_factor.into(),
        })
    }

    pub fn vectorize(&self, var: Var) -> &Self {
        self.push_directive(ScheduleDirective::Vectorize { var, factor: None })
    }

    /// Split `var` by `factor` and vectorize the inner dimension.
    pub fn vectorize_by(&self, var: Var, factor: impl Into<Expr>) -> &Self {
        self.push_directive(ScheduleDirective::Vectorize { var, factor: Some(factor.into()) })
    }

    pub fn unroll(&self, var: Var) -> &Self {
        self.push_directive(ScheduleDirective::Unroll { var, factor: None })
    }

    pub fn unroll_by(&self, var: Var, factor: impl Into<Expr>) -> &Self {
        self.push_directive(ScheduleDirective::Unroll { var, factor: Some(factor.into()) })
    }

    pub fn parallel(&self, var: Var) -> &Self {
        self.push_directive(ScheduleDirective::Parallel { var })
    }

    /// Swap the loop positions of two dimensions.
    pub fn transpose(&self, a: Var, b: Var) -> &Self {
        self.push_directive(ScheduleDirective::Transpose { a, b })
    }

    /// Compute this Func per iteration of its consumer's loop over `var`.
    pub fn chunk(&self, var: Var) -> &Self {
        self.push_directive(ScheduleDirective::Chunk { var })
    }

    /// Compute this Func once, in full, before anything that uses it.
    pub fn root(&self) -> &Self {
        self.push_directive(ScheduleDirective::Root)
    }

    /// Fuse this Func into every use site (the default).
    pub fn inline(&self) -> &Self {
        self.push_directive(ScheduleDirective::Inline)
    }

    /// Pick a semantics-preserving schedule at random, seeded by `seed`.
    pub fn random(&self, seed: u64) -> &Self {
        self.push_directive(ScheduleDirective::Random { seed })
    }

    /// Log every store this Func performs when it runs.
    pub fn trace_stores(&self) -> &Self {
        let mut c = self.contents.borrow_mut();
        c.trace = true;
        c.touch();
        self
    }

    pub fn is_tracing(&self) -> bool {
        self.contents.borrow().trace
    }
}

impl PartialEq for Func {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.contents, &other.contents)
    }
}

impl Eq for Func {}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.contents.borrow();
        write!(f, "Func({}", c.name)?;
        if !c.values.is_empty() {
            write!(f, ", {} args, {} updates", c.args.len(), c.updates.len())?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.contents.borrow();
        let args: Vec<String> = c.args.iter().map(|v| v.name()).collect();
        let values: Vec<String> = c.values.iter().map(|v| v.to_string()).collect();
        writeln!(f, "{}({}) = {}", c.name, args.join(", "), values.join(", "))?;
        for u in &c.updates {
            let args: Vec<String> = u.args.iter().map(|a| a.to_string()).collect();
            let values: Vec<String> = u.values.iter().map(|v| v.to_string()).collect();
            writeln!(f, "{}({}) = {}", c.name, args.join(", "), values.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::var::Range;

    #[test]
    fn test_pure_definition() {
        let x = Var::new("x");
        let f = Func::new("f");
        assert!(!f.defined());
        f.at([x]).assign(x * 2).unwrap();
        assert!(f.defined());
        assert_eq!(f.args(), vec![x]);
        assert_eq!(f.output_types(), vec![Type::int(32)]);
        assert!(!f.has_update_definition());
    }

    #[test]
    fn test_update_and_version() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.define(&[x], x).unwrap();
        let v = f.version();
        f.at([x]).add_assign(1).unwrap();
        assert!(f.has_update_definition());
        assert!(f.version() > v);
    }

    #[test]
    fn test_self_calls_are_weak() {
        let x = Var::new("x");
        let r = RDom::new(Range::new(0, 4));
        let f = Func::new("f");
        f.define(&[x], 0).unwrap();
        f.at([r.x()]).add_assign(1).unwrap();
        assert_eq!(Rc::strong_count(&f.contents), 1);
    }

    #[test]
    fn test_schedule_directives_accumulate_in_order() {
        let (x, y, xi, yi) = (Var::new("x"), Var::new("y"), Var::new("xi"), Var::new("yi"));
        let f = Func::new("f");
        f.define(&[x, y], x + y).unwrap();
        f.tile(x, y, xi, yi, 4, 4).vectorize(xi).parallel(y);
        let ds = f.schedule_directives();
        assert_eq!(ds.len(), 3);
        assert!(matches!(ds[0], ScheduleDirective::Tile { .. }));
        assert!(matches!(ds[2], ScheduleDirective::Parallel { .. }));
    }

    #[test]
    fn test_call_type_follows_definition() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.define(&[x], crate::ir::expr::cast(Type::float(32), x)).unwrap();
        assert_eq!(f.call([x]).ty(), Some(Type::float(32)));
    }
}
