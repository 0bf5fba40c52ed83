//! Validation of pure and update definitions.
//!
//! Every check runs before the Func is touched, so a rejected definition
//! leaves the Func exactly as it was.

use crate::func::{Func, FuncPtr, FunctionContents, UpdateDefinition};
use crate::ir::expr::{Call, Expr, ExprKind};
use crate::ir::var::{RDom, Var};
use crate::utils::errors::{internal_error, CompileError, CompileErrorKind, FlowError, FlowResult};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

struct Checker {
    name: String,
    id: u64,
}

impl Checker {
    fn new(func: &Func) -> Self {
        Self { name: func.name(), id: func.id() }
    }

    fn error(&self, kind: CompileErrorKind, message: impl Into<String>) -> FlowError {
        FlowError::Compile(CompileError::new(kind, message).with_subject(self.name.clone()))
    }

    fn require_defined(&self, exprs: &[Expr], what: &str) -> FlowResult<()> {
        if exprs.is_empty() {
            return Err(self.error(CompileErrorKind::UndefinedExpr, format!("{} of {} has no values", what, self.name)));
        }
        if let Some(i) = exprs.iter().position(|e| !e.defined()) {
            return Err(self.error(
                CompileErrorKind::UndefinedExpr,
                format!("Undefined expression in value {} of {} of {}", i, what, self.name),
            ));
        }
        Ok(())
    }

    /// Check every call and image read in `e`.
    fn check_reads(&self, e: &Expr) -> FlowResult<()> {
        let mut result = Ok(());
        e.visit(&mut |node| {
            if result.is_err() {
                return false;
            }
            match node.kind() {
                Some(ExprKind::Call(call)) => result = self.check_call(node, call),
                Some(ExprKind::ImageLoad { image, args }) => {
                    if args.len() != image.dimensions() {
                        result = Err(self.error(
                            CompileErrorKind::ArityMismatch,
                            format!(
                                "Image {} has {} dimensions but is read with {} arguments",
                                image.name(),
                                image.dimensions(),
                                args.len()
                            ),
                        ));
                    } else {
                        result = self.check_int_args(args, &format!("read of image {}", image.name()));
                    }
                }
                _ => {}
            }
            true
        });
        result
    }

    fn check_call(&self, node: &Expr, call: &Call) -> FlowResult<()> {
        let callee = call
            .func()
            .ok_or_else(|| internal_error(format!("Func {} was dropped while still referenced", call.name)))?;
        if !callee.defined() {
            let message = if callee.id() == self.id {
                format!("{} is used in its own pure definition", self.name)
            } else {
                format!("Func {} is called but has no definition", call.name)
            };
            return Err(self.error(CompileErrorKind::UndefinedFunc, message));
        }
        if call.args.len() != callee.dimensions() {
            return Err(self.error(
                CompileErrorKind::ArityMismatch,
                format!(
                    "Func {} takes {} arguments but is called with {}",
                    call.name,
                    callee.dimensions(),
                    call.args.len()
                ),
            ));
        }
        let outputs = callee.outputs();
        if call.explicit_index && call.value_index >= outputs {
            let message = if outputs == 1 {
                format!("Can't read element {} of {}, which is not a Tuple", call.value_index, call.name)
            } else {
                format!(
                    "Tuple index {} out of range: {} has {} values",
                    call.value_index, call.name, outputs
                )
            };
            return Err(self.error(CompileErrorKind::BadTupleIndex, message));
        }
        if !call.explicit_index && outputs > 1 {
            return Err(self.error(
                CompileErrorKind::BadTupleIndex,
                format!("{} returns a Tuple of {} values; read an element by index", call.name, outputs),
            ));
        }
        let expected = callee.output_types().get(call.value_index).copied();
        if node.ty() != expected {
            return Err(self.error(
                CompileErrorKind::TypeMismatch,
                format!("Call to {} was built before {} was defined with a different type", call.name, call.name),
            ));
        }
        self.check_int_args(&call.args, &format!("call to {}", call.name))
    }

    fn check_int_args(&self, args: &[Expr], what: &str) -> FlowResult<()> {
        for (i, a) in args.iter().enumerate() {
            match a.ty() {
                Some(t) if t.is_integer() => {}
                Some(t) => {
                    return Err(self.error(
                        CompileErrorKind::BadArgumentType,
                        format!("Argument {} of the {} is {} of type {}; arguments must be integers", i, what, a, t),
                    ))
                }
                None => {
                    return Err(self.error(
                        CompileErrorKind::UndefinedExpr,
                        format!("Argument {} of the {} is undefined", i, what),
                    ))
                }
            }
        }
        Ok(())
    }

    fn check_vars(&self, e: &Expr, bound: &[Var], what: &str) -> FlowResult<()> {
        match e.free_vars().into_iter().find(|v| !bound.contains(v)) {
            Some(v) => Err(self.error(
                CompileErrorKind::UnboundVar,
                format!("Variable {} is used in the {} of {} but is not one of its arguments", v, what, self.name),
            )),
            None => Ok(()),
        }
    }
}

/// Validate a pure definition. Returns the argument Vars and the values.
pub(crate) fn check_pure(func: &Func, args: &[Expr], values: &[Expr]) -> FlowResult<(Vec<Var>, Vec<Expr>)> {
    let checker = Checker::new(func);
    checker.require_defined(values, "the pure definition")?;

    let mut vars = Vec::with_capacity(args.len());
    for (i, a) in args.iter().enumerate() {
        match a.as_var() {
            Some(v) if vars.contains(&v) => {
                return Err(checker.error(
                    CompileErrorKind::NonVarArgument,
                    format!("Variable {} appears more than once in the pure definition of {}", v, checker.name),
                ))
            }
            Some(v) => vars.push(v),
            None if !a.defined() => {
                return Err(checker.error(
                    CompileErrorKind::UndefinedExpr,
                    format!("Argument {} in the pure definition of {} is undefined", i, checker.name),
                ))
            }
            None => {
                return Err(checker.error(
                    CompileErrorKind::NonVarArgument,
                    format!(
                        "Argument {} in the pure definition of {} is {}, which is not a Var",
                        i, checker.name, a
                    ),
                ))
            }
        }
    }

    if let Some(declared) = func.contents().declared_type {
        if values.len() != 1 || values[0].ty() != Some(declared) {
            let got: Vec<String> = values.iter().filter_map(Expr::ty).map(|t| t.to_string()).collect();
            return Err(checker.error(
                CompileErrorKind::TypeMismatch,
                format!("{} is declared as {} but is defined as ({})", checker.name, declared, got.join(", ")),
            ));
        }
    }

    for v in values {
        if let Some(r) = v.reduction_vars().first() {
            return Err(checker.error(
                CompileErrorKind::UnboundVar,
                format!("The pure definition of {} uses reduction variable {}", checker.name, r.name()),
            ));
        }
        checker.check_vars(v, &vars, "pure definition")?;
        checker.check_reads(v)?;
    }
    Ok((vars, values.to_vec()))
}

/// Validate an update definition against the Func's pure definition.
pub(crate) fn check_update(func: &Func, args: &[Expr], values: &[Expr]) -> FlowResult<UpdateDefinition> {
    let checker = Checker::new(func);
    checker.require_defined(values, "an update")?;
    if let Some(i) = args.iter().position(|a| !a.defined()) {
        return Err(checker.error(
            CompileErrorKind::UndefinedExpr,
            format!("Argument {} of an update of {} is undefined", i, checker.name),
        ));
    }
    if args.len() != func.dimensions() {
        return Err(checker.error(
            CompileErrorKind::ArityMismatch,
            format!(
                "Update of {} has {} arguments but its pure definition has {}",
                checker.name,
                args.len(),
                func.dimensions()
            ),
        ));
    }

    for e in args.iter().chain(values) {
        checker.check_reads(e)?;
    }
    checker.check_int_args(args, &format!("update of {}", checker.name))?;

    let types = func.output_types();
    if values.len() != types.len() {
        return Err(checker.error(
            CompileErrorKind::TypeMismatch,
            format!(
                "Update of {} produces {} values but its pure definition produces {}",
                checker.name,
                values.len(),
                types.len()
            ),
        ));
    }
    for (i, (v, t)) in values.iter().zip(&types).enumerate() {
        if v.ty() != Some(*t) {
            return Err(checker.error(
                CompileErrorKind::TypeMismatch,
                format!(
                    "Value {} of an update of {} has type {} but {} produces {}",
                    i,
                    checker.name,
                    v.ty().map(|t| t.to_string()).unwrap_or_default(),
                    checker.name,
                    t
                ),
            ));
        }
    }

    let mut domain: Option<RDom> = None;
    for e in args.iter().chain(values) {
        for r in e.reduction_vars() {
            match &domain {
                Some(d) if d.id() != r.domain().id() => {
                    return Err(checker.error(
                        CompileErrorKind::MultipleDomains,
                        format!(
                            "Update of {} uses reduction variables from both {} and {}",
                            checker.name,
                            d.name(),
                            r.domain().name()
                        ),
                    ))
                }
                Some(_) => {}
                None => domain = Some(r.domain().clone()),
            }
        }
    }

    let pure_args: Vec<Var> = args.iter().filter_map(Expr::as_var).collect();
    for e in args.iter().chain(values) {
        checker.check_vars(e, &pure_args, "update")?;
    }
    if let Some(d) = &domain {
        for rv in d.vars() {
            for bound in [&rv.min, &rv.extent] {
                if bound.defined() {
                    checker.check_vars(bound, &[], "reduction domain")?;
                }
            }
        }
    }

    Ok(UpdateDefinition { args: args.to_vec(), values: values.to_vec(), domain })
}

/// Replace strong calls from `func` to itself with weak ones.
pub(crate) fn weaken_self_calls(func: &Func, update: UpdateDefinition) -> UpdateDefinition {
    let id = func.id();
    let weak = Rc::downgrade(&func.contents);
    UpdateDefinition {
        args: update.args.iter().map(|a| weaken(a, id, &weak)).collect(),
        values: update.values.iter().map(|v| weaken(v, id, &weak)).collect(),
        domain: update.domain,
    }
}

fn weaken(e: &Expr, id: u64, weak: &Weak<RefCell<FunctionContents>>) -> Expr {
    e.rewrite(&mut |node| match (node.ty(), node.kind()) {
        (Some(ty), Some(ExprKind::Call(call))) if call.func_id == id => {
            let mut call = call.clone();
            call.target = FuncPtr::Weak(weak.clone());
            call.args = call.args.iter().map(|a| weaken(a, id, weak)).collect();
            Some(Expr::new(ty, ExprKind::Call(call)))
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Type;
    use crate::ir::var::Range;

    #[test]
    fn test_non_var_argument_rejected() {
        let x = Var::new("x");
        let f = Func::new("f");
        let err = check_pure(&f, &[Expr::from(x) + 1], &[Expr::from(0)]).unwrap_err();
        assert_eq!(err.as_compile().map(|e| e.kind), Some(CompileErrorKind::NonVarArgument));
    }

    #[test]
    fn test_unbound_var_in_pure_definition() {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let f = Func::new("f");
        let err = check_pure(&f, &[Expr::from(x)], &[Expr::from(y)]).unwrap_err();
        assert_eq!(err.as_compile().map(|e| e.kind), Some(CompileErrorKind::UnboundVar));
    }

    #[test]
    fn test_update_rejects_two_domains() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.define(&[x], 0).unwrap();
        let r1 = RDom::new(Range::new(0, 3));
        let r2 = RDom::new(Range::new(0, 3));
        let value = f.call([r1.x()]) + r2.x();
        let err = check_update(&f, &[Expr::from(r1.x())], &[value]).unwrap_err();
        assert_eq!(err.as_compile().map(|e| e.kind), Some(CompileErrorKind::MultipleDomains));
    }

    #[test]
    fn test_declared_type_enforced() {
        let x = Var::new("x");
        let f = Func::with_type("f", Type::float(32));
        let err = f.define(&[x], x).unwrap_err();
        assert_eq!(err.as_compile().map(|e| e.kind), Some(CompileErrorKind::TypeMismatch));
        assert!(!f.defined());
    }

    #[test]
    fn test_update_pure_var_must_be_bare_argument() {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let f = Func::new("f");
        f.define(&[x], x).unwrap();
        let err = check_update(&f, &[Expr::from(x)], &[f.call([x]) + y]).unwrap_err();
        assert_eq!(err.as_compile().map(|e| e.kind), Some(CompileErrorKind::UnboundVar));
    }

    #[test]
    fn test_checked_update_carries_domain() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.define(&[x], 0).unwrap();
        let r = RDom::named("acc", Range::new(0, 4));
        let update = check_update(&f, &[Expr::from(x)], &[f.call([x]) + r.x()]).unwrap();
        assert!(update.domain.is_some());
        assert!(format!("{:?}", update).contains("RDom(acc, 1 dims)"));
    }
}
