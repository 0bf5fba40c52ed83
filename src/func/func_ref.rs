//! Call-or-define handles.

use crate::func::{Func, Tuple};
use crate::ir::expr::{BinOp, Expr};
use crate::utils::errors::FlowResult;
use std::fmt;

/// How `accumulate` combines the current value with the right-hand side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulateOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl AccumulateOp {
    fn bin_op(self) -> BinOp {
        match self {
            AccumulateOp::Add => BinOp::Add,
            AccumulateOp::Sub => BinOp::Sub,
            AccumulateOp::Mul => BinOp::Mul,
            AccumulateOp::Div => BinOp::Div,
        }
    }
}

/// A Func bound to argument Exprs. Creating one has no side effects.
#[derive(Clone)]
pub struct FuncRef {
    func: Func,
    args: Vec<Expr>,
}

impl FuncRef {
    pub fn new(func: &Func, args: Vec<Expr>) -> Self {
        Self { func: func.clone(), args }
    }

    pub fn func(&self) -> &Func {
        &self.func
    }

    pub fn args(&self) -> &[Expr] {
        &self.args
    }

    /// The value of the Func at these arguments.
    pub fn read(&self) -> Expr {
        self.func.make_call(self.args.clone(), 0, false)
    }

    /// Element `i` of a Tuple-valued Func at these arguments.
    pub fn index(&self, i: usize) -> Expr {
        self.func.make_call(self.args.clone(), i, true)
    }

    /// `f(args) = value`: the pure definition if `f` has none yet,
    /// otherwise a new update definition. On error `f` is unchanged.
    pub fn assign(&self, value: impl Into<Expr>) -> FlowResult<()> {
        self.func.assign(&self.args, vec![value.into()])
    }

    pub fn assign_tuple(&self, values: impl Into<Tuple>) -> FlowResult<()> {
        self.func.assign(&self.args, values.into().0)
    }

    /// Read the current value, combine it with `value`, and redefine.
    pub fn accumulate(&self, op: AccumulateOp, value: impl Into<Expr>) -> FlowResult<()> {
        let combined = Expr::binary(op.bin_op(), self.read(), value.into())
            .unwrap_or_default();
        self.assign(combined)
    }

    pub fn add_assign(&self, value: impl Into<Expr>) -> FlowResult<()> {
        self.accumulate(AccumulateOp::Add, value)
    }

    pub fn sub_assign(&self, value: impl Into<Expr>) -> FlowResult<()> {
        self.accumulate(AccumulateOp::Sub, value)
    }

    pub fn mul_assign(&self, value: impl Into<Expr>) -> FlowResult<()> {
        self.accumulate(AccumulateOp::Mul, value)
    }

    pub fn div_assign(&self, value: impl Into<Expr>) -> FlowResult<()> {
        self.accumulate(AccumulateOp::Div, value)
    }

    pub fn increment(&self) -> FlowResult<()> {
        self.add_assign(1)
    }

    pub fn decrement(&self) -> FlowResult<()> {
        self.sub_assign(1)
    }
}

impl From<FuncRef> for Expr {
    fn from(r: FuncRef) -> Expr {
        r.read()
    }
}

impl From<&FuncRef> for Expr {
    fn from(r: &FuncRef) -> Expr {
        r.read()
    }
}

impl fmt::Debug for FuncRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        write!(f, "{}({})", self.func.name(), args.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::var::Var;

    #[test]
    fn test_funcref_has_no_side_effects() {
        let x = Var::new("x");
        let f = Func::new("f");
        let r = f.at([x]);
        let _ = r.read();
        assert!(!f.defined());
        assert_eq!(r.args().len(), 1);
    }

    #[test]
    fn test_increment() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.at([x]).assign(x).unwrap();
        f.at([x]).increment().unwrap();
        f.at([x]).decrement().unwrap();
        assert_eq!(f.num_update_definitions(), 2);
    }

    #[test]
    fn test_accumulate_reads_current_value() {
        let x = Var::new("x");
        let f = Func::new("f");
        f.at([x]).assign(x).unwrap();
        f.at([x]).accumulate(AccumulateOp::Mul, 3).unwrap();
        let update = &f.update_definitions()[0];
        assert_eq!(update.values[0].to_string(), "(f(x) * 3)");
    }
}
