//! The embedded language's intermediate representations.
//!
//! - `types`: scalar types and values
//! - `expr`: the user-facing expression DAG
//! - `var`: index variables and reduction domains
//! - `param`: external scalar and buffer inputs
//! - `ops`: scalar semantics shared by folding and execution
//! - `plan`: the lowered loop-nest plan

pub mod types;
pub mod expr;
pub mod var;
pub mod param;
pub mod ops;
pub mod plan;

pub use types::{Element, Type, TypeCode, Value};
pub use expr::{BinOp, CmpOp, Expr, ExprKind, MathFn};
pub use var::{RDom, RVar, Range, Var};
pub use param::{ImageParam, Param};
pub use plan::{ForKind, PExpr, PNode, Stmt};
