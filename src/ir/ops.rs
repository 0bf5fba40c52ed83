//! Scalar semantics shared by constant folding and execution.

use crate::ir::expr::{BinOp, CmpOp, MathFn};
use crate::ir::types::{Type, TypeCode, Value};
use std::cmp::Ordering;

/// Convert `v` to type `ty`. Float to integer conversion truncates toward
/// zero and saturates.
pub fn eval_cast(ty: Type, v: Value) -> Value {
    let converted = match (ty.code, v) {
        (TypeCode::Bool, v) => Value::Bool(v.as_bool()),
        (TypeCode::Float, v) => Value::Float(v.as_f64()),
        (TypeCode::UInt, Value::Float(f)) => Value::UInt(f as u64),
        (TypeCode::Int, Value::Float(f)) => Value::Int(f as i64),
        (TypeCode::UInt, v) => Value::UInt(v.as_u64()),
        (TypeCode::Int, v) => Value::Int(v.as_i64()),
    };
    ty.normalize(converted)
}

/// Evaluate a binary operator on operands already of type `ty`.
///
/// Integer division and modulo are Euclidean, so the remainder is never
/// negative; division or modulo by zero yields zero.
pub fn eval_binary(op: BinOp, ty: Type, a: Value, b: Value) -> Value {
    let result = match ty.code {
        TypeCode::Int => {
            let (a, b) = (a.as_i64(), b.as_i64());
            Value::Int(match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div => a.checked_div_euclid(b).unwrap_or(0),
                BinOp::Mod => a.checked_rem_euclid(b).unwrap_or(0),
                BinOp::Min => a.min(b),
                BinOp::Max => a.max(b),
            })
        }
        TypeCode::UInt => {
            let (a, b) = (a.as_u64(), b.as_u64());
            Value::UInt(match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div => a.checked_div(b).unwrap_or(0),
                BinOp::Mod => a.checked_rem(b).unwrap_or(0),
                BinOp::Min => a.min(b),
                BinOp::Max => a.max(b),
            })
        }
        TypeCode::Float => {
            let (a, b) = (a.as_f64(), b.as_f64());
            Value::Float(match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Mod => a - b * (a / b).floor(),
                BinOp::Min => a.min(b),
                BinOp::Max => a.max(b),
            })
        }
        TypeCode::Bool => {
            let (a, b) = (a.as_bool(), b.as_bool());
            Value::Bool(match op {
                BinOp::Add | BinOp::Max => a || b,
                BinOp::Mul | BinOp::Min => a && b,
                BinOp::Sub => a && !b,
                BinOp::Div | BinOp::Mod => false,
            })
        }
    };
    ty.normalize(result)
}

/// Compare two operands of type `ty`.
pub fn eval_compare(op: CmpOp, ty: Type, a: Value, b: Value) -> bool {
    let ord = match ty.code {
        TypeCode::Int => Some(a.as_i64().cmp(&b.as_i64())),
        TypeCode::UInt => Some(a.as_u64().cmp(&b.as_u64())),
        TypeCode::Float => a.as_f64().partial_cmp(&b.as_f64()),
        TypeCode::Bool => Some(a.as_bool().cmp(&b.as_bool())),
    };
    match (op, ord) {
        (CmpOp::Ne, None) => true,
        (_, None) => false,
        (CmpOp::Eq, Some(o)) => o == Ordering::Equal,
        (CmpOp::Ne, Some(o)) => o != Ordering::Equal,
        (CmpOp::Lt, Some(o)) => o == Ordering::Less,
        (CmpOp::Le, Some(o)) => o != Ordering::Greater,
        (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
        (CmpOp::Ge, Some(o)) => o != Ordering::Less,
    }
}

/// Evaluate an intrinsic whose result has type `ty`.
pub fn eval_math(func: MathFn, ty: Type, args: &[Value]) -> Value {
    let arg = |i: usize| args.get(i).copied().unwrap_or(Value::Float(0.0));
    if func == MathFn::Abs {
        let v = arg(0);
        return ty.normalize(match v {
            Value::Int(i) => Value::Int(i.wrapping_abs()),
            Value::Float(f) => Value::Float(f.abs()),
            other => other,
        });
    }
    let x = arg(0).as_f64();
    let result = match func {
        MathFn::Sqrt => x.sqrt(),
        MathFn::Exp => x.exp(),
        MathFn::Log => x.ln(),
        MathFn::Pow => x.powf(arg(1).as_f64()),
        MathFn::Sin => x.sin(),
        MathFn::Cos => x.cos(),
        MathFn::Floor => x.floor(),
        MathFn::Ceil => x.ceil(),
        MathFn::Round => x.round(),
        MathFn::Abs => x.abs(),
    };
    ty.normalize(Value::Float(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_division() {
        let t = Type::int(32);
        assert_eq!(eval_binary(BinOp::Div, t, Value::Int(-7), Value::Int(2)), Value::Int(-4));
        assert_eq!(eval_binary(BinOp::Mod, t, Value::Int(-7), Value::Int(2)), Value::Int(1));
        assert_eq!(eval_binary(BinOp::Div, t, Value::Int(7), Value::Int(0)), Value::Int(0));
    }

    #[test]
    fn test_int32_wraps() {
        let t = Type::int(32);
        let v = eval_binary(BinOp::Add, t, Value::Int(i32::MAX as i64), Value::Int(1));
        assert_eq!(v, Value::Int(i32::MIN as i64));
    }

    #[test]
    fn test_cast_truncates() {
        assert_eq!(eval_cast(Type::int(32), Value::Float(-2.7)), Value::Int(-2));
        assert_eq!(eval_cast(Type::uint(8), Value::Int(257)), Value::UInt(1));
        assert_eq!(eval_cast(Type::float(32), Value::Int(3)), Value::Float(3.0));
    }

    #[test]
    fn test_compare_float_nan() {
        let t = Type::float(32);
        assert!(!eval_compare(CmpOp::Lt, t, Value::Float(f64::NAN), Value::Float(1.0)));
        assert!(eval_compare(CmpOp::Ne, t, Value::Float(f64::NAN), Value::Float(1.0)));
    }
}
