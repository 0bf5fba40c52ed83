//! Scalar types and runtime scalar values.

use serde::{Serialize, Deserialize};
use std::fmt;

/// Kind of a scalar type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCode {
    Int,
    UInt,
    Float,
    Bool,
}

/// A scalar type: kind plus bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Type {
    pub code: TypeCode,
    pub bits: u8,
}

impl Type {
    pub const fn int(bits: u8) -> Self {
        Self { code: TypeCode::Int, bits }
    }

    pub const fn uint(bits: u8) -> Self {
        Self { code: TypeCode::UInt, bits }
    }

    pub const fn float(bits: u8) -> Self {
        Self { code: TypeCode::Float, bits }
    }

    pub const fn bool() -> Self {
        Self { code: TypeCode::Bool, bits: 1 }
    }

    pub fn is_int(&self) -> bool {
        self.code == TypeCode::Int
    }

    pub fn is_uint(&self) -> bool {
        self.code == TypeCode::UInt
    }

    /// Signed or unsigned integer.
    pub fn is_integer(&self) -> bool {
        matches!(self.code, TypeCode::Int | TypeCode::UInt)
    }

    pub fn is_float(&self) -> bool {
        self.code == TypeCode::Float
    }

    pub fn is_bool(&self) -> bool {
        self.code == TypeCode::Bool
    }

    /// Name of the matching C type, used by the C emitter.
    pub fn c_name(&self) -> &'static str {
        match (self.code, self.bits) {
            (TypeCode::Bool, _) => "bool",
            (TypeCode::Float, 32) => "float",
            (TypeCode::Float, _) => "double",
            (TypeCode::Int, 8) => "int8_t",
            (TypeCode::Int, 16) => "int16_t",
            (TypeCode::Int, 32) => "int32_t",
            (TypeCode::Int, _) => "int64_t",
            (TypeCode::UInt, 8) => "uint8_t",
            (TypeCode::UInt, 16) => "uint16_t",
            (TypeCode::UInt, 32) => "uint32_t",
            (TypeCode::UInt, _) => "uint64_t",
        }
    }

    /// Bring a value into the representable range of this type.
    ///
    /// Integers wrap to the bit width, 32-bit floats round through `f32`.
    pub fn normalize(&self, value: Value) -> Value {
        match self.code {
            TypeCode::Int => Value::Int(wrap_signed(value.as_i64(), self.bits)),
            TypeCode::UInt => Value::UInt(wrap_unsigned(value.as_u64(), self.bits)),
            TypeCode::Float if self.bits == 32 => Value::Float(value.as_f64() as f32 as f64),
            TypeCode::Float => Value::Float(value.as_f64()),
            TypeCode::Bool => Value::Bool(value.as_bool()),
        }
    }

    /// Encode a value of this type as raw storage bits.
    pub fn to_bits(&self, value: Value) -> u64 {
        match self.normalize(value) {
            Value::Int(v) => v as u64,
            Value::UInt(v) => v,
            Value::Float(v) if self.bits == 32 => (v as f32).to_bits() as u64,
            Value::Float(v) => v.to_bits(),
            Value::Bool(b) => b as u64,
        }
    }

    /// Decode raw storage bits written by `to_bits`.
    pub fn from_bits(&self, bits: u64) -> Value {
        match self.code {
            TypeCode::Int => Value::Int(bits as i64),
            TypeCode::UInt => Value::UInt(bits),
            TypeCode::Float if self.bits == 32 => Value::Float(f32::from_bits(bits as u32) as f64),
            TypeCode::Float => Value::Float(f64::from_bits(bits)),
            TypeCode::Bool => Value::Bool(bits != 0),
        }
    }

    /// The zero value of this type.
    pub fn zero(&self) -> Value {
        match self.code {
            TypeCode::Int => Value::Int(0),
            TypeCode::UInt => Value::UInt(0),
            TypeCode::Float => Value::Float(0.0),
            TypeCode::Bool => Value::Bool(false),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            TypeCode::Int => write!(f, "int{}", self.bits),
            TypeCode::UInt => write!(f, "uint{}", self.bits),
            TypeCode::Float => write!(f, "float{}", self.bits),
            TypeCode::Bool => write!(f, "bool"),
        }
    }
}

fn wrap_signed(v: i64, bits: u8) -> i64 {
    if bits >= 64 {
        return v;
    }
    let shift = 64 - bits as u32;
    (v << shift) >> shift
}

fn wrap_unsigned(v: u64, bits: u8) -> u64 {
    if bits >= 64 {
        return v;
    }
    v & ((1u64 << bits) - 1)
}

/// A scalar value flowing through compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl Value {
    pub fn as_i64(&self) -> i64 {
        match *self {
            Value::Int(v) => v,
            Value::UInt(v) => v as i64,
            Value::Float(v) => v as i64,
            Value::Bool(b) => b as i64,
        }
    }

    pub fn as_u64(&self) -> u64 {
        match *self {
            Value::Int(v) => v as u64,
            Value::UInt(v) => v,
            Value::Float(v) => v as u64,
            Value::Bool(b) => b as u64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Int(v) => v as f64,
            Value::UInt(v) => v as f64,
            Value::Float(v) => v,
            Value::Bool(b) => if b { 1.0 } else { 0.0 },
        }
    }

    pub fn as_bool(&self) -> bool {
        match *self {
            Value::Int(v) => v != 0,
            Value::UInt(v) => v != 0,
            Value::Float(v) => v != 0.0,
            Value::Bool(b) => b,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Rust scalar types that can live in a `Buffer`.
pub trait Element: Copy + Send + Sync + 'static {
    /// The pipeline type matching this Rust type.
    const TYPE: Type;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Self;
}

macro_rules! impl_element {
    ($t:ty, $ty:expr, $variant:ident, $conv:ident, $inner:ty) => {
        impl Element for $t {
            const TYPE: Type = $ty;

            fn into_value(self) -> Value {
                Value::$variant(self as $inner)
            }

            fn from_value(value: Value) -> Self {
                value.$conv() as $t
            }
        }
    };
}

impl_element!(i8, Type::int(8), Int, as_i64, i64);
impl_element!(i16, Type::int(16), Int, as_i64, i64);
impl_element!(i32, Type::int(32), Int, as_i64, i64);
impl_element!(i64, Type::int(64), Int, as_i64, i64);
impl_element!(u8, Type::uint(8), UInt, as_u64, u64);
impl_element!(u16, Type::uint(16), UInt, as_u64, u64);
impl_element!(u32, Type::uint(32), UInt, as_u64, u64);
impl_element!(u64, Type::uint(64), UInt, as_u64, u64);
impl_element!(f32, Type::float(32), Float, as_f64, f64);
impl_element!(f64, Type::float(64), Float, as_f64, f64);

impl Element for bool {
    const TYPE: Type = Type::bool();

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: Value) -> Self {
        value.as_bool()
    }
}
