//! Caller-owned storage for pipeline inputs and outputs.
//!
//! Elements are kept as raw bits in atomics so that the disjoint regions
//! written by parallel loop iterations can share one `&Buffer`.

use crate::ir::types::{Element, Type, Value};
use crate::utils::errors::{FlowError, FlowResult, RuntimeError, RuntimeErrorKind};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Layout of one buffer dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDim {
    pub min: i64,
    pub extent: i64,
    pub stride: i64,
}

pub struct Buffer {
    ty: Type,
    dims: Vec<BufferDim>,
    data: Vec<AtomicU64>,
}

fn bad_buffer(message: String) -> FlowError {
    FlowError::Runtime(RuntimeError::new(RuntimeErrorKind::BadBuffer, message))
}

impl Buffer {
    /// A zero-filled buffer with every dimension starting at 0.
    pub fn new(ty: Type, extents: &[usize]) -> Self {
        let bounds: Vec<(i64, i64)> = extents.iter().map(|&e| (0, e as i64)).collect();
        Self::with_bounds(ty, &bounds)
    }

    /// A zero-filled buffer over `(min, extent)` per dimension.
    pub fn with_bounds(ty: Type, bounds: &[(i64, i64)]) -> Self {
        let mut stride = 1;
        let mut dims = Vec::with_capacity(bounds.len());
        for &(min, extent) in bounds {
            let extent = extent.max(0);
            dims.push(BufferDim { min, extent, stride });
            stride *= extent;
        }
        let zero = ty.to_bits(ty.zero());
        let data = (0..stride.max(0)).map(|_| AtomicU64::new(zero)).collect();
        Self { ty, dims, data }
    }

    /// A buffer holding `values` in storage order (first dimension
    /// fastest).
    pub fn from_vec<T: Element>(values: Vec<T>, extents: &[usize]) -> FlowResult<Self> {
        let expected: usize = extents.iter().product();
        if values.len() != expected {
            return Err(bad_buffer(format!(
                "{} values don't fill a buffer of shape {:?}",
                values.len(),
                extents
            )));
        }
        let buffer = Self::new(T::TYPE, extents);
        for (slot, v) in buffer.data.iter().zip(values) {
            slot.store(T::TYPE.to_bits(v.into_value()), Ordering::Relaxed);
        }
        Ok(buffer)
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn dimensions(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[BufferDim] {
        &self.dims
    }

    pub fn extent(&self, dim: usize) -> i64 {
        self.dims.get(dim).map_or(1, |d| d.extent)
    }

    pub fn min(&self, dim: usize) -> i64 {
        self.dims.get(dim).map_or(0, |d| d.min)
    }

    pub fn width(&self) -> i64 {
        self.extent(0)
    }

    pub fn height(&self) -> i64 {
        self.extent(1)
    }

    pub fn channels(&self) -> i64 {
        self.extent(2)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Storage index of `coords`, if inside the buffer.
    pub fn offset(&self, coords: &[i64]) -> Option<usize> {
        if coords.len() != self.dims.len() {
            return None;
        }
        let mut index = 0i64;
        for (c, d) in coords.iter().zip(&self.dims) {
            let rel = c - d.min;
            if rel < 0 || rel >= d.extent {
                return None;
            }
            index += rel * d.stride;
        }
        Some(index as usize)
    }

    fn out_of_bounds(&self, coords: &[i64], what: &str) -> FlowError {
        let shape: Vec<String> = self
            .dims
            .iter()
            .map(|d| format!("[{}, {})", d.min, d.min + d.extent))
            .collect();
        FlowError::Runtime(RuntimeError::new(
            RuntimeErrorKind::OutOfBounds,
            format!("{} at {:?} is outside {}", what, coords, shape.join(" x ")),
        ))
    }

    /// Read an element as a runtime value.
    pub fn load(&self, coords: &[i64]) -> FlowResult<Value> {
        let i = self.offset(coords).ok_or_else(|| self.out_of_bounds(coords, "Load"))?;
        Ok(self.ty.from_bits(self.data[i].load(Ordering::Relaxed)))
    }

    /// Write an element, converting it to the buffer's type.
    pub fn store(&self, coords: &[i64], value: Value) -> FlowResult<()> {
        let i = self.offset(coords).ok_or_else(|| self.out_of_bounds(coords, "Store"))?;
        self.data[i].store(self.ty.to_bits(value), Ordering::Relaxed);
        Ok(())
    }

    pub fn try_get<T: Element>(&self, coords: &[i64]) -> FlowResult<T> {
        self.load(coords).map(T::from_value)
    }

    pub fn get<T: Element>(&self, coords: &[i64]) -> Option<T> {
        self.try_get(coords).ok()
    }

    pub fn set<T: Element>(&self, coords: &[i64], value: T) -> FlowResult<()> {
        self.store(coords, value.into_value())
    }

    /// All elements in storage order.
    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        self.data
            .iter()
            .map(|bits| T::from_value(self.ty.from_bits(bits.load(Ordering::Relaxed))))
            .collect()
    }

    /// Whether this buffer can hold the output of a pipeline of type `ty`
    /// and dimensionality `dims`.
    pub fn check_shape(&self, name: &str, ty: Type, dims: usize) -> FlowResult<()> {
        if self.ty != ty {
            return Err(bad_buffer(format!("Buffer for {} has type {}, expected {}", name, self.ty, ty)));
        }
        if self.dims.len() != dims {
            return Err(bad_buffer(format!(
                "Buffer for {} has {} dimensions, expected {}",
                name,
                self.dims.len(),
                dims
            )));
        }
        Ok(())
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Self {
        Self {
            ty: self.ty,
            dims: self.dims.clone(),
            data: self.data.iter().map(|a| AtomicU64::new(a.load(Ordering::Relaxed))).collect(),
        }
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty
            && self.dims == other.dims
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| a.load(Ordering::Relaxed) == b.load(Ordering::Relaxed))
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let extents: Vec<i64> = self.dims.iter().map(|d| d.extent).collect();
        write!(f, "Buffer<{}>{:?}", self.ty, extents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_and_access() {
        let b = Buffer::new(Type::int(32), &[4, 3]);
        assert_eq!(b.len(), 12);
        b.set(&[3, 2], 7i32).unwrap();
        assert_eq!(b.offset(&[3, 2]), Some(11));
        assert_eq!(b.get::<i32>(&[3, 2]), Some(7));
        assert_eq!(b.get::<i32>(&[0, 0]), Some(0));
    }

    #[test]
    fn test_out_of_bounds() {
        let b = Buffer::with_bounds(Type::float(32), &[(-1, 3)]);
        assert!(b.load(&[-1]).is_ok());
        let err = b.load(&[2]).unwrap_err();
        assert!(err.is_runtime());
        assert!(b.store(&[-2], Value::Float(1.0)).is_err());
    }

    #[test]
    fn test_from_vec() {
        let b = Buffer::from_vec(vec![1u8, 2, 3, 4, 5, 6], &[3, 2]).unwrap();
        assert_eq!(b.get::<u8>(&[2, 1]), Some(6));
        assert_eq!(b.to_vec::<u8>(), vec![1, 2, 3, 4, 5, 6]);
        assert!(Buffer::from_vec(vec![1u8, 2], &[3]).is_err());
    }

    #[test]
    fn test_stores_wrap_to_type() {
        let b = Buffer::new(Type::uint(8), &[1]);
        b.store(&[0], Value::Int(300)).unwrap();
        assert_eq!(b.get::<u8>(&[0]), Some(44));
    }

    #[test]
    fn test_shape_check() {
        let b = Buffer::new(Type::float(32), &[2, 2]);
        assert!(b.check_shape("f", Type::float(32), 2).is_ok());
        assert!(b.check_shape("f", Type::int(32), 2).is_err());
        assert!(b.check_shape("f", Type::float(32), 3).is_err());
    }
}
