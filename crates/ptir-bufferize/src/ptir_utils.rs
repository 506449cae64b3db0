//! Shorthands for building statically shaped PTIR types and literals.

use crate::spec::{DType, Dimension, Shape, TensorLiteral, TensorSpec, ValueType};

pub fn static_shape(dims: &[usize]) -> Shape {
    Shape::new(dims.iter().map(|&d| Dimension::Static(d)).collect::<Vec<_>>())
}

pub fn tensor_type(dtype: DType, dims: &[usize]) -> ValueType {
    ValueType::Tensor(TensorSpec::new(dtype, static_shape(dims)))
}

/// Zero-filled `f32` literal of a static shape.
pub fn tensor_literal_f32_zeros(dims: &[usize]) -> TensorLiteral {
    let spec = TensorSpec::new(DType::F32, static_shape(dims));
    let len = spec.byte_len().unwrap_or_default();
    TensorLiteral::new(spec, vec![0; len])
}
