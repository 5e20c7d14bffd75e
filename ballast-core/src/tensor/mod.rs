// ballast-core/src/tensor/mod.rs

//! Dense, row-major `f32` arrays.
//!
//! `Tensor` is a plain value type: cloning copies the buffer, and the
//! optimizers never share buffers between parameters and state. All optimizer
//! arithmetic happens in `f32`; `linalg` promotes to `f64` internally.

use crate::error::BallastError;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod axis_methods;
pub mod create;
pub mod inplace_arithmetic_methods;
pub mod reduction_methods;
pub mod utils;

/// An n-dimensional array of `f32` values stored contiguously in row-major order.
///
/// A tensor with an empty shape is a scalar holding exactly one element.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Tensor {
    pub(crate) data: Vec<f32>,
    pub(crate) shape: Vec<usize>,
}

impl Tensor {
    /// Creates a new tensor taking ownership of `data`.
    ///
    /// # Errors
    /// Returns `BallastError::TensorCreationError` if `data.len()` does not match
    /// the number of elements described by `shape`.
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Result<Self, BallastError> {
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(BallastError::TensorCreationError {
                data_len: data.len(),
                shape,
            });
        }
        Ok(Tensor { data, shape })
    }

    /// Creates a 0-dimensional tensor.
    pub fn scalar(value: f32) -> Self {
        Tensor {
            data: vec![value],
            shape: vec![],
        }
    }

    /// Creates a 1-D tensor from a slice.
    pub fn from_slice(values: &[f32]) -> Self {
        Tensor {
            data: values.to_vec(),
            shape: vec![values.len()],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Read-only view of the underlying buffer.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable view of the underlying buffer. The shape cannot change through it.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Returns the single value of a one-element tensor.
    pub fn item(&self) -> Result<f32, BallastError> {
        if self.data.len() != 1 {
            return Err(BallastError::ShapeMismatch {
                expected: vec![],
                actual: self.shape.clone(),
                operation: "item".to_string(),
            });
        }
        Ok(self.data[0])
    }

    /// Returns a tensor with the same data and a new shape.
    ///
    /// # Errors
    /// `ShapeMismatch` if the element counts differ.
    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor, BallastError> {
        let numel: usize = shape.iter().product();
        if numel != self.data.len() {
            return Err(BallastError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: shape.to_vec(),
                operation: "reshape".to_string(),
            });
        }
        Ok(Tensor {
            data: self.data.clone(),
            shape: shape.to_vec(),
        })
    }

    /// Consuming variant of [`Tensor::reshape`] that reuses the buffer.
    pub fn into_shape(self, shape: &[usize]) -> Result<Tensor, BallastError> {
        let numel: usize = shape.iter().product();
        if numel != self.data.len() {
            return Err(BallastError::ShapeMismatch {
                expected: self.shape,
                actual: shape.to_vec(),
                operation: "into_shape".to_string(),
            });
        }
        Ok(Tensor {
            data: self.data,
            shape: shape.to_vec(),
        })
    }

    /// Checks that `other` has exactly the same shape as `self`.
    pub fn check_same_shape(&self, other: &Tensor, operation: &str) -> Result<(), BallastError> {
        if self.shape != other.shape {
            return Err(BallastError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: other.shape.clone(),
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Whether every element is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Element at the given multi-dimensional index.
    pub fn get(&self, index: &[usize]) -> Result<f32, BallastError> {
        let offset = utils::offset_of(index, &self.shape)?;
        Ok(self.data[offset])
    }

    /// Element `(row, col)` of a 2-D tensor, without bounds checks beyond the slice's own.
    #[inline]
    pub(crate) fn at2(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.shape[1] + col]
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 8;
        if self.data.len() <= PREVIEW {
            write!(f, "Tensor(shape={:?}, data={:?})", self.shape, self.data)
        } else {
            write!(
                f,
                "Tensor(shape={:?}, data=[{:?}, ... {} more])",
                self.shape,
                &self.data[..PREVIEW],
                self.data.len() - PREVIEW
            )
        }
    }
}
