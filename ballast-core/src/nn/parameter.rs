use crate::error::BallastError;
use crate::tensor::Tensor;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

static NEXT_PARAM_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a [`Parameter`], stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParamId(pub u64);

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "param#{}", self.0)
    }
}

/// A value being optimized, with its (optional) gradient.
///
/// The shape is fixed at construction; `set_data` and `set_grad` reject
/// tensors of any other shape.
pub struct Parameter {
    id: ParamId,
    name: Option<String>,
    tensor: Tensor,
    grad: Option<Tensor>,
}

impl Parameter {
    pub fn new(tensor: Tensor, name: Option<String>) -> Self {
        Parameter {
            id: ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            tensor,
            grad: None,
        }
    }

    pub fn new_unnamed(tensor: Tensor) -> Self {
        Parameter::new(tensor, None)
    }

    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for log messages: the parameter name, or its id.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    pub fn shape(&self) -> &[usize] {
        self.tensor.shape()
    }

    /// Mutable access to the values; the shape cannot change through it.
    pub fn data_mut(&mut self) -> &mut [f32] {
        self.tensor.data_mut()
    }

    /// Replaces the values.
    ///
    /// # Errors
    /// `ShapeMismatch` if `tensor` has a different shape.
    pub fn set_data(&mut self, tensor: Tensor) -> Result<(), BallastError> {
        self.tensor.check_same_shape(&tensor, "Parameter::set_data")?;
        self.tensor = tensor;
        Ok(())
    }

    pub fn grad(&self) -> Option<&Tensor> {
        self.grad.as_ref()
    }

    /// Sets the gradient that the next optimizer step will consume.
    ///
    /// # Errors
    /// `ShapeMismatch` if `grad` does not have the parameter's shape.
    pub fn set_grad(&mut self, grad: Tensor) -> Result<(), BallastError> {
        self.tensor.check_same_shape(&grad, "Parameter::set_grad")?;
        self.grad = Some(grad);
        Ok(())
    }

    /// Drops the gradient; the parameter is skipped by optimizers until a new one is set.
    pub fn zero_grad(&mut self) {
        self.grad = None;
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tensor", &self.tensor)
            .field("has_grad", &self.grad.is_some())
            .finish()
    }
}

#[cfg(test)]
#[path = "parameter_test.rs"]
mod tests;
