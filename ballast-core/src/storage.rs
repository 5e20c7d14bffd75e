// ballast-core/src/storage.rs

//! Tensors held in a storage dtype.
//!
//! Optimizer state may be kept narrower (or wider) than the `f32` compute
//! type. A `StoredTensor` is decoded to `f32` on read and encoded back on
//! write; decoding is always exact, so encoding a value that was just decoded
//! reproduces the same bits.

use crate::ops::dtype::{bf16_to_f32, round_bf16_nearest, round_bf16_stochastic};
use crate::tensor::Tensor;
use crate::types::DType;
use rand::Rng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StoredTensor {
    F32(Tensor),
    F64 { data: Vec<f64>, shape: Vec<usize> },
    BF16 { bits: Vec<u16>, shape: Vec<usize> },
}

impl StoredTensor {
    /// Encodes `tensor` in `dtype`, rounding stochastically for `BF16`.
    pub fn encode<R: Rng + ?Sized>(tensor: &Tensor, dtype: DType, rng: &mut R) -> StoredTensor {
        match dtype {
            DType::BF16 => StoredTensor::BF16 {
                bits: tensor
                    .data
                    .iter()
                    .map(|&v| round_bf16_stochastic(v, rng))
                    .collect(),
                shape: tensor.shape.clone(),
            },
            _ => StoredTensor::encode_nearest(tensor, dtype),
        }
    }

    /// Encodes `tensor` in `dtype`, rounding to nearest for `BF16`.
    pub fn encode_nearest(tensor: &Tensor, dtype: DType) -> StoredTensor {
        match dtype {
            DType::F32 => StoredTensor::F32(tensor.clone()),
            DType::F64 => StoredTensor::F64 {
                data: tensor.data.iter().map(|&v| v as f64).collect(),
                shape: tensor.shape.clone(),
            },
            DType::BF16 => StoredTensor::BF16 {
                bits: tensor.data.iter().map(|&v| round_bf16_nearest(v)).collect(),
                shape: tensor.shape.clone(),
            },
        }
    }

    /// Decodes to an `f32` tensor.
    pub fn decode(&self) -> Tensor {
        match self {
            StoredTensor::F32(t) => t.clone(),
            StoredTensor::F64 { data, shape } => Tensor {
                data: data.iter().map(|&v| v as f32).collect(),
                shape: shape.clone(),
            },
            StoredTensor::BF16 { bits, shape } => Tensor {
                data: bits.iter().map(|&b| bf16_to_f32(b)).collect(),
                shape: shape.clone(),
            },
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            StoredTensor::F32(_) => DType::F32,
            StoredTensor::F64 { .. } => DType::F64,
            StoredTensor::BF16 { .. } => DType::BF16,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            StoredTensor::F32(t) => t.shape(),
            StoredTensor::F64 { shape, .. } | StoredTensor::BF16 { shape, .. } => shape,
        }
    }

    pub fn numel(&self) -> usize {
        self.shape().iter().product()
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
