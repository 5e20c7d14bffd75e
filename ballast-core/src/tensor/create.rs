use crate::tensor::Tensor;
use rand::Rng;
use rand_distr::StandardNormal;

/// Creates a tensor filled with zeros.
pub fn zeros(shape: &[usize]) -> Tensor {
    full(shape, 0.0)
}

/// Creates a tensor of zeros with the same shape as `other`.
pub fn zeros_like(other: &Tensor) -> Tensor {
    zeros(other.shape())
}

/// Creates a tensor filled with ones.
pub fn ones(shape: &[usize]) -> Tensor {
    full(shape, 1.0)
}

/// Creates a tensor filled with `value`.
pub fn full(shape: &[usize], value: f32) -> Tensor {
    let numel: usize = shape.iter().product();
    Tensor {
        data: vec![value; numel],
        shape: shape.to_vec(),
    }
}

/// Creates an `n x n` identity matrix scaled by `scale`.
pub fn eye_scaled(n: usize, scale: f32) -> Tensor {
    let mut data = vec![0.0; n * n];
    for i in 0..n {
        data[i * n + i] = scale;
    }
    Tensor {
        data,
        shape: vec![n, n],
    }
}

/// Creates an `n x n` identity matrix.
pub fn eye(n: usize) -> Tensor {
    eye_scaled(n, 1.0)
}

/// Creates a tensor with elements drawn from the standard normal distribution.
pub fn randn<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Tensor {
    let numel: usize = shape.iter().product();
    let data = (0..numel).map(|_| rng.sample::<f32, _>(StandardNormal)).collect();
    Tensor {
        data,
        shape: shape.to_vec(),
    }
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Tensor {
        zeros(shape)
    }

    pub fn zeros_like(other: &Tensor) -> Tensor {
        zeros_like(other)
    }

    pub fn full(shape: &[usize], value: f32) -> Tensor {
        full(shape, value)
    }

    pub fn eye(n: usize) -> Tensor {
        eye(n)
    }
}

#[cfg(test)]
#[path = "create_test.rs"]
mod tests;
