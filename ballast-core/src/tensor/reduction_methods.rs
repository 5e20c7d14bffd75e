use crate::tensor::Tensor;

impl Tensor {
    /// Sum of squares, accumulated in `f64`.
    pub fn sum_sq(&self) -> f64 {
        self.data.iter().map(|&v| (v as f64) * (v as f64)).sum()
    }

    /// Euclidean (Frobenius) norm.
    pub fn norm(&self) -> f32 {
        self.sum_sq().sqrt() as f32
    }

    /// Root-mean-square of the elements. Zero for empty tensors.
    pub fn rms(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        (self.sum_sq() / self.data.len() as f64).sqrt() as f32
    }

    /// Largest absolute value (the infinity norm of the flattened tensor).
    pub fn max_abs(&self) -> f32 {
        self.data.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()))
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }
}
