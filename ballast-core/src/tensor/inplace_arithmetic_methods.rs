use crate::error::BallastError;
use crate::tensor::Tensor;

// Element-wise arithmetic. In-place methods end with `_` (as in the usual
// tensor-library convention); binary ones require identical shapes, there is
// no broadcasting.
impl Tensor {
    /// `self *= scalar`
    pub fn mul_scalar_(&mut self, scalar: f32) {
        self.data.iter_mut().for_each(|v| *v *= scalar);
    }

    /// `self += scalar`
    pub fn add_scalar_(&mut self, scalar: f32) {
        self.data.iter_mut().for_each(|v| *v += scalar);
    }

    /// Returns `self * scalar`.
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let mut out = self.clone();
        out.mul_scalar_(scalar);
        out
    }

    /// `self += alpha * other`
    pub fn add_scaled_(&mut self, other: &Tensor, alpha: f32) -> Result<(), BallastError> {
        self.check_same_shape(other, "add_scaled_")?;
        self.data
            .iter_mut()
            .zip(other.data.iter())
            .for_each(|(a, &b)| *a += alpha * b);
        Ok(())
    }

    /// `self += other`
    pub fn add_(&mut self, other: &Tensor) -> Result<(), BallastError> {
        self.add_scaled_(other, 1.0)
    }

    /// `self -= other`
    pub fn sub_(&mut self, other: &Tensor) -> Result<(), BallastError> {
        self.add_scaled_(other, -1.0)
    }

    /// `self *= other` element-wise.
    pub fn mul_(&mut self, other: &Tensor) -> Result<(), BallastError> {
        self.check_same_shape(other, "mul_")?;
        self.data
            .iter_mut()
            .zip(other.data.iter())
            .for_each(|(a, &b)| *a *= b);
        Ok(())
    }

    /// Linear interpolation towards `end`: `self += weight * (end - self)`.
    ///
    /// With `weight = 1 - beta` this is one step of an exponential moving
    /// average, `self = beta * self + (1 - beta) * end`.
    pub fn lerp_(&mut self, end: &Tensor, weight: f32) -> Result<(), BallastError> {
        self.check_same_shape(end, "lerp_")?;
        self.data
            .iter_mut()
            .zip(end.data.iter())
            .for_each(|(a, &b)| *a += weight * (b - *a));
        Ok(())
    }

    /// Exponential moving average of the element-wise square:
    /// `self = beta * self + (1 - beta) * x * x`.
    pub fn ema_sq_(&mut self, x: &Tensor, beta: f32) -> Result<(), BallastError> {
        self.check_same_shape(x, "ema_sq_")?;
        self.data
            .iter_mut()
            .zip(x.data.iter())
            .for_each(|(s, &g)| *s = beta * *s + (1.0 - beta) * g * g);
        Ok(())
    }

    /// Returns `self / max(sqrt(denom_sq), eps)` element-wise.
    pub fn div_sqrt_clamped(&self, denom_sq: &Tensor, eps: f32) -> Result<Tensor, BallastError> {
        self.check_same_shape(denom_sq, "div_sqrt_clamped")?;
        let data = self
            .data
            .iter()
            .zip(denom_sq.data.iter())
            .map(|(&x, &s)| x / s.sqrt().max(eps))
            .collect();
        Ok(Tensor {
            data,
            shape: self.shape.clone(),
        })
    }

    /// Applies `f` to every element in place.
    pub fn map_(&mut self, f: impl Fn(f32) -> f32) {
        self.data.iter_mut().for_each(|v| *v = f(*v));
    }

    /// Returns a new tensor with `f` applied to every element.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor {
            data: self.data.iter().map(|&v| f(v)).collect(),
            shape: self.shape.clone(),
        }
    }

    /// Combines two same-shape tensors element-wise.
    pub fn zip_map(
        &self,
        other: &Tensor,
        operation: &str,
        f: impl Fn(f32, f32) -> f32,
    ) -> Result<Tensor, BallastError> {
        self.check_same_shape(other, operation)?;
        Ok(Tensor {
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
            shape: self.shape.clone(),
        })
    }

    /// Overwrites the contents of `self` with `other` (same shape required).
    pub fn copy_from_(&mut self, other: &Tensor) -> Result<(), BallastError> {
        self.check_same_shape(other, "copy_from_")?;
        self.data.copy_from_slice(&other.data);
        Ok(())
    }
}
