use crate::error::BallastError;
use crate::tensor::Tensor;

pub(crate) fn check_matrix(t: &Tensor) -> Result<(usize, usize), BallastError> {
    if t.rank() != 2 {
        return Err(BallastError::DimensionMismatch {
            expected: 2,
            actual: t.rank(),
        });
    }
    Ok((t.shape[0], t.shape[1]))
}

pub(crate) fn check_square(t: &Tensor, operation: &str) -> Result<usize, BallastError> {
    let (m, n) = check_matrix(t)?;
    if m != n {
        return Err(BallastError::ShapeMismatch {
            expected: vec![m, m],
            actual: vec![m, n],
            operation: operation.to_string(),
        });
    }
    Ok(n)
}

/// Matrix product of two 2-D tensors, accumulated in `f64`.
///
/// # Errors
/// `DimensionMismatch` if either input is not 2-D, `ShapeMismatch` if the
/// inner dimensions differ.
pub fn matmul_op(a: &Tensor, b: &Tensor) -> Result<Tensor, BallastError> {
    let (m, k) = check_matrix(a)?;
    let (k2, n) = check_matrix(b)?;
    if k != k2 {
        return Err(BallastError::ShapeMismatch {
            expected: vec![k, n],
            actual: b.shape.clone(),
            operation: "matmul_op".to_string(),
        });
    }
    let mut out = vec![0.0f32; m * n];
    let mut row = vec![0.0f64; n];
    for i in 0..m {
        row.iter_mut().for_each(|r| *r = 0.0);
        for p in 0..k {
            let aip = a.data[i * k + p] as f64;
            if aip == 0.0 {
                continue;
            }
            for (r, &bv) in row.iter_mut().zip(&b.data[p * n..(p + 1) * n]) {
                *r += aip * bv as f64;
            }
        }
        for (dst, &r) in out[i * n..(i + 1) * n].iter_mut().zip(row.iter()) {
            *dst = r as f32;
        }
    }
    Tensor::new(out, vec![m, n])
}

/// Transpose of a 2-D tensor.
pub fn transpose_op(a: &Tensor) -> Result<Tensor, BallastError> {
    let (m, n) = check_matrix(a)?;
    let mut out = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            out[j * m + i] = a.data[i * n + j];
        }
    }
    Tensor::new(out, vec![n, m])
}

/// `aᵀ a` for a 2-D tensor.
pub fn gram_op(a: &Tensor) -> Result<Tensor, BallastError> {
    check_matrix(a)?;
    a.mode_gram(1)
}

#[cfg(test)]
#[path = "matmul_test.rs"]
mod tests;
