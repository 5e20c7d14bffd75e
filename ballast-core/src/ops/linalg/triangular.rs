use crate::error::BallastError;
use crate::ops::linalg::matmul::{check_matrix, check_square};
use crate::tensor::utils::axis_split;
use crate::tensor::Tensor;

/// Upper-triangular part of a 2-D tensor (entries below the diagonal zeroed).
pub fn triu_op(a: &Tensor) -> Result<Tensor, BallastError> {
    let (m, n) = check_matrix(a)?;
    let mut out = a.clone();
    for i in 0..m {
        for j in 0..i.min(n) {
            out.data[i * n + j] = 0.0;
        }
    }
    Ok(out)
}

/// Number of entries in the packed upper triangle of an `n x n` matrix.
pub fn packed_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Packs the upper triangle of a square matrix, row by row, into a 1-D tensor.
pub fn pack_triu_op(a: &Tensor) -> Result<Tensor, BallastError> {
    let n = check_square(a, "pack_triu_op")?;
    let mut line = Vec::with_capacity(packed_len(n));
    for i in 0..n {
        line.extend_from_slice(&a.data[i * n + i..(i + 1) * n]);
    }
    Tensor::new(line, vec![packed_len(n)])
}

/// Inverse of [`pack_triu_op`]: rebuilds the `n x n` upper-triangular matrix.
pub fn unpack_triu_op(line: &Tensor, n: usize) -> Result<Tensor, BallastError> {
    if line.rank() != 1 || line.numel() != packed_len(n) {
        return Err(BallastError::ShapeMismatch {
            expected: vec![packed_len(n)],
            actual: line.shape.clone(),
            operation: "unpack_triu_op".to_string(),
        });
    }
    let mut data = vec![0.0f32; n * n];
    let mut offset = 0;
    for i in 0..n {
        let len = n - i;
        data[i * n + i..(i + 1) * n].copy_from_slice(&line.data[offset..offset + len]);
        offset += len;
    }
    Tensor::new(data, vec![n, n])
}

/// Computes `x ×_axis Q⁻ᵀ` for an upper-triangular `q`, i.e. solves `Qᵀ y = b`
/// for every fiber `b` of `x` along `axis` by forward substitution.
///
/// # Errors
/// `NumericalDegeneracy` if `q` has a zero (or non-finite) diagonal entry.
pub fn solve_upper_transposed_along(x: &Tensor, axis: usize, q: &Tensor) -> Result<Tensor, BallastError> {
    let n = check_square(q, "solve_upper_transposed_along")?;
    let (outer, len, inner) = axis_split(&x.shape, axis)?;
    if len != n {
        return Err(BallastError::ShapeMismatch {
            expected: vec![n, n],
            actual: vec![len],
            operation: "solve_upper_transposed_along".to_string(),
        });
    }
    if let Some(i) = (0..n).find(|&i| {
        let d = q.data[i * n + i];
        d == 0.0 || !d.is_finite()
    }) {
        return Err(BallastError::NumericalDegeneracy {
            operation: "solve_upper_transposed_along".to_string(),
            reason: format!("diagonal entry {} of the triangular factor is singular", i),
        });
    }

    let mut out = x.clone();
    let mut y = vec![0.0f64; n];
    for o in 0..outer {
        for k in 0..inner {
            for i in 0..n {
                let b = x.data[(o * n + i) * inner + k] as f64;
                let acc: f64 = (0..i).map(|j| q.data[j * n + i] as f64 * y[j]).sum();
                y[i] = (b - acc) / q.data[i * n + i] as f64;
            }
            for (i, &yi) in y.iter().enumerate() {
                out.data[(o * n + i) * inner + k] = yi as f32;
            }
        }
    }
    Ok(out)
}

/// Cheap lower bound on the spectral norm of a 2-D tensor.
///
/// Starts from the row or column with the largest norm and takes two
/// matrix-vector products; exact for rank-one matrices. Zero for a zero matrix.
pub fn spectral_norm_lower_bound(a: &Tensor) -> Result<f32, BallastError> {
    let (m, n) = check_matrix(a)?;
    let max_abs = a.max_abs() as f64;
    if max_abs == 0.0 || !max_abs.is_finite() {
        return Ok(max_abs as f32);
    }
    let s: Vec<f64> = a.data.iter().map(|&v| v as f64 / max_abs).collect();

    let mut col_sq = vec![0.0f64; n];
    let mut row_sq = vec![0.0f64; m];
    for i in 0..m {
        for j in 0..n {
            let v = s[i * n + j] * s[i * n + j];
            col_sq[j] += v;
            row_sq[i] += v;
        }
    }
    let (best_col, col_val) = argmax(&col_sq);
    let (best_row, row_val) = argmax(&row_sq);

    let y: Vec<f64> = if col_val > row_val {
        // x = A[:, c]ᵀ A, then y = A x̂
        let x: Vec<f64> = (0..n)
            .map(|k| (0..m).map(|r| s[r * n + best_col] * s[r * n + k]).sum())
            .collect();
        let x = normalised(x);
        (0..m)
            .map(|r| (0..n).map(|k| s[r * n + k] * x[k]).sum())
            .collect()
    } else {
        // x = A A[r, :]ᵀ, then y = Aᵀ x̂
        let x: Vec<f64> = (0..m)
            .map(|r| (0..n).map(|k| s[r * n + k] * s[best_row * n + k]).sum())
            .collect();
        let x = normalised(x);
        (0..n)
            .map(|k| (0..m).map(|r| s[r * n + k] * x[r]).sum())
            .collect()
    };
    let norm = y.iter().map(|v| v * v).sum::<f64>().sqrt();
    Ok((max_abs * norm) as f32)
}

fn argmax(values: &[f64]) -> (usize, f64) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best })
}

fn normalised(mut x: Vec<f64>) -> Vec<f64> {
    let norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        x.iter_mut().for_each(|v| *v /= norm);
    }
    x
}

#[cfg(test)]
#[path = "triangular_test.rs"]
mod tests;
