use crate::error::BallastError;
use crate::ops::linalg::matmul::check_square;
use crate::tensor::Tensor;
use num_traits::Float;

const MAX_SWEEPS: usize = 64;

/// Eigendecomposition of a symmetric matrix stored row-major in `a` (`n x n`),
/// by cyclic Jacobi rotations.
///
/// Returns `(eigenvalues, eigenvectors)` with eigenvalues in ascending order and
/// the matching eigenvectors stored as the *columns* of the row-major `n x n`
/// buffer. Only the symmetric part of `a` is meaningful; `a` is consumed as
/// scratch space.
///
/// # Errors
/// `NumericalDegeneracy` if the input holds non-finite values or the rotations
/// do not converge.
pub fn symmetric_eigen<F: Float>(mut a: Vec<F>, n: usize) -> Result<(Vec<F>, Vec<F>), BallastError> {
    if a.len() != n * n {
        return Err(BallastError::TensorCreationError {
            data_len: a.len(),
            shape: vec![n, n],
        });
    }
    if a.iter().any(|v| !v.is_finite()) {
        return Err(BallastError::NumericalDegeneracy {
            operation: "eigh".to_string(),
            reason: "input contains non-finite values".to_string(),
        });
    }

    let mut v = vec![F::zero(); n * n];
    for i in 0..n {
        v[i * n + i] = F::one();
    }

    let two = F::one() + F::one();
    let size: F = num_traits::cast(n.max(1)).unwrap_or_else(F::one);
    let tol = F::epsilon() * size * (two + two);
    let frobenius = a.iter().fold(F::zero(), |acc, &x| acc + x * x).sqrt();

    let mut converged = false;
    for _ in 0..MAX_SWEEPS {
        let mut off = F::zero();
        for p in 0..n {
            for q in (p + 1)..n {
                off = off + a[p * n + q] * a[p * n + q];
            }
        }
        if off.sqrt() <= tol * frobenius {
            converged = true;
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[p * n + q];
                if apq == F::zero() {
                    continue;
                }
                let app = a[p * n + p];
                let aqq = a[q * n + q];
                let theta = (aqq - app) / (two * apq);
                let t = if theta.is_infinite() {
                    F::zero()
                } else {
                    let sign = if theta < F::zero() { -F::one() } else { F::one() };
                    sign / (theta.abs() + (theta * theta + F::one()).sqrt())
                };
                let c = F::one() / (t * t + F::one()).sqrt();
                let s = t * c;

                // A <- A J
                for k in 0..n {
                    let akp = a[k * n + p];
                    let akq = a[k * n + q];
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                // A <- Jᵀ A
                for k in 0..n {
                    let apk = a[p * n + k];
                    let aqk = a[q * n + k];
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
                // V <- V J
                for k in 0..n {
                    let vkp = v[k * n + p];
                    let vkq = v[k * n + q];
                    v[k * n + p] = c * vkp - s * vkq;
                    v[k * n + q] = s * vkp + c * vkq;
                }
            }
        }
    }

    if !converged {
        return Err(BallastError::NumericalDegeneracy {
            operation: "eigh".to_string(),
            reason: format!("Jacobi rotations did not converge in {} sweeps", MAX_SWEEPS),
        });
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        a[i * n + i]
            .partial_cmp(&a[j * n + j])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let values = order.iter().map(|&i| a[i * n + i]).collect();
    let mut vectors = vec![F::zero(); n * n];
    for (dst, &src) in order.iter().enumerate() {
        for k in 0..n {
            vectors[k * n + dst] = v[k * n + src];
        }
    }
    Ok((values, vectors))
}

/// Eigendecomposition of a symmetric 2-D tensor, computed in `f64`.
///
/// Returns `(eigenvalues [n], eigenvectors [n, n])`: ascending eigenvalues,
/// eigenvectors as columns.
pub fn eigh_op(a: &Tensor) -> Result<(Tensor, Tensor), BallastError> {
    let n = check_square(a, "eigh_op")?;
    // Symmetrise so that round-off in the caller's accumulation does not leak in.
    let mut sym = vec![0.0f64; n * n];
    for i in 0..n {
        for j in 0..n {
            sym[i * n + j] = 0.5 * (a.data[i * n + j] as f64 + a.data[j * n + i] as f64);
        }
    }
    let (values, vectors) = symmetric_eigen(sym, n)?;
    Ok((
        Tensor::new(values.into_iter().map(|v| v as f32).collect(), vec![n])?,
        Tensor::new(vectors.into_iter().map(|v| v as f32).collect(), vec![n, n])?,
    ))
}

#[cfg(test)]
#[path = "eigh_test.rs"]
mod tests;
