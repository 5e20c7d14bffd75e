use crate::error::BallastError;
use crate::ops::linalg::matmul::check_matrix;
use crate::tensor::Tensor;
use num_traits::Float;

/// Reduced QR factorisation of a row-major `m x n` matrix (`m >= n`) by modified
/// Gram-Schmidt with one re-orthogonalisation pass.
///
/// Returns `(q, r)` with `q` `m x n` (orthonormal columns) and `r` `n x n` upper
/// triangular. Columns that are (numerically) in the span of the previous ones
/// get `r[j][j] = 0` and are replaced in `q` by a unit vector orthogonal to
/// the columns before them, so `q` is always orthonormal.
pub fn gram_schmidt<F: Float>(a: &[F], m: usize, n: usize) -> Result<(Vec<F>, Vec<F>), BallastError> {
    if m < n {
        return Err(BallastError::UnsupportedOperation(format!(
            "reduced QR of a wide {}x{} matrix",
            m, n
        )));
    }
    if a.len() != m * n {
        return Err(BallastError::ShapeMismatch {
            expected: vec![m, n],
            actual: vec![a.len()],
            operation: "qr".to_string(),
        });
    }
    if a.iter().any(|v| !v.is_finite()) {
        return Err(BallastError::NumericalDegeneracy {
            operation: "qr".to_string(),
            reason: "input contains non-finite values".to_string(),
        });
    }

    let scale = a.iter().fold(F::zero(), |acc, &x| acc.max(x.abs()));
    let size: F = num_traits::cast(m.max(1)).unwrap_or_else(F::one);
    let tol = F::epsilon() * size * scale;

    // Columns of q, stored contiguously for cache-friendly dot products.
    let mut cols: Vec<Vec<F>> = Vec::with_capacity(n);
    let mut r = vec![F::zero(); n * n];

    for j in 0..n {
        let mut v: Vec<F> = (0..m).map(|i| a[i * n + j]).collect();
        for _pass in 0..2 {
            for (i, qi) in cols.iter().enumerate() {
                let d = dot(qi, &v);
                r[i * n + j] = r[i * n + j] + d;
                axpy(&mut v, qi, -d);
            }
        }
        let norm = dot(&v, &v).sqrt();
        if norm > tol && norm > F::zero() {
            r[j * n + j] = norm;
            v.iter_mut().for_each(|x| *x = *x / norm);
        } else {
            log::trace!("qr: column {} is rank-deficient, substituting an orthogonal direction", j);
            r[j * n + j] = F::zero();
            v = orthogonal_complement_vector(&cols, m)?;
        }
        cols.push(v);
    }

    let mut q = vec![F::zero(); m * n];
    for (j, col) in cols.iter().enumerate() {
        for i in 0..m {
            q[i * n + j] = col[i];
        }
    }
    Ok((q, r))
}

fn dot<F: Float>(a: &[F], b: &[F]) -> F {
    a.iter().zip(b).fold(F::zero(), |acc, (&x, &y)| acc + x * y)
}

fn axpy<F: Float>(y: &mut [F], x: &[F], alpha: F) {
    y.iter_mut().zip(x).for_each(|(yi, &xi)| *yi = *yi + alpha * xi);
}

/// Picks the standard basis vector with the largest residual after projecting
/// out `cols`, and returns that residual normalised.
fn orthogonal_complement_vector<F: Float>(cols: &[Vec<F>], m: usize) -> Result<Vec<F>, BallastError> {
    let mut best: Option<(F, Vec<F>)> = None;
    for k in 0..m {
        let mut e = vec![F::zero(); m];
        e[k] = F::one();
        for _pass in 0..2 {
            for qi in cols {
                let d = dot(qi, &e);
                axpy(&mut e, qi, -d);
            }
        }
        let norm = dot(&e, &e).sqrt();
        if best.as_ref().map_or(true, |(b, _)| norm > *b) {
            best = Some((norm, e));
        }
    }
    match best {
        Some((norm, mut e)) if norm > F::zero() => {
            e.iter_mut().for_each(|x| *x = *x / norm);
            Ok(e)
        }
        _ => Err(BallastError::NumericalDegeneracy {
            operation: "qr".to_string(),
            reason: "no direction left orthogonal to the previous columns".to_string(),
        }),
    }
}

/// QR factorisation of a 2-D tensor (`m >= n`), computed in `f64`.
pub fn qr_op(a: &Tensor) -> Result<(Tensor, Tensor), BallastError> {
    let (m, n) = check_matrix(a)?;
    let promoted: Vec<f64> = a.data.iter().map(|&v| v as f64).collect();
    let (q, r) = gram_schmidt(&promoted, m, n)?;
    Ok((
        Tensor::new(q.into_iter().map(|v| v as f32).collect(), vec![m, n])?,
        Tensor::new(r.into_iter().map(|v| v as f32).collect(), vec![n, n])?,
    ))
}

#[cfg(test)]
#[path = "qr_test.rs"]
mod tests;
