//! Per-axis ("mode") operations.
//!
//! These are the building blocks of Kronecker-factored preconditioning: a
//! matrix applied along one axis of an n-d tensor, and the Gram matrix of the
//! tensor unfolded along one axis.

use crate::error::BallastError;
use crate::tensor::utils::{axis_split, calculate_strides};
use crate::tensor::Tensor;

impl Tensor {
    /// Applies `mat` along `axis`:
    /// `out[.., i, ..] = sum_j mat[i, j] * self[.., j, ..]`.
    ///
    /// `mat` must be 2-D with `mat.shape()[1] == self.shape()[axis]`; the output
    /// has `mat.shape()[0]` entries along `axis`.
    pub fn mode_product(&self, axis: usize, mat: &Tensor) -> Result<Tensor, BallastError> {
        let (outer, n, inner) = axis_split(&self.shape, axis)?;
        if mat.rank() != 2 || mat.shape[1] != n {
            return Err(BallastError::ShapeMismatch {
                expected: vec![mat.shape.first().copied().unwrap_or(n), n],
                actual: mat.shape.clone(),
                operation: "mode_product".to_string(),
            });
        }
        let m = mat.shape[0];
        let mut out_shape = self.shape.clone();
        out_shape[axis] = m;
        let mut out = vec![0.0f32; outer * m * inner];
        let mut acc = vec![0.0f64; inner];
        for o in 0..outer {
            for i in 0..m {
                acc.iter_mut().for_each(|a| *a = 0.0);
                for j in 0..n {
                    let w = mat.at2(i, j) as f64;
                    if w == 0.0 {
                        continue;
                    }
                    let base = (o * n + j) * inner;
                    for (a, &x) in acc.iter_mut().zip(&self.data[base..base + inner]) {
                        *a += w * x as f64;
                    }
                }
                let base = (o * m + i) * inner;
                for (dst, &a) in out[base..base + inner].iter_mut().zip(acc.iter()) {
                    *dst = a as f32;
                }
            }
        }
        Tensor::new(out, out_shape)
    }

    /// Scales every slice along `axis` by the matching entry of the 1-D `diag`.
    /// Equivalent to `mode_product` with a diagonal matrix.
    pub fn mode_scale(&self, axis: usize, diag: &Tensor) -> Result<Tensor, BallastError> {
        let (outer, n, inner) = axis_split(&self.shape, axis)?;
        if diag.rank() != 1 || diag.shape[0] != n {
            return Err(BallastError::ShapeMismatch {
                expected: vec![n],
                actual: diag.shape.clone(),
                operation: "mode_scale".to_string(),
            });
        }
        let mut out = self.clone();
        for o in 0..outer {
            for (j, &d) in diag.data.iter().enumerate() {
                let base = (o * n + j) * inner;
                out.data[base..base + inner].iter_mut().for_each(|v| *v *= d);
            }
        }
        Ok(out)
    }

    /// Gram matrix of the mode-`axis` unfolding:
    /// `G[i, j] = sum over all other indices of self[.., i, ..] * self[.., j, ..]`.
    pub fn mode_gram(&self, axis: usize) -> Result<Tensor, BallastError> {
        let (outer, n, inner) = axis_split(&self.shape, axis)?;
        let mut gram = vec![0.0f64; n * n];
        for o in 0..outer {
            for i in 0..n {
                let row_i = &self.data[(o * n + i) * inner..(o * n + i + 1) * inner];
                for j in i..n {
                    let row_j = &self.data[(o * n + j) * inner..(o * n + j + 1) * inner];
                    let dot: f64 = row_i
                        .iter()
                        .zip(row_j.iter())
                        .map(|(&a, &b)| a as f64 * b as f64)
                        .sum();
                    gram[i * n + j] += dot;
                }
            }
        }
        let mut data = vec![0.0f32; n * n];
        for i in 0..n {
            for j in i..n {
                data[i * n + j] = gram[i * n + j] as f32;
                data[j * n + i] = gram[i * n + j] as f32;
            }
        }
        Tensor::new(data, vec![n, n])
    }

    /// Diagonal of [`Tensor::mode_gram`]: the sum of squares of every slice along `axis`.
    pub fn mode_sum_sq(&self, axis: usize) -> Result<Tensor, BallastError> {
        let (outer, n, inner) = axis_split(&self.shape, axis)?;
        let mut acc = vec![0.0f64; n];
        for o in 0..outer {
            for (j, a) in acc.iter_mut().enumerate() {
                let base = (o * n + j) * inner;
                *a += self.data[base..base + inner]
                    .iter()
                    .map(|&v| v as f64 * v as f64)
                    .sum::<f64>();
            }
        }
        Tensor::new(acc.into_iter().map(|v| v as f32).collect(), vec![n])
    }

    /// Reorders the slices along `axis`: `out[.., i, ..] = self[.., indices[i], ..]`.
    pub fn index_select(&self, axis: usize, indices: &[usize]) -> Result<Tensor, BallastError> {
        let (outer, n, inner) = axis_split(&self.shape, axis)?;
        if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
            return Err(BallastError::ShapeMismatch {
                expected: vec![n],
                actual: vec![bad],
                operation: "index_select".to_string(),
            });
        }
        let m = indices.len();
        let mut out = Vec::with_capacity(outer * m * inner);
        for o in 0..outer {
            for &src in indices {
                let base = (o * n + src) * inner;
                out.extend_from_slice(&self.data[base..base + inner]);
            }
        }
        let mut shape = self.shape.clone();
        shape[axis] = m;
        Tensor::new(out, shape)
    }

    /// Copies out the rectangular block starting at `starts` with extents `lens`.
    pub fn slice_box(&self, starts: &[usize], lens: &[usize]) -> Result<Tensor, BallastError> {
        self.check_box(starts, lens, "slice_box")?;
        let strides = calculate_strides(&self.shape);
        let numel: usize = lens.iter().product();
        let mut data = Vec::with_capacity(numel);
        let mut coord = vec![0usize; lens.len()];
        for _ in 0..numel {
            let offset: usize = coord
                .iter()
                .zip(starts)
                .zip(&strides)
                .map(|((c, s), st)| (c + s) * st)
                .sum();
            data.push(self.data[offset]);
            advance(&mut coord, lens);
        }
        Tensor::new(data, lens.to_vec())
    }

    /// Writes `part` into the rectangular block starting at `starts`.
    pub fn write_box_(&mut self, starts: &[usize], part: &Tensor) -> Result<(), BallastError> {
        self.check_box(starts, &part.shape, "write_box_")?;
        let strides = calculate_strides(&self.shape);
        let mut coord = vec![0usize; part.rank()];
        for &value in part.data.iter() {
            let offset: usize = coord
                .iter()
                .zip(starts)
                .zip(&strides)
                .map(|((c, s), st)| (c + s) * st)
                .sum();
            self.data[offset] = value;
            advance(&mut coord, &part.shape);
        }
        Ok(())
    }

    fn check_box(&self, starts: &[usize], lens: &[usize], operation: &str) -> Result<(), BallastError> {
        let fits = starts.len() == self.rank()
            && lens.len() == self.rank()
            && starts
                .iter()
                .zip(lens)
                .zip(&self.shape)
                .all(|((s, l), d)| s + l <= *d);
        if !fits {
            return Err(BallastError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: lens.to_vec(),
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}

/// Row-major increment of a multi-index.
fn advance(coord: &mut [usize], extents: &[usize]) {
    for d in (0..coord.len()).rev() {
        coord[d] += 1;
        if coord[d] < extents[d] {
            return;
        }
        coord[d] = 0;
    }
}

#[cfg(test)]
#[path = "axis_methods_test.rs"]
mod tests;
