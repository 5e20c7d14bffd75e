//! Dimension layout for the preconditioning optimizers.
//!
//! A parameter is viewed with a (possibly merged) shape and cut into shards;
//! each shard gets its own preconditioner. The layout depends only on the
//! parameter shape and the configuration, so it never changes during training.

use ballast_core::{BallastError, Tensor};

/// Folds small trailing axes together.
///
/// Axis 0 is kept; the remaining axes are merged right-to-left while the
/// running product stays within `cap`. Size-1 axes are dropped. Scalars and
/// all-ones shapes become `[1]`.
pub fn merge_dims(shape: &[usize], cap: usize) -> Vec<usize> {
    if shape.contains(&0) {
        return vec![0];
    }
    let dims: Vec<usize> = shape.iter().copied().filter(|&d| d != 1).collect();
    let Some((&first, rest)) = dims.split_first() else {
        return vec![1];
    };
    let mut merged = Vec::new();
    let mut acc = 1usize;
    for &d in rest.iter().rev() {
        if acc.saturating_mul(d) <= cap {
            acc *= d;
        } else {
            if acc > 1 {
                merged.push(acc);
            }
            acc = d;
        }
    }
    if acc > 1 {
        merged.push(acc);
    }
    merged.push(first);
    merged.reverse();
    merged
}

/// One block of the viewed tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub starts: Vec<usize>,
    pub lens: Vec<usize>,
}

/// How a parameter is viewed and sharded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    original: Vec<usize>,
    view: Vec<usize>,
    shards: Vec<Shard>,
}

impl Layout {
    pub fn new(shape: &[usize], merge: bool, split: bool, cap: usize) -> Layout {
        let view = if merge {
            merge_dims(shape, cap)
        } else if shape.is_empty() {
            vec![1]
        } else {
            shape.to_vec()
        };
        let shards = if split && !view.contains(&0) {
            split_shards(&view, cap.max(1))
        } else {
            vec![Shard {
                starts: vec![0; view.len()],
                lens: view.clone(),
            }]
        };
        Layout {
            original: shape.to_vec(),
            view,
            shards,
        }
    }

    pub fn view_shape(&self) -> &[usize] {
        &self.view
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    /// Cuts `x` (in the original shape) into shard tensors.
    pub fn gather(&self, x: &Tensor) -> Result<Vec<Tensor>, BallastError> {
        let viewed = x.reshape(&self.view)?;
        if self.shards.len() == 1 {
            return Ok(vec![viewed]);
        }
        self.shards
            .iter()
            .map(|s| viewed.slice_box(&s.starts, &s.lens))
            .collect()
    }

    /// Reassembles shard tensors into the original shape.
    pub fn scatter(&self, parts: Vec<Tensor>) -> Result<Tensor, BallastError> {
        if parts.len() != self.shards.len() {
            return Err(BallastError::InternalError(format!(
                "layout has {} shards but {} parts were given",
                self.shards.len(),
                parts.len()
            )));
        }
        let mut out = Tensor::zeros(&self.view);
        if self.shards.len() == 1 {
            if let Some(part) = parts.into_iter().next() {
                out.copy_from_(&part)?;
            }
        } else {
            for (shard, part) in self.shards.iter().zip(parts.iter()) {
                out.write_box_(&shard.starts, part)?;
            }
        }
        out.into_shape(&self.original)
    }
}

/// Row-major enumeration of the blocks obtained by cutting every axis longer
/// than `cap` into chunks of `cap`.
fn split_shards(view: &[usize], cap: usize) -> Vec<Shard> {
    let chunks: Vec<Vec<(usize, usize)>> = view
        .iter()
        .map(|&d| {
            (0..d)
                .step_by(cap)
                .map(|start| (start, cap.min(d - start)))
                .collect()
        })
        .collect();
    let mut shards = Vec::new();
    let mut index = vec![0usize; view.len()];
    loop {
        shards.push(Shard {
            starts: index.iter().enumerate().map(|(a, &i)| chunks[a][i].0).collect(),
            lens: index.iter().enumerate().map(|(a, &i)| chunks[a][i].1).collect(),
        });
        let mut axis = view.len();
        loop {
            if axis == 0 {
                return shards;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < chunks[axis].len() {
                break;
            }
            index[axis] = 0;
        }
    }
}

#[cfg(test)]
#[path = "layout_test.rs"]
mod tests;
