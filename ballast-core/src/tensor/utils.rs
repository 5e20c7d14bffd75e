use crate::error::BallastError;

/// Calculates the strides for a given shape.
/// Strides represent the number of elements to skip in the flattened data array
/// to move one step along each dimension.
///
/// Example:
/// shape = [2, 3] -> strides = [3, 1]
/// shape = [2, 2, 2] -> strides = [4, 2, 1]
pub fn calculate_strides(shape: &[usize]) -> Vec<usize> {
    if shape.is_empty() {
        return vec![];
    }
    let rank = shape.len();
    let mut strides = vec![1; rank];
    for i in (0..rank - 1).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Flat offset of a multi-dimensional index in a contiguous tensor.
pub fn offset_of(index: &[usize], shape: &[usize]) -> Result<usize, BallastError> {
    if index.len() != shape.len() || index.iter().zip(shape).any(|(i, s)| i >= s) {
        return Err(BallastError::ShapeMismatch {
            expected: shape.to_vec(),
            actual: index.to_vec(),
            operation: "index".to_string(),
        });
    }
    let strides = calculate_strides(shape);
    Ok(index.iter().zip(strides.iter()).map(|(i, s)| i * s).sum())
}

/// Splits a shape around `axis` into `(outer, len, inner)` where
/// `outer` is the product of the leading dims and `inner` of the trailing ones.
///
/// The element at `(o, i, k)` lives at `(o * len + i) * inner + k`.
pub fn axis_split(shape: &[usize], axis: usize) -> Result<(usize, usize, usize), BallastError> {
    if axis >= shape.len() {
        return Err(BallastError::InvalidAxis {
            axis,
            rank: shape.len(),
        });
    }
    let outer: usize = shape[..axis].iter().product();
    let inner: usize = shape[axis + 1..].iter().product();
    Ok((outer, shape[axis], inner))
}
