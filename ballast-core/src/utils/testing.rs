use crate::tensor::Tensor;

/// Checks that a tensor has the expected shape and that every element is within
/// `tolerance` of the expected data.
/// Panics with the first offending index otherwise. Intended for tests.
pub fn check_tensor_near(actual: &Tensor, expected_shape: &[usize], expected_data: &[f32], tolerance: f32) {
    assert_eq!(actual.shape(), expected_shape, "Shape mismatch");
    assert_eq!(actual.numel(), expected_data.len(), "Data length mismatch");

    for (i, (a, e)) in actual.data().iter().zip(expected_data.iter()).enumerate() {
        let diff = (*a - *e).abs();
        if diff > tolerance || diff.is_nan() {
            panic!(
                "Data mismatch at index {}: actual={:?}, expected={:?}, diff={:?}, tolerance={:?}",
                i, a, e, diff, tolerance
            );
        }
    }
}

/// Checks that two tensors have the same shape and are element-wise within `tolerance`.
pub fn check_tensors_close(actual: &Tensor, expected: &Tensor, tolerance: f32) {
    check_tensor_near(actual, expected.shape(), expected.data(), tolerance);
}
