use super::*;

#[test]
fn test_matmul_2x3_3x2() {
    let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
    let b = Tensor::new(vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0], vec![3, 2]).unwrap();
    let c = matmul_op(&a, &b).unwrap();
    assert_eq!(c.shape(), &[2, 2]);
    assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);
}

#[test]
fn test_matmul_shape_errors() {
    let a = Tensor::zeros(&[2, 3]);
    let b = Tensor::zeros(&[2, 3]);
    assert!(matches!(
        matmul_op(&a, &b),
        Err(BallastError::ShapeMismatch { .. })
    ));
    let v = Tensor::zeros(&[3]);
    assert!(matches!(
        matmul_op(&a, &v),
        Err(BallastError::DimensionMismatch { expected: 2, actual: 1 })
    ));
}

#[test]
fn test_transpose_and_gram() {
    let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
    let at = transpose_op(&a).unwrap();
    assert_eq!(at.shape(), &[3, 2]);
    assert_eq!(at.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

    let g = gram_op(&a).unwrap();
    let expected = matmul_op(&at, &a).unwrap();
    assert_eq!(g, expected);
}
