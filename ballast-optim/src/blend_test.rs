use super::*;
use approx::assert_relative_eq;

#[test]
fn test_mars_correction() {
    let g = Tensor::from_slice(&[1.0, 2.0]);
    let prev = Tensor::from_slice(&[0.0, 2.0]);
    let out = mars_correction(&g, &prev, 0.1, 0.9).unwrap();
    // coef = 0.1 * 0.9 / 0.1 = 0.9
    assert_relative_eq!(out.data()[0], 1.9, epsilon = 1e-6);
    assert_relative_eq!(out.data()[1], 2.0, epsilon = 1e-6);
    assert_eq!(mars_correction(&g, &prev, 0.1, 0.0).unwrap(), g);
}

#[test]
fn test_caution_masks_and_rescales() {
    let update = Tensor::from_slice(&[1.0, -1.0, 2.0, 3.0]);
    let grad = Tensor::from_slice(&[0.5, 0.5, 1.0, -1.0]);
    let out = caution(&update, &grad).unwrap();
    // Two of four masked: survivors doubled.
    assert_eq!(out.data(), &[2.0, 0.0, 4.0, 0.0]);
}

#[test]
fn test_caution_all_masked_gives_zeros() {
    let update = Tensor::from_slice(&[1.0, 2.0]);
    let grad = Tensor::from_slice(&[-1.0, -2.0]);
    let out = caution(&update, &grad).unwrap();
    assert_eq!(out, Tensor::zeros(&[2]));
}

#[test]
fn test_caution_uses_sign_bits() {
    let update = Tensor::from_slice(&[0.0, 1.0]);
    let grad = Tensor::from_slice(&[-0.0, 1.0]);
    let out = caution(&update, &grad).unwrap();
    assert_eq!(out.data(), &[0.0, 2.0]);
}
