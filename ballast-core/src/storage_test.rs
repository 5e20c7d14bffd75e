use super::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn sample() -> Tensor {
    Tensor::new(vec![0.1, -3.7, 1e-3, 12345.678, 0.0, -0.25], vec![2, 3]).unwrap()
}

#[test]
fn test_f32_and_f64_are_exact() {
    let t = sample();
    for dtype in [DType::F32, DType::F64] {
        let stored = StoredTensor::encode_nearest(&t, dtype);
        assert_eq!(stored.dtype(), dtype);
        assert_eq!(stored.shape(), &[2, 3]);
        assert_eq!(stored.decode(), t);
    }
}

#[test]
fn test_bf16_reencoding_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(0);
    let once = StoredTensor::encode(&sample(), DType::BF16, &mut rng);
    let decoded = once.decode();
    for _ in 0..10 {
        let again = StoredTensor::encode(&decoded, DType::BF16, &mut rng);
        assert_eq!(again, once);
        assert_eq!(again.decode(), decoded);
    }
}

#[test]
fn test_bf16_relative_error_is_small() {
    let t = sample();
    let decoded = StoredTensor::encode_nearest(&t, DType::BF16).decode();
    for (a, b) in decoded.data().iter().zip(t.data()) {
        assert!((a - b).abs() <= b.abs() * 2f32.powi(-8));
    }
    assert_eq!(StoredTensor::encode_nearest(&t, DType::BF16).numel(), 6);
}
