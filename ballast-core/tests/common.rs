use ballast_core::tensor::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;

// Helper used by several integration test files; not every file uses every helper.
#[allow(dead_code)]
pub fn create_test_tensor(data: Vec<f32>, shape: Vec<usize>) -> Tensor {
    Tensor::new(data, shape).expect("Test tensor creation failed")
}

/// A random symmetric positive semi-definite `n x n` matrix `X Xᵀ`.
#[allow(dead_code)]
pub fn random_psd(n: usize, seed: u64) -> Tensor {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = ballast_core::tensor::create::randn(&[n, n + 2], &mut rng);
    x.mode_gram(0).expect("gram of a 2-D tensor")
}
