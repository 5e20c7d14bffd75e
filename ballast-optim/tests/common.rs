use ballast_core::tensor::create::randn;
use ballast_core::{Parameter, Tensor};
use ballast_optim::ParamRef;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, RwLock};

// Helpers shared by several integration test files; not every file uses every helper.
#[allow(dead_code)]
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[allow(dead_code)]
pub fn create_param(name: &str, data: Vec<f32>, shape: Vec<usize>) -> ParamRef {
    let tensor = Tensor::new(data, shape).expect("Test tensor creation failed");
    Arc::new(RwLock::new(Parameter::new(tensor, Some(name.to_string()))))
}

/// A small model: a 2-D weight, a 3-D kernel and a bias.
#[allow(dead_code)]
pub fn create_model(seed: u64) -> Vec<ParamRef> {
    let mut rng = StdRng::seed_from_u64(seed);
    [("weight", vec![4, 6]), ("kernel", vec![2, 3, 4]), ("bias", vec![5])]
        .into_iter()
        .map(|(name, shape)| {
            let t = randn(&shape, &mut rng);
            Arc::new(RwLock::new(Parameter::new(t, Some(name.to_string()))))
        })
        .collect()
}

/// Independent copies of `params` with the same values and fresh ids.
#[allow(dead_code)]
pub fn clone_model(params: &[ParamRef]) -> Vec<ParamRef> {
    params
        .iter()
        .map(|p| {
            let guard = p.read().expect("read lock");
            let name = guard.name().map(str::to_string);
            Arc::new(RwLock::new(Parameter::new(guard.tensor().clone(), name)))
        })
        .collect()
}

/// Sets deterministic pseudo-random gradients depending on `step`.
#[allow(dead_code)]
pub fn set_random_grads(params: &[ParamRef], step: u64) {
    let mut rng = StdRng::seed_from_u64(1000 + step);
    for p in params {
        let mut guard = p.write().expect("write lock");
        let g = randn(guard.shape(), &mut rng);
        guard.set_grad(g).expect("gradient shape");
    }
}

/// Sets the gradient of `0.5·‖p - target‖²`, i.e. `p - target`, and returns the loss.
#[allow(dead_code)]
pub fn set_quadratic_grads(params: &[ParamRef], target: f32) -> f32 {
    let mut loss = 0.0;
    for p in params {
        let mut guard = p.write().expect("write lock");
        let g = guard.tensor().map(|v| v - target);
        loss += 0.5 * g.sum_sq() as f32;
        guard.set_grad(g).expect("gradient shape");
    }
    loss
}

#[allow(dead_code)]
pub fn snapshot(params: &[ParamRef]) -> Vec<Vec<f32>> {
    params
        .iter()
        .map(|p| p.read().expect("read lock").tensor().data().to_vec())
        .collect()
}
