use super::*;
use crate::grad_clipping::Clip;
use crate::param_group::ParamGroupOptions;
use approx::assert_relative_eq;
use std::sync::RwLock;

fn create_param(name: &str, data: Vec<f32>) -> ParamRef {
    let n = data.len();
    let tensor = Tensor::new(data, vec![n]).unwrap();
    Arc::new(RwLock::new(Parameter::new(tensor, Some(name.to_string()))))
}

fn set_grad(param: &ParamRef, grad: Vec<f32>) {
    let n = grad.len();
    param
        .write()
        .unwrap()
        .set_grad(Tensor::new(grad, vec![n]).unwrap())
        .unwrap();
}

fn values(param: &ParamRef) -> Vec<f32> {
    param.read().unwrap().tensor().data().to_vec()
}

fn adamw(params: Vec<ParamRef>, config: OptimizerConfig) -> BaseOptimizer {
    BaseOptimizer::new(Variant::AdamW, FeatureFlags::NONE, params, config).unwrap()
}

#[test]
fn test_adam_three_step_scenario() -> Result<(), BallastError> {
    let p = create_param("w", vec![1.0]);
    let mut opt = adamw(vec![p.clone()], OptimizerConfig::for_variant(Variant::AdamW));
    for _ in 0..3 {
        set_grad(&p, vec![1.0]);
        opt.step()?;
    }
    assert_relative_eq!(values(&p)[0], 0.9925, epsilon = 1e-6);
    assert_eq!(opt.param_state(&p).map(|s| s.step), Some(3));
    Ok(())
}

#[test]
fn test_zero_gradient_only_decays() -> Result<(), BallastError> {
    let p = create_param("w", vec![2.0, -4.0]);
    let config = OptimizerConfig::default().with_lr(0.1).with_weight_decay(0.5);
    let mut opt = adamw(vec![p.clone()], config);
    set_grad(&p, vec![0.0, 0.0]);
    opt.step()?;
    // Only p·(1 - lr·wd) = p·0.95 remains.
    assert_relative_eq!(values(&p)[0], 1.9, epsilon = 1e-6);
    assert_relative_eq!(values(&p)[1], -3.8, epsilon = 1e-6);
    Ok(())
}

#[test]
fn test_parameters_without_gradient_are_untouched() -> Result<(), BallastError> {
    let a = create_param("a", vec![1.0]);
    let b = create_param("b", vec![1.0]);
    let mut opt = adamw(vec![a.clone(), b.clone()], OptimizerConfig::default());
    set_grad(&a, vec![1.0]);
    opt.step()?;
    assert_eq!(values(&b), vec![1.0]);
    assert!(opt.param_state(&b).is_none());
    assert_eq!(opt.param_state(&a).map(|s| s.step), Some(1));
    Ok(())
}

#[test]
fn test_failed_step_changes_nothing() {
    let a = create_param("a", vec![1.0]);
    let b = create_param("b", vec![1.0, 2.0, 3.0]);
    let failing = Clip::custom(|x: &Tensor, _p: &Tensor| {
        if x.numel() == 3 {
            Err(BallastError::InternalError("boom".to_string()))
        } else {
            Ok(x.clone())
        }
    });
    let config = OptimizerConfig::default().with_gradient_clipping(failing);
    let mut opt = adamw(vec![a.clone(), b.clone()], config);
    set_grad(&a, vec![1.0]);
    set_grad(&b, vec![1.0, 1.0, 1.0]);
    assert!(opt.step().is_err());
    assert_eq!(values(&a), vec![1.0]);
    assert!(opt.param_state(&a).is_none());
}

#[test]
fn test_gradient_shape_mismatch_is_fatal() {
    let p = create_param("w", vec![1.0, 2.0]);
    let mut opt = adamw(vec![p.clone()], OptimizerConfig::default());
    set_grad(&p, vec![1.0, 1.0]);
    opt.step().unwrap();
    // Corrupt the stored moment's shape.
    let mut state = opt.state_dict().unwrap();
    let entry = state.params.get_mut(&0).unwrap();
    let mut rng = step_rng(0, 0, 0);
    let mut slice = StateSlice::new(&mut entry.values, "adam", ballast_core::DType::F32, &mut rng);
    slice.put_tensor("exp_avg", &Tensor::zeros(&[3]));
    opt.load_state_dict(&state).unwrap();
    set_grad(&p, vec![1.0, 1.0]);
    let before = values(&p);
    assert!(matches!(opt.step(), Err(BallastError::ShapeMismatch { .. })));
    assert_eq!(values(&p), before);
}

#[test]
fn test_warmup_ramp() -> Result<(), BallastError> {
    let p = create_param("w", vec![0.0]);
    let config = OptimizerConfig::default().with_lr(1.0).with_warmup_steps(4);
    let mut opt = adamw(vec![p.clone()], config);
    let mut previous = 0.0;
    for k in 1..=5 {
        set_grad(&p, vec![1.0]);
        opt.step()?;
        let now = values(&p)[0];
        let expected = if k < 4 { k as f32 / 4.0 } else { 1.0 };
        assert_relative_eq!(previous - now, expected, epsilon = 1e-5);
        previous = now;
    }
    Ok(())
}

#[test]
fn test_update_clipping_preserves_direction() -> Result<(), BallastError> {
    let clipped = create_param("c", vec![0.0, 0.0]);
    let free = create_param("f", vec![0.0, 0.0]);
    let mut opt_c = adamw(
        vec![clipped.clone()],
        OptimizerConfig::default()
            .with_update_clipping(Clip::Policy(ClipPolicy::L2 { max_norm: 0.1 })),
    );
    let mut opt_f = adamw(vec![free.clone()], OptimizerConfig::default());
    set_grad(&clipped, vec![3.0, -1.0]);
    set_grad(&free, vec![3.0, -1.0]);
    opt_c.step()?;
    opt_f.step()?;
    let c = values(&clipped);
    let f = values(&free);
    let ratio = c[0] / f[0];
    assert!(ratio > 0.0 && ratio < 1.0);
    assert_relative_eq!(c[1], f[1] * ratio, epsilon = 1e-7);
    Ok(())
}

#[test]
fn test_caution_zeroes_disagreeing_elements() -> Result<(), BallastError> {
    let p = create_param("w", vec![0.0, 0.0]);
    let mut opt = adamw(vec![p.clone()], OptimizerConfig::default().with_caution(true));
    for _ in 0..5 {
        set_grad(&p, vec![1.0, 1.0]);
        opt.step()?;
    }
    let before = values(&p);
    // Momentum still points up in element 0, the gradient now points down.
    set_grad(&p, vec![-0.01, 1.0]);
    opt.step()?;
    let after = values(&p);
    assert_eq!(after[0], before[0]);
    assert!(after[1] < before[1]);
    Ok(())
}

#[test]
fn test_mars_keeps_previous_gradient() -> Result<(), BallastError> {
    let p = create_param("w", vec![0.0]);
    let mut opt = adamw(vec![p.clone()], OptimizerConfig::default().with_mars(0.1));
    set_grad(&p, vec![2.0]);
    opt.step()?;
    let state = opt.param_state(&p).unwrap();
    assert!(state.values.contains_key("mars.old_grad"));
    Ok(())
}

#[test]
fn test_caution_masks_against_mars_corrected_gradient() -> Result<(), BallastError> {
    // γ·β₁/(1-β₁) = 0.9, so a raw gradient of 0.2 after 1.0 corrects to -0.52.
    let run = |config: OptimizerConfig| -> Result<(Vec<f32>, Vec<f32>), BallastError> {
        let p = create_param("w", vec![0.0, 0.0]);
        let mut opt = adamw(vec![p.clone()], config.with_caution(true));
        for _ in 0..5 {
            set_grad(&p, vec![1.0, 1.0]);
            opt.step()?;
        }
        let before = values(&p);
        set_grad(&p, vec![0.2, 1.0]);
        opt.step()?;
        Ok((before, values(&p)))
    };

    // Momentum and the raw gradient are positive, the corrected gradient is not.
    let (before, after) = run(OptimizerConfig::default().with_mars(0.1))?;
    assert_eq!(after[0], before[0]);
    assert!(after[1] < before[1]);

    let (before, after) = run(OptimizerConfig::default())?;
    assert!(after[0] < before[0]);
    assert!(after[1] < before[1]);
    Ok(())
}

#[test]
fn test_group_overrides() -> Result<(), BallastError> {
    let a = create_param("a", vec![0.0]);
    let b = create_param("b", vec![0.0]);
    let mut opt = adamw(vec![a.clone()], OptimizerConfig::default().with_lr(0.1));
    opt.add_param_group(ParamGroup::with_options(
        vec![b.clone()],
        ParamGroupOptions {
            lr: Some(0.2),
            ..ParamGroupOptions::default()
        },
    ))?;
    set_grad(&a, vec![1.0]);
    set_grad(&b, vec![1.0]);
    opt.step()?;
    assert_relative_eq!(values(&a)[0], -0.1, epsilon = 1e-6);
    assert_relative_eq!(values(&b)[0], -0.2, epsilon = 1e-6);

    opt.param_groups_mut()[1].set_lr(0.0);
    set_grad(&b, vec![1.0]);
    opt.step()?;
    assert_relative_eq!(values(&b)[0], -0.2, epsilon = 1e-6);
    Ok(())
}

#[test]
fn test_construction_errors() {
    let p = create_param("w", vec![0.0]);
    assert!(matches!(
        BaseOptimizer::new(Variant::SfAdamW, FeatureFlags::NONE, vec![p.clone()], OptimizerConfig::default()),
        Err(BallastError::ConfigurationError(_))
    ));
    assert!(matches!(
        BaseOptimizer::new(
            Variant::AdamW,
            FeatureFlags::NONE,
            vec![p.clone(), p.clone()],
            OptimizerConfig::default()
        ),
        Err(BallastError::ConfigurationError(_))
    ));
    assert!(matches!(
        BaseOptimizer::new(
            Variant::AdamW,
            FeatureFlags::NONE,
            vec![p],
            OptimizerConfig::default().with_lr(f32::NAN)
        ),
        Err(BallastError::ConfigurationError(_))
    ));
}

#[test]
fn test_zero_grad_drops_gradients() {
    let p = create_param("w", vec![0.0]);
    let mut opt = adamw(vec![p.clone()], OptimizerConfig::default());
    set_grad(&p, vec![1.0]);
    opt.zero_grad();
    assert!(p.read().unwrap().grad().is_none());
}

#[test]
fn test_step_with_closure_returns_loss() -> Result<(), BallastError> {
    let p = create_param("w", vec![1.0]);
    let mut opt = adamw(vec![p.clone()], OptimizerConfig::default());
    let loss = opt.step_with_closure(|| {
        set_grad(&p, vec![1.0]);
        Ok(0.5)
    })?;
    assert_eq!(loss, 0.5);
    assert!(values(&p)[0] < 1.0);
    Ok(())
}
