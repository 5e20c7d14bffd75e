mod common;

use ballast_core::{BallastError, DType};
use ballast_optim::{
    create_optimizer, BaseOptimizer, FeatureFlags, MemorySaveMode, Optimizer, OptimizerConfig,
    PsgdConfig, SoapConfig, UpdateProbability, Variant,
};
use common::{create_model, init_logger, set_quadratic_grads, set_random_grads};

fn all_finite(params: &[ballast_optim::ParamRef]) -> bool {
    params
        .iter()
        .all(|p| p.read().map(|g| g.tensor().is_finite()).unwrap_or(false))
}

fn descend(opt: &mut impl Optimizer, params: &[ballast_optim::ParamRef], steps: usize) -> (f32, f32) {
    let initial = set_quadratic_grads(params, 0.0);
    let mut last = initial;
    for _ in 0..steps {
        opt.step().expect("step");
        last = set_quadratic_grads(params, 0.0);
    }
    (initial, last)
}

#[test]
fn test_soap_descends_a_quadratic() -> Result<(), BallastError> {
    init_logger();
    let params = create_model(1);
    let config = OptimizerConfig::for_variant(Variant::Soap).with_lr(0.05);
    let mut opt = create_optimizer("SOAP", params.clone(), config)?;
    let (initial, last) = descend(&mut opt, &params, 60);
    assert!(last < 0.5 * initial, "loss {} -> {}", initial, last);
    assert!(all_finite(&params));
    Ok(())
}

#[test]
fn test_soap_with_split_shards_and_schedule() -> Result<(), BallastError> {
    let params = create_model(2);
    let soap = SoapConfig {
        max_precond_dim: 3,
        split: true,
        merge_dims: false,
        precondition_1d: true,
        ..SoapConfig::default()
    };
    let config = OptimizerConfig::for_variant(Variant::Soap)
        .with_soap(soap)
        .with_storage_dtype(DType::BF16);
    let mut opt = create_optimizer("PrecondScheduleSOAP", params.clone(), config)?;
    for t in 0..8 {
        set_random_grads(&params, t);
        opt.step()?;
    }
    assert!(all_finite(&params));
    let state = opt.state_dict()?;
    // The [4, 6] weight splits into four [≤3, 3] blocks.
    let weight = &state.params[&0];
    assert!(weight.values.keys().any(|k| k.starts_with("soap.3.")));
    assert!(!weight.values.keys().any(|k| k.starts_with("soap.4.")));
    Ok(())
}

#[test]
fn test_psgd_descends_a_quadratic() -> Result<(), BallastError> {
    init_logger();
    for name in ["PSGDKron", "PurePSGD", "DelayedPSGD", "CachedPSGDKron", "CachedDelayedPSGDKron"] {
        let params = create_model(4);
        let config = OptimizerConfig::for_variant(Variant::PsgdKron).with_lr(0.02);
        let mut opt = create_optimizer(name, params.clone(), config)?;
        let (initial, last) = descend(&mut opt, &params, 60);
        assert!(last < initial, "{}: loss {} -> {}", name, initial, last);
        assert!(all_finite(&params), "{} produced non-finite values", name);
    }
    Ok(())
}

#[test]
fn test_psgd_memory_modes_and_layouts() -> Result<(), BallastError> {
    let flags = FeatureFlags {
        exp_avg_input: true,
        ..FeatureFlags::NONE
    };
    let settings = [
        PsgdConfig {
            memory_save_mode: Some(MemorySaveMode::OneDiag),
            ..PsgdConfig::default()
        },
        PsgdConfig {
            memory_save_mode: Some(MemorySaveMode::AllDiag),
            stochastic_schedule: false,
            ..PsgdConfig::default()
        },
        PsgdConfig {
            merge_dims: true,
            split: true,
            max_size_triangular: 4,
            store_triu_as_line: false,
            update_probability: Some(UpdateProbability::Constant(1.0)),
            q_dtype: DType::BF16,
            ..PsgdConfig::default()
        },
    ];
    for psgd in settings {
        let params = create_model(9);
        let config = OptimizerConfig::for_variant(Variant::PsgdKron).with_psgd(psgd);
        let mut opt = BaseOptimizer::new(Variant::PsgdKron, flags, params.clone(), config)?;
        for t in 0..6 {
            set_random_grads(&params, t);
            opt.step()?;
        }
        assert!(all_finite(&params));
    }
    Ok(())
}
