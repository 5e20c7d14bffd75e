use super::*;

#[test]
fn test_variant_defaults() {
    let adam = OptimizerConfig::for_variant(Variant::AdamW);
    assert_eq!(adam.lr, 0.0025);
    assert_eq!(adam.betas, (0.9, 0.99));
    assert_eq!(adam.eps, 1e-8);

    assert_eq!(OptimizerConfig::for_variant(Variant::SfAdamW).eps, 1e-6);
    assert_eq!(OptimizerConfig::for_variant(Variant::RmsProp).eps, 1e-6);

    let soap = OptimizerConfig::for_variant(Variant::Soap);
    assert_eq!(soap.lr, 3e-3);
    assert_eq!(soap.betas, (0.9, 0.95));
    assert_eq!(soap.weight_decay, 0.01);
    assert_eq!(soap.warmup_steps, 1);
    assert_eq!(soap.soap.precondition_frequency, Some(2));

    let psgd = OptimizerConfig::for_variant(Variant::PsgdKron);
    assert_eq!(psgd.lr, 0.001);
    assert_eq!(psgd.betas.0, 0.9);
    assert_eq!(psgd.psgd.precond_lr, 0.1);
    assert_eq!(
        OptimizerConfig::default_update_clip(Variant::PsgdKron),
        ClipPolicy::TRUST_REGION
    );
}

#[test]
fn test_defaults_validate_for_every_variant() {
    for variant in [
        Variant::AdamW,
        Variant::RmsProp,
        Variant::SfAdamW,
        Variant::Adopt,
        Variant::LaProp,
        Variant::Soap,
        Variant::PsgdKron,
    ] {
        OptimizerConfig::for_variant(variant)
            .validate(variant, &FeatureFlags::NONE)
            .unwrap_or_else(|e| panic!("{} defaults rejected: {}", variant, e));
    }
}

#[test]
fn test_range_checks() {
    let cfg = OptimizerConfig::default();
    let none = FeatureFlags::NONE;
    for bad in [
        cfg.clone().with_lr(-1.0),
        cfg.clone().with_betas(1.0, 0.9),
        cfg.clone().with_betas(0.9, -0.1),
        cfg.clone().with_eps(0.0),
        cfg.clone().with_weight_decay(-0.5),
        cfg.clone().with_update_clipping(Clip::Policy(ClipPolicy::L2 { max_norm: -1.0 })),
    ] {
        assert!(matches!(
            bad.validate(Variant::AdamW, &none),
            Err(BallastError::ConfigurationError(_))
        ));
    }
}

#[test]
fn test_schedule_free_requires_momentum() {
    let cfg = OptimizerConfig::for_variant(Variant::SfAdamW).with_betas(0.0, 0.99);
    assert!(cfg.validate(Variant::SfAdamW, &FeatureFlags::NONE).is_err());
    // Plain AdamW accepts beta1 = 0.
    assert!(cfg.validate(Variant::AdamW, &FeatureFlags::NONE).is_ok());
}

#[test]
fn test_soap_requires_the_selected_cadence() {
    let scheduled = FeatureFlags {
        use_precond_schedule: true,
        ..FeatureFlags::NONE
    };
    let mut cfg = OptimizerConfig::for_variant(Variant::Soap);
    cfg.soap.precondition_frequency = None;
    assert!(cfg.validate(Variant::Soap, &FeatureFlags::NONE).is_err());
    assert!(cfg.validate(Variant::Soap, &scheduled).is_ok());

    let mut cfg = OptimizerConfig::for_variant(Variant::Soap);
    cfg.soap.precond_scheduler = None;
    assert!(cfg.validate(Variant::Soap, &scheduled).is_err());
    assert!(cfg.validate(Variant::Soap, &FeatureFlags::NONE).is_ok());

    cfg.soap.precondition_frequency = Some(0);
    assert!(cfg.validate(Variant::Soap, &FeatureFlags::NONE).is_err());
}

#[test]
fn test_flags_outside_their_family_are_rejected() {
    let delayed = FeatureFlags {
        delayed: true,
        ..FeatureFlags::NONE
    };
    let cfg = OptimizerConfig::for_variant(Variant::AdamW);
    assert!(cfg.validate(Variant::AdamW, &delayed).is_err());
    let psgd = OptimizerConfig::for_variant(Variant::PsgdKron);
    assert!(psgd.validate(Variant::PsgdKron, &delayed).is_ok());

    let scheduled = FeatureFlags {
        use_precond_schedule: true,
        ..FeatureFlags::NONE
    };
    assert!(cfg.validate(Variant::AdamW, &scheduled).is_err());

    let palm_psgd = FeatureFlags {
        palm: true,
        exp_avg_input: true,
        ..FeatureFlags::NONE
    };
    assert!(matches!(
        psgd.validate(Variant::PsgdKron, &palm_psgd),
        Err(BallastError::ConfigurationError(_))
    ));
    let palm = FeatureFlags {
        palm: true,
        ..FeatureFlags::NONE
    };
    assert!(cfg.validate(Variant::AdamW, &palm).is_ok());
}

#[test]
fn test_psgd_probability_checks() {
    let mut cfg = OptimizerConfig::for_variant(Variant::PsgdKron);
    cfg.psgd.update_probability = Some(UpdateProbability::Constant(1.5));
    assert!(cfg.validate(Variant::PsgdKron, &FeatureFlags::NONE).is_err());
    cfg.psgd.update_probability = Some(UpdateProbability::Schedule(ProbSchedule {
        min_prob: 0.5,
        max_prob: 0.1,
        ..ProbSchedule::default()
    }));
    assert!(cfg.validate(Variant::PsgdKron, &FeatureFlags::NONE).is_err());
    cfg.psgd.update_probability = Some(UpdateProbability::Constant(0.25));
    assert!(cfg.validate(Variant::PsgdKron, &FeatureFlags::NONE).is_ok());
}

#[test]
fn test_group_overrides_resolve() {
    let cfg = OptimizerConfig::default();
    let options = ParamGroupOptions {
        lr: Some(0.5),
        weight_decay: Some(0.1),
        ..ParamGroupOptions::default()
    };
    let resolved = cfg.resolved(&options);
    assert_eq!(resolved.lr, 0.5);
    assert_eq!(resolved.weight_decay, 0.1);
    assert_eq!(resolved.betas, cfg.betas);
}
