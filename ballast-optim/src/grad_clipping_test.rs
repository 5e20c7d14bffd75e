use super::*;
use approx::assert_relative_eq;

fn sample() -> Tensor {
    Tensor::from_slice(&[3.0, -4.0, 0.0, 0.5])
}

/// Every element of `clipped` is a non-negative multiple of the matching element of `x`.
fn assert_same_direction(x: &Tensor, clipped: &Tensor) {
    for (&a, &b) in x.data().iter().zip(clipped.data()) {
        assert!(a * b >= 0.0, "sign flipped: {} -> {}", a, b);
        if a == 0.0 {
            assert_eq!(b, 0.0);
        }
    }
}

#[test]
fn test_l2_clip_scales_to_max_norm() {
    let x = sample();
    let out = ClipPolicy::L2 { max_norm: 1.0 }.apply(&x, &x).unwrap();
    assert_relative_eq!(out.norm(), 1.0, epsilon = 1e-6);
    assert_same_direction(&x, &out);
    // Already small enough: unchanged.
    let small = Tensor::from_slice(&[0.1, 0.2]);
    assert_eq!(ClipPolicy::L2 { max_norm: 1.0 }.apply(&small, &small).unwrap(), small);
}

#[test]
fn test_rmsnorm_clip() {
    let x = sample();
    let out = ClipPolicy::RmsNorm { max_rms: 0.5 }.apply(&x, &x).unwrap();
    assert_relative_eq!(out.rms(), 0.5, epsilon = 1e-6);
    let ratio = out.data()[0] / x.data()[0];
    for (&a, &b) in x.data().iter().zip(out.data()) {
        assert_relative_eq!(b, a * ratio, epsilon = 1e-6);
    }
}

#[test]
fn test_elementwise_policies_preserve_signs() {
    let x = Tensor::from_slice(&[-100.0, -1.0, -1e-3, 0.0, 1e-3, 1.0, 100.0]);
    for policy in [
        ClipPolicy::TRUST_REGION,
        ClipPolicy::MuLaw { mu: 127.0 },
        ClipPolicy::ALaw { a: 87.6 },
    ] {
        let out = policy.apply(&x, &x).unwrap();
        assert_same_direction(&x, &out);
    }
    let tr = ClipPolicy::TRUST_REGION.apply(&x, &x).unwrap();
    assert!(tr.max_abs() <= 2.0);
}

#[test]
fn test_mu_law_maps_one_to_one() {
    let x = Tensor::from_slice(&[1.0, -1.0]);
    let out = ClipPolicy::MuLaw { mu: 127.0 }.apply(&x, &x).unwrap();
    assert_relative_eq!(out.data()[0], 1.0, epsilon = 1e-6);
    assert_relative_eq!(out.data()[1], -1.0, epsilon = 1e-6);
}

#[test]
fn test_param_trust_region_bounds_update_by_param_norm() {
    let update = Tensor::from_slice(&[3.0, 4.0]);
    let param = Tensor::from_slice(&[0.0, 1.0]);
    let out = ClipPolicy::ParamTrustRegion { max_ratio: 0.5 }
        .apply(&update, &param)
        .unwrap();
    assert_relative_eq!(out.norm(), 0.5, epsilon = 1e-6);
    assert_same_direction(&update, &out);

    let zero = Tensor::zeros(&[2]);
    let untouched = ClipPolicy::ParamTrustRegion { max_ratio: 0.5 }
        .apply(&update, &zero)
        .unwrap();
    assert_eq!(untouched, update);
}

#[test]
fn test_registry_names() {
    for name in [
        "identity",
        "l2_clip",
        "rmsnorm_clip",
        "trust_region_clip",
        "mu_law_compress",
        "a_law_compress",
        "param_trust_region",
    ] {
        let policy = ClipPolicy::from_name(name).unwrap();
        assert_eq!(policy.name(), name);
        policy.validate().unwrap();
    }
    assert!(matches!(
        Clip::named("nope"),
        Err(BallastError::ConfigurationError(_))
    ));
}

#[test]
fn test_validate_rejects_bad_parameters() {
    assert!(ClipPolicy::L2 { max_norm: 0.0 }.validate().is_err());
    assert!(ClipPolicy::ALaw { a: 1.0 }.validate().is_err());
    assert!(ClipPolicy::TrustRegion { lerp: 1.5, scale: 1.0 }.validate().is_err());
}

#[test]
fn test_clip_selector_fallback_and_custom() {
    let x = sample();
    let by_default = Clip::Default.apply(&x, &x, ClipPolicy::Identity).unwrap();
    assert_eq!(by_default, x);

    let halve = Clip::custom(|v: &Tensor, _p: &Tensor| Ok(v.mul_scalar(0.5)));
    let out = halve.apply(&x, &x, ClipPolicy::Identity).unwrap();
    assert_eq!(out.data()[0], 1.5);

    let reshaping = Clip::custom(|_v: &Tensor, _p: &Tensor| Ok(Tensor::zeros(&[1])));
    assert!(matches!(
        reshaping.apply(&x, &x, ClipPolicy::Identity),
        Err(BallastError::ShapeMismatch { .. })
    ));
    assert_eq!(format!("{:?}", halve), "Clip::Custom(<fn>)");
}
