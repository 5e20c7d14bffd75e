//! Gradient and update clipping policies.
//!
//! Clipping runs twice per step: on the raw gradient before the transformation
//! chain, and on the final update before it is applied. Each site holds a
//! [`Clip`] selector: the algorithm default, a named built-in [`ClipPolicy`],
//! or a user closure.

use ballast_core::{BallastError, Tensor};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A user-supplied clipping function: `(value, parameter) -> clipped value`.
pub type ClipFn = Arc<dyn Fn(&Tensor, &Tensor) -> Result<Tensor, BallastError> + Send + Sync>;

/// Built-in clipping policies, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ClipPolicy {
    /// Leaves the value unchanged.
    Identity,
    /// Rescales so that the L2 norm is at most `max_norm`.
    L2 { max_norm: f32 },
    /// Rescales so that the root-mean-square is at most `max_rms`.
    RmsNorm { max_rms: f32 },
    /// Soft element-wise squashing: a blend of `sign(x)·log1p(|x|)` and `tanh(x)`
    /// on `x / scale`, rescaled and clamped to `[-2, 2]`.
    TrustRegion { lerp: f32, scale: f32 },
    /// μ-law companding: `sign(x)·log1p(μ|x|)/log1p(μ)`.
    MuLaw { mu: f32 },
    /// A-law companding.
    ALaw { a: f32 },
    /// Rescales the update so that `‖u‖ ≤ max_ratio·‖p‖` (no-op while `p` is zero).
    ParamTrustRegion { max_ratio: f32 },
}

impl ClipPolicy {
    pub const TRUST_REGION: ClipPolicy = ClipPolicy::TrustRegion {
        lerp: 0.9,
        scale: 1.5,
    };

    /// Looks a policy up by its registry name, with default parameters.
    ///
    /// # Errors
    /// `ConfigurationError` for unknown names.
    pub fn from_name(name: &str) -> Result<ClipPolicy, BallastError> {
        match name {
            "identity" => Ok(ClipPolicy::Identity),
            "l2_clip" | "l2_clip_" => Ok(ClipPolicy::L2 { max_norm: 1.0 }),
            "rmsnorm_clip" | "rmsnorm_clip_" => Ok(ClipPolicy::RmsNorm { max_rms: 1.0 }),
            "trust_region_clip" | "trust_region_clip_" => Ok(ClipPolicy::TRUST_REGION),
            "mu_law_compress" => Ok(ClipPolicy::MuLaw { mu: 127.0 }),
            "a_law_compress" => Ok(ClipPolicy::ALaw { a: 87.6 }),
            "param_trust_region" => Ok(ClipPolicy::ParamTrustRegion { max_ratio: 1.0 }),
            other => Err(BallastError::ConfigurationError(format!(
                "Unknown clipping policy '{}'",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClipPolicy::Identity => "identity",
            ClipPolicy::L2 { .. } => "l2_clip",
            ClipPolicy::RmsNorm { .. } => "rmsnorm_clip",
            ClipPolicy::TrustRegion { .. } => "trust_region_clip",
            ClipPolicy::MuLaw { .. } => "mu_law_compress",
            ClipPolicy::ALaw { .. } => "a_law_compress",
            ClipPolicy::ParamTrustRegion { .. } => "param_trust_region",
        }
    }

    pub fn validate(&self) -> Result<(), BallastError> {
        let (what, value) = match *self {
            ClipPolicy::Identity => return Ok(()),
            ClipPolicy::L2 { max_norm } => ("max_norm", max_norm),
            ClipPolicy::RmsNorm { max_rms } => ("max_rms", max_rms),
            ClipPolicy::TrustRegion { lerp, scale } => {
                if !(0.0..=1.0).contains(&lerp) {
                    return Err(BallastError::ConfigurationError(
                        "trust_region_clip lerp must be in [0, 1]".to_string(),
                    ));
                }
                ("scale", scale)
            }
            ClipPolicy::MuLaw { mu } => ("mu", mu),
            ClipPolicy::ALaw { a } => {
                if a <= 1.0 {
                    return Err(BallastError::ConfigurationError(
                        "a_law_compress requires A > 1".to_string(),
                    ));
                }
                ("a", a)
            }
            ClipPolicy::ParamTrustRegion { max_ratio } => ("max_ratio", max_ratio),
        };
        if !(value > 0.0 && value.is_finite()) {
            return Err(BallastError::ConfigurationError(format!(
                "{} parameter {} must be positive, got {}",
                self.name(),
                what,
                value
            )));
        }
        Ok(())
    }

    /// Applies the policy. `param` is only read by `ParamTrustRegion`.
    pub fn apply(&self, x: &Tensor, param: &Tensor) -> Result<Tensor, BallastError> {
        let out = match *self {
            ClipPolicy::Identity => x.clone(),
            ClipPolicy::L2 { max_norm } => {
                let norm = x.norm();
                if norm > max_norm {
                    x.mul_scalar(max_norm / norm)
                } else {
                    x.clone()
                }
            }
            ClipPolicy::RmsNorm { max_rms } => {
                let rms = x.rms();
                if rms > max_rms {
                    x.mul_scalar(max_rms / rms)
                } else {
                    x.clone()
                }
            }
            ClipPolicy::TrustRegion { lerp, scale } => x.map(|v| {
                let y = v / scale;
                let soft = y.abs().ln_1p().copysign(y);
                let blended = soft + lerp * (y.tanh() - soft);
                (blended * scale).clamp(-2.0, 2.0)
            }),
            ClipPolicy::MuLaw { mu } => {
                let denom = mu.ln_1p();
                x.map(|v| (mu * v.abs()).ln_1p().copysign(v) / denom)
            }
            ClipPolicy::ALaw { a } => {
                let denom = 1.0 + a.ln();
                x.map(|v| {
                    let xa = v.abs() * a;
                    let mag = if xa < 1.0 { xa / denom } else { (1.0 + xa.ln()) / denom };
                    mag.copysign(v)
                })
            }
            ClipPolicy::ParamTrustRegion { max_ratio } => {
                x.check_same_shape(param, "param_trust_region")?;
                let limit = max_ratio * param.norm();
                let norm = x.norm();
                if limit > 0.0 && norm > limit {
                    x.mul_scalar(limit / norm)
                } else {
                    x.clone()
                }
            }
        };
        Ok(out)
    }
}

/// Clipping selector for one clipping site.
#[derive(Clone, Default)]
pub enum Clip {
    /// Use the algorithm's default policy.
    #[default]
    Default,
    Policy(ClipPolicy),
    Custom(ClipFn),
}

impl Clip {
    /// Selects a built-in policy by name.
    pub fn named(name: &str) -> Result<Clip, BallastError> {
        ClipPolicy::from_name(name).map(Clip::Policy)
    }

    pub fn custom<F>(f: F) -> Clip
    where
        F: Fn(&Tensor, &Tensor) -> Result<Tensor, BallastError> + Send + Sync + 'static,
    {
        Clip::Custom(Arc::new(f))
    }

    pub fn validate(&self) -> Result<(), BallastError> {
        match self {
            Clip::Policy(p) => p.validate(),
            Clip::Default | Clip::Custom(_) => Ok(()),
        }
    }

    /// Applies the selected policy, falling back to `default` for `Clip::Default`.
    ///
    /// # Errors
    /// `ShapeMismatch` if a custom function changes the shape.
    pub fn apply(&self, x: &Tensor, param: &Tensor, default: ClipPolicy) -> Result<Tensor, BallastError> {
        match self {
            Clip::Default => default.apply(x, param),
            Clip::Policy(p) => p.apply(x, param),
            Clip::Custom(f) => {
                let out = f(x, param)?;
                x.check_same_shape(&out, "custom clipping function")?;
                Ok(out)
            }
        }
    }
}

impl fmt::Debug for Clip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clip::Default => f.write_str("Clip::Default"),
            Clip::Policy(p) => write!(f, "Clip::Policy({:?})", p),
            Clip::Custom(_) => f.write_str("Clip::Custom(<fn>)"),
        }
    }
}

#[cfg(test)]
#[path = "grad_clipping_test.rs"]
mod tests;
