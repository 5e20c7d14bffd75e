//! Optimizer configuration.
//!
//! One [`OptimizerConfig`] holds the defaults of an optimizer; parameter groups
//! override a subset of them through [`ParamGroupOptions`](crate::ParamGroupOptions).
//! Algorithm-specific defaults come from [`OptimizerConfig::for_variant`].

use crate::grad_clipping::{Clip, ClipPolicy};
use crate::param_group::ParamGroupOptions;
use ballast_core::{BallastError, DType};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The algorithm families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Variant {
    AdamW,
    /// Debiased RMSprop (second-moment scaling only).
    RmsProp,
    /// Schedule-free AdamW. Driven by [`ScheduleFreeOptimizer`](crate::ScheduleFreeOptimizer).
    SfAdamW,
    Adopt,
    LaProp,
    Soap,
    PsgdKron,
}

impl Variant {
    pub fn name(&self) -> &'static str {
        match self {
            Variant::AdamW => "AdamW",
            Variant::RmsProp => "RMSprop",
            Variant::SfAdamW => "SFAdamW",
            Variant::Adopt => "ADOPT",
            Variant::LaProp => "LaProp",
            Variant::Soap => "SOAP",
            Variant::PsgdKron => "PSGDKron",
        }
    }

    pub fn is_schedule_free(&self) -> bool {
        matches!(self, Variant::SfAdamW)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Boolean switches that select between members of one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureFlags {
    /// Anneal beta2 as `1 - step^(-beta2_scale)`.
    pub palm: bool,
    /// PSGD: precondition with the previous step's factors, then update them.
    pub delayed: bool,
    /// PSGD: keep `QᵀQ` per axis and refresh it only when the factors change.
    pub cached: bool,
    /// PSGD: feed a momentum EMA into the preconditioner instead of the raw gradient.
    pub exp_avg_input: bool,
    /// SOAP: refresh the basis on the probabilistic `precond_scheduler` instead
    /// of every `precondition_frequency` steps.
    pub use_precond_schedule: bool,
}

impl FeatureFlags {
    pub const NONE: FeatureFlags = FeatureFlags {
        palm: false,
        delayed: false,
        cached: false,
        exp_avg_input: false,
        use_precond_schedule: false,
    };
}

/// Which PSGD axes are forced to diagonal factors regardless of size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MemorySaveMode {
    /// The largest axis.
    OneDiag,
    /// Every axis.
    AllDiag,
}

/// Annealed probability `max_prob · exp(-decay · (n - flat_start))`, clamped
/// to `[min_prob, max_prob]`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProbSchedule {
    pub max_prob: f32,
    pub min_prob: f32,
    pub decay: f32,
    pub flat_start: u64,
}

impl Default for ProbSchedule {
    fn default() -> Self {
        ProbSchedule {
            max_prob: 1.0,
            min_prob: 0.03,
            decay: 0.001,
            flat_start: 500,
        }
    }
}

/// Probability of updating the PSGD factors on a given step.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UpdateProbability {
    Constant(f32),
    Schedule(ProbSchedule),
}

impl Default for UpdateProbability {
    fn default() -> Self {
        UpdateProbability::Schedule(ProbSchedule::default())
    }
}

/// SOAP knobs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SoapConfig {
    /// Decay of the per-axis second-moment statistics.
    pub shampoo_beta: f32,
    /// Refresh the basis when `step % precondition_frequency == 0`.
    /// Required unless `use_precond_schedule` is set.
    pub precondition_frequency: Option<u64>,
    /// `(a, b)`: refresh with probability `1 / (log10(step^a)^b + 1)`.
    /// Required when `use_precond_schedule` is set.
    pub precond_scheduler: Option<(f32, f32)>,
    /// Axes larger than this are not preconditioned (and cap merged axes).
    pub max_precond_dim: usize,
    pub merge_dims: bool,
    /// Precondition 1-D parameters too.
    pub precondition_1d: bool,
    /// Cut axes larger than `max_precond_dim` into blocks.
    pub split: bool,
    /// Bias-correct the rotated-frame moments.
    pub correct_bias: bool,
}

impl Default for SoapConfig {
    fn default() -> Self {
        SoapConfig {
            shampoo_beta: 0.95,
            precondition_frequency: Some(2),
            precond_scheduler: Some((1.0 / 3.0, 9.0)),
            max_precond_dim: 2048,
            merge_dims: true,
            precondition_1d: false,
            split: false,
            correct_bias: true,
        }
    }
}

/// PSGD Kron knobs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PsgdConfig {
    /// `None` uses the default annealed schedule.
    pub update_probability: Option<UpdateProbability>,
    /// Axes larger than this get diagonal factors (and cap merged axes).
    pub max_size_triangular: usize,
    /// Shards with fewer axes than this get diagonal factors only.
    pub min_ndim_triangular: usize,
    pub memory_save_mode: Option<MemorySaveMode>,
    pub momentum_into_precond_update: bool,
    pub precond_lr: f32,
    pub precond_init_scale: f32,
    /// Draw the update decision at random; otherwise accumulate probability
    /// and update whenever the running sum crosses an integer.
    pub stochastic_schedule: bool,
    /// Store triangular factors packed row by row.
    pub store_triu_as_line: bool,
    pub merge_dims: bool,
    pub split: bool,
    /// Storage dtype of the factors.
    pub q_dtype: DType,
}

impl Default for PsgdConfig {
    fn default() -> Self {
        PsgdConfig {
            update_probability: None,
            max_size_triangular: 2048,
            min_ndim_triangular: 2,
            memory_save_mode: None,
            momentum_into_precond_update: true,
            precond_lr: 0.1,
            precond_init_scale: 1.0,
            stochastic_schedule: true,
            store_triu_as_line: true,
            merge_dims: false,
            split: false,
            q_dtype: DType::F32,
        }
    }
}

/// Hyperparameters shared by every optimizer.
///
/// PSGD uses a single momentum coefficient, read from `betas.0`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OptimizerConfig {
    pub lr: f32,
    pub betas: (f32, f32),
    pub eps: f32,
    pub weight_decay: f32,
    pub warmup_steps: u64,
    /// Storage dtype of the moment accumulators.
    pub storage_dtype: DType,
    pub mars: bool,
    pub mars_gamma: f32,
    pub caution: bool,
    /// Exponent of the palm beta2 schedule.
    pub beta2_scale: f32,
    /// Schedule-free: step-count exponent of the averaging weight.
    pub r: f32,
    /// Schedule-free: learning-rate exponent of the averaging weight.
    pub weight_lr_power: f32,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub gradient_clipping: Clip,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub update_clipping: Clip,
    pub soap: SoapConfig,
    pub psgd: PsgdConfig,
    /// Base seed for per-parameter randomness (probes, schedules, rounding).
    pub seed: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            lr: 0.0025,
            betas: (0.9, 0.99),
            eps: 1e-8,
            weight_decay: 0.0,
            warmup_steps: 0,
            storage_dtype: DType::F32,
            mars: false,
            mars_gamma: 0.0025,
            caution: false,
            beta2_scale: 0.8,
            r: 0.0,
            weight_lr_power: 2.0,
            gradient_clipping: Clip::Default,
            update_clipping: Clip::Default,
            soap: SoapConfig::default(),
            psgd: PsgdConfig::default(),
            seed: 0,
        }
    }
}

impl OptimizerConfig {
    /// Defaults for one algorithm family.
    pub fn for_variant(variant: Variant) -> Self {
        let base = OptimizerConfig::default();
        match variant {
            Variant::AdamW | Variant::Adopt | Variant::LaProp => base,
            Variant::RmsProp | Variant::SfAdamW => OptimizerConfig { eps: 1e-6, ..base },
            Variant::Soap => OptimizerConfig {
                lr: 3e-3,
                betas: (0.9, 0.95),
                weight_decay: 0.01,
                warmup_steps: 1,
                ..base
            },
            Variant::PsgdKron => OptimizerConfig {
                lr: 0.001,
                betas: (0.9, 0.0),
                warmup_steps: 1,
                ..base
            },
        }
    }

    pub fn with_lr(mut self, lr: f32) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_betas(mut self, beta1: f32, beta2: f32) -> Self {
        self.betas = (beta1, beta2);
        self
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_warmup_steps(mut self, warmup_steps: u64) -> Self {
        self.warmup_steps = warmup_steps;
        self
    }

    pub fn with_storage_dtype(mut self, dtype: DType) -> Self {
        self.storage_dtype = dtype;
        self
    }

    pub fn with_mars(mut self, gamma: f32) -> Self {
        self.mars = true;
        self.mars_gamma = gamma;
        self
    }

    pub fn with_caution(mut self, caution: bool) -> Self {
        self.caution = caution;
        self
    }

    pub fn with_gradient_clipping(mut self, clip: Clip) -> Self {
        self.gradient_clipping = clip;
        self
    }

    pub fn with_update_clipping(mut self, clip: Clip) -> Self {
        self.update_clipping = clip;
        self
    }

    pub fn with_soap(mut self, soap: SoapConfig) -> Self {
        self.soap = soap;
        self
    }

    pub fn with_psgd(mut self, psgd: PsgdConfig) -> Self {
        self.psgd = psgd;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Copy of `self` with a group's overrides applied.
    pub fn resolved(&self, options: &ParamGroupOptions) -> OptimizerConfig {
        let mut cfg = self.clone();
        if let Some(lr) = options.lr {
            cfg.lr = lr;
        }
        if let Some(betas) = options.betas {
            cfg.betas = betas;
        }
        if let Some(eps) = options.eps {
            cfg.eps = eps;
        }
        if let Some(wd) = options.weight_decay {
            cfg.weight_decay = wd;
        }
        if let Some(warmup) = options.warmup_steps {
            cfg.warmup_steps = warmup;
        }
        cfg
    }

    /// Policy used when a clipping site is left at `Clip::Default`.
    pub fn default_update_clip(variant: Variant) -> ClipPolicy {
        match variant {
            Variant::PsgdKron => ClipPolicy::TRUST_REGION,
            _ => ClipPolicy::Identity,
        }
    }

    /// Checks value ranges and option combinations for `variant` with `flags`.
    ///
    /// # Errors
    /// `ConfigurationError` describing the first problem found.
    pub fn validate(&self, variant: Variant, flags: &FeatureFlags) -> Result<(), BallastError> {
        fn err(msg: impl Into<String>) -> Result<(), BallastError> {
            Err(BallastError::ConfigurationError(msg.into()))
        }

        if !(self.lr >= 0.0 && self.lr.is_finite()) {
            return err(format!("Learning rate must be non-negative and finite, got {}", self.lr));
        }
        let (beta1, beta2) = self.betas;
        if !(0.0..1.0).contains(&beta1) {
            return err(format!("Beta1 must be in [0, 1), got {}", beta1));
        }
        if !(0.0..1.0).contains(&beta2) {
            return err(format!("Beta2 must be in [0, 1), got {}", beta2));
        }
        if !(self.eps > 0.0) {
            return err(format!("Epsilon must be positive, got {}", self.eps));
        }
        if !(self.weight_decay >= 0.0 && self.weight_decay.is_finite()) {
            return err(format!("Weight decay must be non-negative, got {}", self.weight_decay));
        }
        if self.mars && !(self.mars_gamma >= 0.0 && self.mars_gamma.is_finite()) {
            return err("mars_gamma must be non-negative");
        }
        if flags.palm && !(self.beta2_scale > 0.0) {
            return err("beta2_scale must be positive when palm is enabled");
        }
        self.gradient_clipping.validate()?;
        self.update_clipping.validate()?;

        if variant.is_schedule_free() {
            if beta1 == 0.0 {
                return err("Schedule-free averaging requires beta1 > 0");
            }
            if !self.weight_lr_power.is_finite() || !self.r.is_finite() {
                return err("r and weight_lr_power must be finite");
            }
        }

        if variant == Variant::Soap {
            let soap = &self.soap;
            if !(0.0..1.0).contains(&soap.shampoo_beta) {
                return err(format!("shampoo_beta must be in [0, 1), got {}", soap.shampoo_beta));
            }
            if soap.max_precond_dim == 0 {
                return err("max_precond_dim must be at least 1");
            }
            if flags.use_precond_schedule {
                match soap.precond_scheduler {
                    Some((a, b)) if a.is_finite() && b.is_finite() => {}
                    Some(_) => return err("precond_scheduler parameters must be finite"),
                    None => {
                        return err("use_precond_schedule is set but precond_scheduler is missing")
                    }
                }
            } else {
                match soap.precondition_frequency {
                    Some(f) if f > 0 => {}
                    Some(_) => return err("precondition_frequency must be at least 1"),
                    None => {
                        return err(
                            "precondition_frequency is missing; set it or enable use_precond_schedule",
                        )
                    }
                }
            }
        }

        if variant == Variant::PsgdKron {
            let psgd = &self.psgd;
            if psgd.max_size_triangular == 0 {
                return err("max_size_triangular must be at least 1");
            }
            if !(psgd.precond_lr > 0.0 && psgd.precond_lr.is_finite()) {
                return err(format!("precond_lr must be positive, got {}", psgd.precond_lr));
            }
            if !(psgd.precond_init_scale > 0.0 && psgd.precond_init_scale.is_finite()) {
                return err(format!(
                    "precond_init_scale must be positive, got {}",
                    psgd.precond_init_scale
                ));
            }
            match psgd.update_probability {
                Some(UpdateProbability::Constant(p)) if !(0.0..=1.0).contains(&p) => {
                    return err(format!("Update probability must be in [0, 1], got {}", p));
                }
                Some(UpdateProbability::Schedule(s))
                    if !(0.0 <= s.min_prob && s.min_prob <= s.max_prob && s.max_prob <= 1.0) =>
                {
                    return err("Probability schedule needs 0 <= min_prob <= max_prob <= 1");
                }
                _ => {}
            }
        } else if flags.delayed || flags.cached || flags.exp_avg_input {
            return err(format!(
                "delayed/cached/exp_avg_input only apply to PSGD, not {}",
                variant
            ));
        }
        if flags.palm && variant == Variant::PsgdKron {
            return err("palm schedules beta2, which PSGD does not use");
        }
        if flags.use_precond_schedule && variant != Variant::Soap {
            return err(format!("use_precond_schedule only applies to SOAP, not {}", variant));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
